//! Rate-limited HTTP plumbing shared by the API clients.
//!
//! Both the playback client and the token refresh path go through this
//! wrapper around `reqwest::Client`. It adds:
//! * a client-side request budget, so bursts of playback commands stay
//!   inside the provider's quota
//! * consistent timeouts, keep-alive and headers on every request
//!
//! # Rate Limiting
//!
//! The Web API throttles per application over a rolling 30-second window
//! without publishing exact numbers. The budget here stays well below the
//! observed ceiling: up to 50 calls per window, available as a burst,
//! with requests over the budget delayed rather than rejected.
//!
//! Polling alone uses a small fraction of the budget; the limiter matters
//! when the embedder issues playback commands on top of the poll loop.
//!
//! # Example
//!
//! ```no_run
//! use soundtrail::{config::Config, error::Result, http::Client};
//!
//! # async fn poll(config: &Config) -> Result<()> {
//! let client = Client::new(config)?;
//!
//! let url: reqwest::Url = "https://api.spotify.com/v1/me/player".parse()?;
//! let request = client.get(url, "");
//! let response = client.execute(request).await?;
//! # Ok(())
//! # }
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderValue, ACCEPT_LANGUAGE},
    Body, Method, Url,
};

use crate::{config::Config, error::Result};

/// HTTP client that spends a request budget before every call.
pub struct Client {
    /// The underlying client, usable without rate limiting.
    pub unlimited: reqwest::Client,

    /// Request budget shared by everything this client sends.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Length of the provider's rolling quota window.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);

    /// Calls allowed per quota window.
    ///
    /// Calls beyond the budget wait for it to replenish.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    /// How long idle connections are kept open.
    ///
    /// Long enough to reuse one connection across ten-second poll
    /// cycles instead of reconnecting every time.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Upper bound on individual network reads.
    ///
    /// A stalled read must resolve before the next poll cycle is due.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a client configured for the provider's services.
    ///
    /// The user agent and preferred language come from `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if the rate limit constants are zero.
    pub fn new(config: &Config) -> Result<Self> {
        // Not having `Accept-Language` set is non-fatal.
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        // Rate limit own requests as to not DoS the provider infrastructure.
        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request for [`execute`](Self::execute).
    ///
    /// The callers set their own `Authorization` and `Content-Type`
    /// headers on the returned request.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use soundtrail::{error::Result, http::Client};
    /// use reqwest::Method;
    ///
    /// # async fn refresh(client: &Client, form: String) -> Result<()> {
    /// let url: reqwest::Url = "https://accounts.spotify.com/api/token".parse()?;
    /// let request = client.request(Method::POST, url, form);
    /// let response = client.execute(request).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    /// Builds a GET request; see [`request`](Self::request).
    pub fn get<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::GET, url, body)
    }

    /// Builds a POST request; see [`request`](Self::request).
    pub fn post<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::POST, url, body)
    }

    /// Builds a PUT request; see [`request`](Self::request).
    ///
    /// The playback command endpoints are PUT with empty bodies.
    pub fn put<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::PUT, url, body)
    }

    /// Executes a request once the rate limiter clears it.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails in transport.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}
