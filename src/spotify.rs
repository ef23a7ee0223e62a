//! Web API client for playback state and playback commands.
//!
//! All requests carry a bearer token obtained from the shared
//! [`TokenManager`]. The manager sits behind a mutex, so concurrent
//! callers needing a refresh take turns and only one network round trip
//! happens.
//!
//! # Response Handling
//!
//! * `200 OK` - parsed playback state
//! * `204 No Content` - no active device; reported as `Ok(None)`, not an
//!   error
//! * `401 Unauthorized` - the access token is invalidated so the next
//!   request refreshes, and the call fails with `Unauthenticated`
//! * `404 Not Found` on commands - no active device to control
//! * `429 Too Many Requests` - reported as `ResourceExhausted`
//!
//! # Playback Commands
//!
//! The command surface mirrors what the provider exposes: play, pause,
//! skip in both directions, seek, volume, shuffle and repeat. Commands
//! are fire-and-forget from the engine's point of view; the next poll
//! observes their effect.

use std::{fmt, sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderValue, AUTHORIZATION},
    Method, StatusCode,
};
use tokio::sync::Mutex;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http,
    protocol::{self, player::PlayerState},
    tokens::TokenManager,
};

/// Repeat setting for playback.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum RepeatMode {
    /// Repeat nothing.
    #[default]
    Off,
    /// Repeat the current track.
    Track,
    /// Repeat the current context, usually an album or playlist.
    Context,
}

/// Formats as the wire value of the repeat setting.
impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Off => "off",
            Self::Track => "track",
            Self::Context => "context",
        };
        write!(f, "{state}")
    }
}

/// Client for the provider's Web API.
pub struct Spotify {
    /// Rate-limited client for the Web API.
    http_client: http::Client,

    /// Shared token manager; locked per request.
    tokens: Arc<Mutex<TokenManager>>,

    /// Base URL of the Web API, ending in a slash.
    api_url: Url,
}

impl Spotify {
    /// Creates a client over the shared token manager.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: &Config, tokens: Arc<Mutex<TokenManager>>) -> Result<Self> {
        Ok(Self {
            http_client: http::Client::new(config)?,
            tokens,
            api_url: config.api_url.clone(),
        })
    }

    /// Fetches what the account is currently playing.
    ///
    /// Returns `Ok(None)` when no device is active, which the provider
    /// reports as `204 No Content`.
    ///
    /// # Errors
    ///
    /// Returns error if no valid access token can be obtained, the
    /// request fails in transport, or the endpoint answers with an
    /// unexpected status.
    pub async fn player_state(&self) -> Result<Option<PlayerState>> {
        let bearer = self.bearer_header().await?;

        let url = self.api_url.join("me/player")?;
        let mut request = self.http_client.get(url, "");
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let response = self.http_client.execute(request).await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::UNAUTHORIZED => {
                self.tokens.lock().await.invalidate_access_token();
                Err(Error::unauthenticated(
                    "playback state request was denied; access token invalidated",
                ))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(Error::resource_exhausted(
                "playback state requests are being throttled",
            )),
            status if status.is_success() => {
                let body = response.text().await?;
                protocol::json(&body, "me/player").map(Some)
            }
            status => Err(Error::unavailable(format!(
                "playback state endpoint returned {status}"
            ))),
        }
    }

    /// Resumes playback on the active device.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails; see [`Self::player_state`] for
    /// the status mapping.
    pub async fn play(&self) -> Result<()> {
        self.command(Method::PUT, "me/player/play", &[]).await
    }

    /// Pauses playback on the active device.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails.
    pub async fn pause(&self) -> Result<()> {
        self.command(Method::PUT, "me/player/pause", &[]).await
    }

    /// Skips to the next track.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails.
    pub async fn next(&self) -> Result<()> {
        self.command(Method::POST, "me/player/next", &[]).await
    }

    /// Skips to the previous track.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails.
    pub async fn previous(&self) -> Result<()> {
        self.command(Method::POST, "me/player/previous", &[]).await
    }

    /// Seeks within the current track.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails.
    pub async fn seek(&self, position: Duration) -> Result<()> {
        let position_ms = position.as_millis().to_string();
        self.command(Method::PUT, "me/player/seek", &[("position_ms", &position_ms)])
            .await
    }

    /// Sets the playback volume.
    ///
    /// Values above 100 percent are clamped.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails.
    pub async fn set_volume(&self, percent: u8) -> Result<()> {
        let volume_percent = percent.min(100).to_string();
        self.command(
            Method::PUT,
            "me/player/volume",
            &[("volume_percent", &volume_percent)],
        )
        .await
    }

    /// Turns shuffle on or off.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails.
    pub async fn set_shuffle(&self, shuffle: bool) -> Result<()> {
        let state = shuffle.to_string();
        self.command(Method::PUT, "me/player/shuffle", &[("state", &state)])
            .await
    }

    /// Sets the repeat mode.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails.
    pub async fn set_repeat(&self, mode: RepeatMode) -> Result<()> {
        let state = mode.to_string();
        self.command(Method::PUT, "me/player/repeat", &[("state", &state)])
            .await
    }

    /// Obtains a valid bearer token and formats it as a header value.
    async fn bearer_header(&self) -> Result<HeaderValue> {
        let token = self.tokens.lock().await.access_token().await?;
        Ok(HeaderValue::from_str(&format!("Bearer {token}"))?)
    }

    /// Sends one playback command and maps its status to a result.
    async fn command(&self, method: Method, path: &str, query: &[(&str, &str)]) -> Result<()> {
        let bearer = self.bearer_header().await?;

        let mut url = self.api_url.join(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let mut request = self.http_client.request(method, url, "");
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                self.tokens.lock().await.invalidate_access_token();
                Err(Error::unauthenticated(format!(
                    "{path} was denied; access token invalidated"
                )))
            }
            StatusCode::NOT_FOUND => Err(Error::not_found("no active device to control")),
            StatusCode::FORBIDDEN => Err(Error::permission_denied(format!(
                "{path} was refused for this account"
            ))),
            StatusCode::TOO_MANY_REQUESTS => Err(Error::resource_exhausted(
                "playback commands are being throttled",
            )),
            status if status.is_success() => {
                trace!("{path}: acknowledged");
                Ok(())
            }
            status => Err(Error::unavailable(format!("{path} returned {status}"))),
        }
    }
}
