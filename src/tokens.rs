//! Access token lifecycle management.
//!
//! This module owns the stored token pair and is the only writer of it.
//! Callers ask for a valid access token and never see the refresh
//! machinery:
//!
//! * A stored token that is fresh is returned as-is
//! * A token within five minutes of expiry is refreshed first
//! * A missing or stale pair without a refresh token fails with
//!   [`ErrorKind::Unauthenticated`](crate::error::ErrorKind::Unauthenticated)
//!
//! # Refresh Protocol
//!
//! Refreshing POSTs a `grant_type=refresh_token` form to the accounts
//! service, authenticated with HTTP Basic client credentials. The service
//! may rotate the refresh token; when it does not, the previous refresh
//! token remains valid and is kept.
//!
//! # Persistence
//!
//! Every successful refresh replaces the whole stored [`Credential`]
//! atomically before the new token is handed out, so a crash between
//! refresh and next poll cannot lose the pair. An optional
//! [`CredentialSink`] mirror is updated afterwards on a best-effort basis.
//!
//! # Concurrency
//!
//! The manager takes `&mut self` for anything that can refresh. Sharing
//! it behind `Arc<tokio::sync::Mutex<...>>` therefore makes concurrent
//! refresh attempts take turns, and the second caller finds a fresh token
//! and returns without a second network round trip.

use std::{sync::Arc, time::SystemTime};

use reqwest::{
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    StatusCode,
};
use url::Url;

use crate::{
    backend::CredentialSink,
    config::Config,
    credentials::{AccessToken, Credential},
    error::{Error, Result},
    http,
    protocol::{self, token::Grant},
    secrets::Secrets,
    store::CredentialStore,
};

/// Manages the stored token pair and its renewal.
pub struct TokenManager {
    /// Rate-limited client for the accounts service.
    http_client: http::Client,

    /// Durable storage for the token pair.
    store: Arc<CredentialStore>,

    /// The pair currently in use.
    ///
    /// Loaded from the store at construction and written back on every
    /// refresh.
    credential: Credential,

    /// Base URL of the accounts service.
    auth_url: Url,

    /// Client credentials for the token endpoint.
    secrets: Secrets,

    /// Optional mirror notified after every successful refresh.
    mirror: Option<Arc<dyn CredentialSink>>,
}

impl TokenManager {
    /// Creates a manager over the stored token pair.
    ///
    /// A missing or corrupt stored record is not an error: the manager
    /// starts unauthorized and reports it when a token is first needed.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created or the store
    /// cannot be read.
    pub fn new(
        config: &Config,
        store: Arc<CredentialStore>,
        mirror: Option<Arc<dyn CredentialSink>>,
    ) -> Result<Self> {
        let credential = match store.load_credential()? {
            Some(credential) => {
                debug!("loaded stored credentials");
                credential
            }
            None => {
                debug!("no stored credentials, starting unauthorized");
                Credential::default()
            }
        };

        Ok(Self {
            http_client: http::Client::new(config)?,
            store,
            credential,
            auth_url: config.auth_url.clone(),
            secrets: config.secrets.clone(),
            mirror,
        })
    }

    /// Returns a valid access token, refreshing the stored pair first if
    /// it is stale or near expiry.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Unauthenticated`](crate::error::ErrorKind::Unauthenticated)
    /// if no refresh token is available or the accounts service rejects
    /// it, and a transport error if the refresh request itself fails.
    pub async fn access_token(&mut self) -> Result<AccessToken> {
        if let Some(token) = self.credential.fresh_access_token() {
            return Ok(token);
        }

        self.refresh().await
    }

    /// Drops the current access token so the next request refreshes.
    ///
    /// Called when the Web API answers `401 Unauthorized` with a token
    /// that looked fresh. In memory only: the stored expiry is consulted
    /// on restart, when the token is checked against the clock anyway.
    pub fn invalidate_access_token(&mut self) {
        debug!("invalidating the current access token");
        self.credential.expires_at = SystemTime::UNIX_EPOCH;
    }

    /// Exchanges the refresh token for a fresh access token.
    async fn refresh(&mut self) -> Result<AccessToken> {
        let refresh_token = self.credential.refresh_token.clone().ok_or_else(|| {
            Error::unauthenticated("no refresh token available; reauthorization required")
        })?;

        debug!("refreshing the access token");

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", &refresh_token)
            .finish();

        let url = self.auth_url.join("api/token")?;
        let mut request = self.http_client.post(url, form);
        let headers = request.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", self.secrets.basic_auth()))?,
        );

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Error::unauthenticated(
                    format!("token endpoint rejected the refresh ({status}): {body}"),
                ),
                StatusCode::TOO_MANY_REQUESTS => Error::resource_exhausted(format!(
                    "token endpoint throttled the refresh ({status}): {body}"
                )),
                _ => Error::unavailable(format!("token endpoint returned {status}: {body}")),
            });
        }

        let body = response.text().await?;
        let grant: Grant = protocol::json(&body, "api/token")?;

        let expires_at = SystemTime::now() + grant.expires_in;
        let access_token = AccessToken {
            token: grant.access_token.clone(),
            expires_at,
        };

        let mut credential = self.credential.clone();
        credential.access_token = Some(grant.access_token);
        credential.expires_at = expires_at;
        if let Some(rotated) = grant.refresh_token {
            trace!("refresh token rotated");
            credential.refresh_token = Some(rotated);
        }

        // Persist before handing the token out, so a crash right after
        // cannot lose the pair that is in use.
        self.store.save_credential(&credential)?;
        self.credential = credential;

        info!(
            "access token refreshed, valid for {}s",
            grant.expires_in.as_secs()
        );

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror
                .update_stored_credentials(
                    &access_token.token,
                    self.credential.refresh_token.as_deref(),
                    expires_at,
                )
                .await
            {
                warn!("could not mirror the refreshed credentials: {e}");
            }
        }

        Ok(access_token)
    }
}
