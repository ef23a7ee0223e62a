//! Token endpoint response types for the accounts service.
//!
//! The `api/token` endpoint exchanges a refresh token for a fresh access
//! token. Requests authenticate with HTTP Basic client credentials.
//!
//! # Example Response
//!
//! ```json
//! {
//!     "access_token": "NgCXRK...MzYjw",
//!     "token_type": "Bearer",
//!     "scope": "user-read-playback-state",
//!     "expires_in": 3600,
//!     "refresh_token": "NgAagA...Um_SHo"
//! }
//! ```
//!
//! # Note
//!
//! The `refresh_token` field is only present when the service rotates the
//! token. An absent field means the refresh token used for the exchange
//! remains valid and must be kept.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

/// A successful token exchange.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact)]
pub struct Grant {
    /// Fresh bearer token for Web API access.
    #[redact]
    pub access_token: String,

    /// Authorization scheme the token is used with, normally `Bearer`.
    #[serde(default)]
    pub token_type: String,

    /// Scopes the token was granted, space-separated.
    #[serde(default)]
    pub scope: Option<String>,

    /// How long the token remains valid.
    #[serde_as(as = "DurationSeconds<u64, Flexible>")]
    pub expires_in: Duration,

    /// Replacement refresh token, present only on rotation.
    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grant_without_rotation() {
        let body = r#"{
            "access_token": "NgCXRK",
            "token_type": "Bearer",
            "scope": "user-read-playback-state",
            "expires_in": 3600
        }"#;

        let grant: Grant = serde_json::from_str(body).expect("parse");
        assert_eq!(grant.access_token, "NgCXRK");
        assert_eq!(grant.expires_in, Duration::from_secs(3600));
        assert!(grant.refresh_token.is_none());
    }

    #[test]
    fn parses_grant_with_rotation() {
        let body = r#"{
            "access_token": "NgCXRK",
            "expires_in": 3600,
            "refresh_token": "NgAagA"
        }"#;

        let grant: Grant = serde_json::from_str(body).expect("parse");
        assert_eq!(grant.refresh_token.as_deref(), Some("NgAagA"));
    }

    #[test]
    fn debug_output_hides_tokens() {
        let grant: Grant = serde_json::from_str(
            r#"{ "access_token": "sekrit-access", "expires_in": 3600, "refresh_token": "sekrit-refresh" }"#,
        )
        .expect("parse");

        let debug = format!("{grant:?}");
        assert!(!debug.contains("sekrit"));
    }
}
