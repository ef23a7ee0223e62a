//! Authorization state shared between the engine and the credential store.
//!
//! A [`Credential`] is the unit of persistence: the token pair, its expiry
//! and the owning identity travel together and are always replaced as a
//! whole. [`AccessToken`] is the short-lived value handed out to API
//! callers.
//!
//! All secret material is redacted from debug output.

use std::{
    fmt,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use serde_with::{formats::Flexible, serde_as, TimestampSeconds};
use veil::Redact;

/// Stored token pair and owning identity.
///
/// Any field may be absent: a record with only an `owner_id` still
/// identifies who listens on this device even when the tokens are gone.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Redact)]
pub struct Credential {
    /// Bearer token for Web API calls.
    ///
    /// Redacted in debug output.
    #[redact]
    pub access_token: Option<String>,

    /// Long-lived token used to obtain fresh access tokens.
    ///
    /// Redacted in debug output.
    #[redact]
    pub refresh_token: Option<String>,

    /// When the access token expires.
    ///
    /// Stored as a Unix timestamp in seconds.
    #[serde_as(as = "TimestampSeconds<i64, Flexible>")]
    pub expires_at: SystemTime,

    /// Stable identifier of the owning account.
    pub owner_id: Option<String>,

    /// Email address of the owning account, used for fallback sign-in.
    pub owner_email: Option<String>,

    /// Backend sign-in secret paired with the email.
    ///
    /// Redacted in debug output.
    #[redact]
    pub auth_secret: Option<String>,
}

impl Credential {
    /// Safety margin subtracted from the expiry instant.
    ///
    /// A token within five minutes of expiry is treated as stale so it
    /// cannot lapse in the middle of a polling cycle.
    pub const EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

    /// Whether the stored access token is present and not near expiry.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        if self.access_token.is_none() {
            return false;
        }

        // An expiry too close to the epoch cannot carry the buffer and is
        // stale by definition.
        self.expires_at
            .checked_sub(Self::EXPIRY_BUFFER)
            .is_some_and(|deadline| SystemTime::now() < deadline)
    }

    /// The stored access token, if it is still fresh.
    #[must_use]
    pub fn fresh_access_token(&self) -> Option<AccessToken> {
        if !self.is_fresh() {
            return None;
        }

        self.access_token.as_ref().map(|token| AccessToken {
            token: token.clone(),
            expires_at: self.expires_at,
        })
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            expires_at: SystemTime::UNIX_EPOCH,
            owner_id: None,
            owner_email: None,
            auth_secret: None,
        }
    }
}

/// Bare identity of the owning account.
///
/// Persisted separately from the token pair so a usable id survives even
/// when the tokens are cleared or corrupt.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Redact)]
pub struct Owner {
    /// Stable identifier of the account.
    pub id: String,

    /// Email address, used for fallback sign-in.
    pub email: Option<String>,

    /// Backend sign-in secret paired with the email.
    ///
    /// Redacted in debug output.
    #[redact]
    pub auth_secret: Option<String>,
}

/// Short-lived bearer token for Web API calls.
#[derive(Clone, Eq, PartialEq, Redact)]
pub struct AccessToken {
    /// The raw token value.
    ///
    /// Redacted in debug output.
    #[redact]
    pub token: String,

    /// When the token expires.
    pub expires_at: SystemTime,
}

impl AccessToken {
    /// Remaining lifetime of the token, zero if already expired.
    #[must_use]
    pub fn time_to_live(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or_default()
    }
}

/// Formats as the raw token value for use in `Authorization` headers.
impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential_expiring_in(ttl: Duration) -> Credential {
        Credential {
            access_token: Some("token".to_owned()),
            refresh_token: Some("refresh".to_owned()),
            expires_at: SystemTime::now() + ttl,
            ..Credential::default()
        }
    }

    #[test]
    fn token_outside_buffer_is_fresh() {
        let credential = credential_expiring_in(Duration::from_secs(6 * 60));
        assert!(credential.is_fresh());
        assert!(credential.fresh_access_token().is_some());
    }

    #[test]
    fn token_within_buffer_is_stale() {
        let credential = credential_expiring_in(Duration::from_secs(4 * 60));
        assert!(!credential.is_fresh());
        assert!(credential.fresh_access_token().is_none());
    }

    #[test]
    fn token_at_buffer_boundary_is_stale() {
        let credential = credential_expiring_in(Credential::EXPIRY_BUFFER);
        assert!(!credential.is_fresh());
    }

    #[test]
    fn missing_token_is_never_fresh() {
        let credential = Credential {
            expires_at: SystemTime::now() + Duration::from_secs(3600),
            ..Credential::default()
        };
        assert!(!credential.is_fresh());
    }

    #[test]
    fn default_is_stale() {
        assert!(!Credential::default().is_fresh());
    }

    #[test]
    fn debug_output_hides_tokens() {
        let credential = Credential {
            access_token: Some("sekrit-access".to_owned()),
            refresh_token: Some("sekrit-refresh".to_owned()),
            auth_secret: Some("sekrit-password".to_owned()),
            ..Credential::default()
        };

        let debug = format!("{credential:?}");
        assert!(!debug.contains("sekrit"));
    }

    #[test]
    fn roundtrips_through_json() {
        let credential = Credential {
            access_token: Some("a1".to_owned()),
            refresh_token: Some("r1".to_owned()),
            expires_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            owner_id: Some("user-1".to_owned()),
            owner_email: Some("user@example.com".to_owned()),
            auth_secret: Some("s1".to_owned()),
        };

        let json = serde_json::to_string(&credential).expect("serialize");
        let parsed: Credential = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, credential);
    }
}
