//! Seams between the engine and its embedding application.
//!
//! The engine never talks to the listen backend directly. The embedding
//! application supplies implementations of the traits in this module and
//! the engine calls through them, which keeps the engine testable and the
//! backend swappable.
//!
//! All traits are object-safe and taken as `Arc<dyn ...>` so one
//! implementation can serve several engine tasks at once.

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampSeconds};
use time::OffsetDateTime;

use crate::error::Result;

/// A resolved geographic position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

/// A single listen: who heard what, where and when.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListenEvent {
    /// Catalog identifier of the track.
    pub track_id: String,

    /// Stable identifier of the listener.
    pub user_id: String,

    /// Latitude of the listener in decimal degrees.
    pub latitude: f64,

    /// Longitude of the listener in decimal degrees.
    pub longitude: f64,

    /// When the listen happened, as a Unix timestamp in seconds.
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub occurred_at: OffsetDateTime,
}

/// Where the backend session stands while it restores itself.
///
/// Backend clients restore their session from their own storage
/// asynchronously after process start. The bootstrapper polls this status
/// until it settles or a ceiling is reached.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HydrationStatus {
    /// The client has not started restoring yet.
    Unknown,
    /// The client is restoring a session from its storage.
    LoadingFromStorage,
    /// A session is live.
    Authenticated,
    /// The client finished restoring and found no session.
    Unauthenticated,
}

/// Source of the listener's current position.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// The current position, or `None` when no fix is available.
    ///
    /// A missing fix is not an error: listens without a position are
    /// skipped rather than recorded somewhere wrong.
    async fn current_location(&self) -> Option<GeoFix>;
}

/// Durable destination for listen events.
#[async_trait]
pub trait ListenSink: Send + Sync {
    /// Records one listen.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails; the caller retries with backoff.
    async fn record_listen(&self, event: &ListenEvent) -> Result<()>;
}

/// Destination for the listener's live activity flag.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Marks the listener as actively listening or not.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails; activity writes are best-effort
    /// and the caller does not retry.
    async fn set_active(&self, user_id: &str, active: bool) -> Result<()>;
}

/// Mirror for refreshed credentials.
///
/// Lets the embedding application keep its own copy of the token pair in
/// sync, for example a backend user record shared with other devices.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    /// Receives the token pair after every successful refresh.
    ///
    /// Called after the pair has been persisted locally. Failures are
    /// logged and never fail the refresh.
    ///
    /// # Errors
    ///
    /// Returns error if the mirror write fails.
    async fn update_stored_credentials(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: SystemTime,
    ) -> Result<()>;
}

/// The backend client's session, as far as the engine needs it.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Where session restoration currently stands.
    fn hydration_status(&self) -> HydrationStatus;

    /// Identifier of the signed-in user, if any.
    fn user_id(&self) -> Option<String>;

    /// Signs in with stored email credentials and returns the user id.
    ///
    /// Used as a fallback when session restoration does not produce a
    /// live session in time.
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the credentials or cannot be
    /// reached.
    async fn sign_in(&self, email: &str, auth_secret: &str) -> Result<String>;
}
