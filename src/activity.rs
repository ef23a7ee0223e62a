//! Live listening-activity flag.
//!
//! The tracker mirrors "is this user listening right now" to the backend.
//! It is edge-triggered: only transitions between active and inactive are
//! written, so steady playback does not hammer the backend once per poll.
//!
//! Unlike listens, activity is not deduplicated across idle gaps. Playing
//! the same track around a pause flips the flag off and on again, because
//! the flag describes the present rather than history.
//!
//! Writes are best-effort. A failed write is logged and the tracker moves
//! on; the flag self-corrects on the next transition.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{ActivitySink, BackendSession},
    snapshot::PlaybackSnapshot,
};

/// Mirrors the listener's activity flag to the backend.
pub struct Tracker {
    /// Observations from the poller.
    snapshots: broadcast::Receiver<Option<PlaybackSnapshot>>,

    /// Destination for the activity flag.
    sink: Arc<dyn ActivitySink>,

    /// Backend session, used to resolve the user id when none was
    /// configured explicitly.
    session: Arc<dyn BackendSession>,

    /// Explicitly configured listener id, taking precedence over the
    /// ambient session id.
    owner_id: Option<String>,

    /// The last state written, to suppress repeats.
    was_active: bool,

    /// Group cancellation for all engine tasks.
    shutdown: CancellationToken,
}

impl Tracker {
    /// Creates a tracker over the given channel and sink.
    #[must_use]
    pub fn new(
        snapshots: broadcast::Receiver<Option<PlaybackSnapshot>>,
        sink: Arc<dyn ActivitySink>,
        session: Arc<dyn BackendSession>,
        owner_id: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            snapshots,
            sink,
            session,
            owner_id,
            was_active: false,
            shutdown,
        }
    }

    /// Runs the tracking loop until cancelled.
    pub async fn run(mut self) {
        debug!("activity tracker started");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                received = self.snapshots.recv() => match received {
                    Ok(snapshot) => self.observe(snapshot.as_ref()).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("activity tracker lagged by {missed} snapshots");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        // Final write, so a stopped engine does not leave the listener
        // flagged active until someone else clears it.
        if self.was_active {
            self.write(false).await;
        }

        debug!("activity tracker stopped");
    }

    /// Handles one playback observation.
    async fn observe(&mut self, snapshot: Option<&PlaybackSnapshot>) {
        let active = snapshot.is_some_and(|snapshot| snapshot.is_playing);
        if active == self.was_active {
            return;
        }

        self.was_active = active;
        self.write(active).await;
    }

    /// Writes the flag, best-effort.
    async fn write(&self, active: bool) {
        let Some(user_id) = self.owner_id.clone().or_else(|| self.session.user_id()) else {
            debug!("no user id, skipping activity update");
            return;
        };

        match self.sink.set_active(&user_id, active).await {
            Ok(()) => debug!(
                "listener {user_id} marked {}",
                if active { "active" } else { "inactive" }
            ),
            Err(e) => warn!("failed to set activity to {active}: {e}"),
        }
    }
}
