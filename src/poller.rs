//! The single playback poller.
//!
//! One poller task polls the Web API for playback state and broadcasts
//! [`PlaybackSnapshot`]s to every consumer: the progress ticker, the
//! listen recorder, the activity tracker and any embedder subscription.
//! Consumers never poll on their own, so the provider sees exactly one
//! request stream regardless of how many features observe playback.
//!
//! # Cadence
//!
//! Scheduling lives in [`Cadence`], a pure state machine fed with the
//! outcome of each poll:
//!
//! * Successful polls, including "nothing playing", repeat at 10 s
//! * Missing authorization retries at 5 s, and after three consecutive
//!   denials slows to 30 s until a token shows up
//! * Transport failures retry after a jittered 10-15 s so restarts do not
//!   synchronize against the API
//!
//! A poke through the shared [`Notify`] cuts the current wait short; the
//! progress ticker uses it when a track is about to end so track changes
//! are observed promptly.

use std::{sync::Arc, time::Duration};

use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ErrorKind, snapshot::PlaybackSnapshot, spotify::Spotify, status::Status,
};

/// Outcome of one poll, as far as scheduling cares.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PollOutcome {
    /// A snapshot or an idle observation was published.
    Published,
    /// No valid access token was available.
    TokenDenied,
    /// The poll failed in transport or with an unexpected status.
    Failed,
}

/// Pure scheduling state for the poller.
///
/// Holds no clocks and does no waiting; it only answers how long to wait
/// until the next poll given what the last one did.
#[derive(Debug, Default)]
pub struct Cadence {
    /// Consecutive polls denied for lack of a token.
    consecutive_token_denials: u32,
}

impl Cadence {
    /// Delay between successful polls.
    pub const NORMAL: Duration = Duration::from_secs(10);

    /// Delay after a token denial, while a refresh may still succeed.
    pub const TOKEN_RETRY: Duration = Duration::from_secs(5);

    /// Delay once token denials look persistent.
    pub const TOKEN_STARVED: Duration = Duration::from_secs(30);

    /// Token denials tolerated at the fast retry pace.
    pub const TOKEN_RETRY_LIMIT: u32 = 3;

    /// Shortest delay after a transport failure.
    const FAILURE_FLOOR: Duration = Duration::from_secs(10);

    /// Random spread added on top of the failure floor, in milliseconds.
    const FAILURE_JITTER_MS: u64 = 5_000;

    /// The delay until the next poll, given the last outcome.
    pub fn next_delay(&mut self, outcome: PollOutcome) -> Duration {
        match outcome {
            PollOutcome::Published => {
                self.consecutive_token_denials = 0;
                Self::NORMAL
            }
            PollOutcome::TokenDenied => {
                self.consecutive_token_denials = self.consecutive_token_denials.saturating_add(1);
                if self.consecutive_token_denials >= Self::TOKEN_RETRY_LIMIT {
                    Self::TOKEN_STARVED
                } else {
                    Self::TOKEN_RETRY
                }
            }
            PollOutcome::Failed => {
                self.consecutive_token_denials = 0;
                Self::FAILURE_FLOOR
                    + Duration::from_millis(fastrand::u64(0..=Self::FAILURE_JITTER_MS))
            }
        }
    }
}

/// Polls playback state and broadcasts snapshots.
pub struct Poller {
    /// Web API client.
    spotify: Arc<Spotify>,

    /// Broadcast of observations; `None` means nothing is playing.
    snapshots: broadcast::Sender<Option<PlaybackSnapshot>>,

    /// Engine status for foreground surfaces.
    status: watch::Sender<Status>,

    /// Pokes that cut the current wait short.
    poke: Arc<Notify>,

    /// Group cancellation for all engine tasks.
    shutdown: CancellationToken,
}

impl Poller {
    /// Snapshot broadcast capacity.
    ///
    /// Consumers handle observations quickly; a small buffer only needs to
    /// absorb scheduling hiccups.
    pub const CHANNEL_CAPACITY: usize = 16;

    /// Creates a poller publishing on the given channels.
    #[must_use]
    pub fn new(
        spotify: Arc<Spotify>,
        snapshots: broadcast::Sender<Option<PlaybackSnapshot>>,
        status: watch::Sender<Status>,
        poke: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            spotify,
            snapshots,
            status,
            poke,
            shutdown,
        }
    }

    /// Runs the poll loop until cancelled.
    pub async fn run(self) {
        debug!("playback poller started");
        let mut cadence = Cadence::default();

        loop {
            let outcome = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };

            let delay = cadence.next_delay(outcome);
            trace!("next poll in {:.1}s", delay.as_secs_f32());

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = self.poke.notified() => debug!("early poll requested"),
                () = tokio::time::sleep(delay) => {}
            }
        }

        debug!("playback poller stopped");
    }

    /// Polls once, publishes what it saw and reports the outcome.
    async fn poll_once(&self) -> PollOutcome {
        match self.spotify.player_state().await {
            Ok(Some(state)) => {
                let snapshot = PlaybackSnapshot::from_state(&state);
                match &snapshot {
                    Some(snapshot) => {
                        trace!(
                            "observed {} at {:.0}s",
                            snapshot.track_id,
                            snapshot.position.as_secs_f32()
                        );
                        self.publish_status(Status::Monitoring {
                            track: snapshot.track_name.clone(),
                        });
                    }
                    None => {
                        // A state without an identifiable track counts as idle.
                        self.publish_status(Status::NoActiveDevice);
                    }
                }
                let _ = self.snapshots.send(snapshot);
                PollOutcome::Published
            }
            Ok(None) => {
                trace!("nothing is playing");
                self.publish_status(Status::NoActiveDevice);
                let _ = self.snapshots.send(None);
                PollOutcome::Published
            }
            Err(e) if e.kind == ErrorKind::Unauthenticated => {
                warn!("poll skipped: {e}");
                self.publish_status(Status::ReauthRequired);
                PollOutcome::TokenDenied
            }
            Err(e) => {
                warn!("poll failed: {e}");
                self.publish_status(Status::ConnectionIssue);
                PollOutcome::Failed
            }
        }
    }

    /// Publishes a status change, skipping watchers when nothing changed.
    fn publish_status(&self, next: Status) {
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    use tokio::sync::Mutex;
    use url::Url;

    use crate::{
        config::Config, credentials::Credential, secrets::Secrets, store::CredentialStore,
        tokens::TokenManager,
    };

    #[test]
    fn successful_polls_run_at_the_normal_cadence() {
        let mut cadence = Cadence::default();
        assert_eq!(cadence.next_delay(PollOutcome::Published), Cadence::NORMAL);
        assert_eq!(cadence.next_delay(PollOutcome::Published), Cadence::NORMAL);
    }

    #[test]
    fn persistent_token_denials_slow_down() {
        let mut cadence = Cadence::default();

        // Two retries at the fast pace, then the starved pace holds.
        assert_eq!(
            cadence.next_delay(PollOutcome::TokenDenied),
            Cadence::TOKEN_RETRY
        );
        assert_eq!(
            cadence.next_delay(PollOutcome::TokenDenied),
            Cadence::TOKEN_RETRY
        );
        assert_eq!(
            cadence.next_delay(PollOutcome::TokenDenied),
            Cadence::TOKEN_STARVED
        );
        assert_eq!(
            cadence.next_delay(PollOutcome::TokenDenied),
            Cadence::TOKEN_STARVED
        );
    }

    #[test]
    fn a_successful_poll_resets_the_denial_count() {
        let mut cadence = Cadence::default();
        cadence.next_delay(PollOutcome::TokenDenied);
        cadence.next_delay(PollOutcome::TokenDenied);
        cadence.next_delay(PollOutcome::Published);

        assert_eq!(
            cadence.next_delay(PollOutcome::TokenDenied),
            Cadence::TOKEN_RETRY
        );
    }

    #[test]
    fn a_transport_failure_breaks_the_denial_streak() {
        let mut cadence = Cadence::default();
        cadence.next_delay(PollOutcome::TokenDenied);
        cadence.next_delay(PollOutcome::TokenDenied);
        cadence.next_delay(PollOutcome::Failed);

        assert_eq!(
            cadence.next_delay(PollOutcome::TokenDenied),
            Cadence::TOKEN_RETRY
        );
    }

    #[test]
    fn transport_failures_are_jittered_between_ten_and_fifteen_seconds() {
        let mut cadence = Cadence::default();
        for _ in 0..100 {
            let delay = cadence.next_delay(PollOutcome::Failed);
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs(15));
        }
    }

    fn test_poller(
        server: &mockito::ServerGuard,
        shutdown: CancellationToken,
    ) -> (
        Poller,
        broadcast::Receiver<Option<PlaybackSnapshot>>,
        watch::Receiver<Status>,
        Arc<Notify>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = Config::with_secrets(Secrets {
            client_id: "id".to_owned(),
            client_secret: "secret".to_owned(),
        });
        config.data_dir = dir.path().to_path_buf();
        config.api_url = Url::parse(&server.url()).expect("server url");
        config.auth_url = Url::parse(&server.url()).expect("server url");

        let store = Arc::new(CredentialStore::open(&config).expect("store"));
        store
            .save_credential(&Credential {
                access_token: Some("a1".to_owned()),
                refresh_token: Some("r1".to_owned()),
                expires_at: SystemTime::now() + Duration::from_secs(3600),
                owner_id: Some("user-1".to_owned()),
                owner_email: None,
                auth_secret: None,
            })
            .expect("seed");

        let tokens = Arc::new(Mutex::new(
            TokenManager::new(&config, store, None).expect("manager"),
        ));
        let spotify = Arc::new(Spotify::new(&config, tokens).expect("client"));

        let (snapshots_tx, snapshots) = broadcast::channel(Poller::CHANNEL_CAPACITY);
        let (status_tx, status) = watch::channel(Status::default());
        let poke = Arc::new(Notify::new());
        let poller = Poller::new(
            spotify,
            snapshots_tx,
            status_tx,
            Arc::clone(&poke),
            shutdown,
        );
        (poller, snapshots, status, poke, dir)
    }

    #[tokio::test]
    async fn idle_polls_publish_none_and_pokes_poll_early() {
        let mut server = mockito::Server::new_async().await;
        let endpoint = server
            .mock("GET", "/me/player")
            .with_status(204)
            .expect_at_least(2)
            .create_async()
            .await;

        let shutdown = CancellationToken::new();
        let (poller, mut snapshots, status, poke, _dir) =
            test_poller(&server, shutdown.clone());
        let task = tokio::spawn(poller.run());

        let first = tokio::time::timeout(Duration::from_secs(5), snapshots.recv())
            .await
            .expect("first poll")
            .expect("receive");
        assert!(first.is_none());
        assert_eq!(*status.borrow(), Status::NoActiveDevice);

        // The normal cadence is 10 s; a second snapshot this soon can only
        // come from the poke.
        poke.notify_one();
        tokio::time::timeout(Duration::from_secs(5), snapshots.recv())
            .await
            .expect("poked poll")
            .expect("receive");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("stop")
            .expect("join");
        endpoint.assert_async().await;
    }
}
