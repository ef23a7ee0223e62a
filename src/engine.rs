//! Assembly of the background synchronization engine.
//!
//! [`Engine::start`] bootstraps the backend session, opens the credential
//! store and spawns the long-running tasks:
//!
//! * the [`Poller`](crate::poller::Poller), which observes playback and
//!   broadcasts snapshots,
//! * the [`Ticker`](crate::progress::Ticker), which projects progress
//!   between polls,
//! * the [`Recorder`](crate::recorder::Recorder), which records listens
//!   on track changes,
//! * the [`Tracker`](crate::activity::Tracker), which mirrors the live
//!   activity flag.
//!
//! The tasks share one broadcast channel and one cancellation token. The
//! engine owns both; [`Engine::stop`] cancels the token and waits for
//! every task to wind down, which includes the tracker's final inactive
//! write.

use std::sync::Arc;

use tokio::{
    sync::{broadcast, watch, Mutex, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    activity,
    backend::{ActivitySink, BackendSession, CredentialSink, ListenSink, LocationProvider},
    bootstrap::{Bootstrapper, SessionOutcome},
    config::Config,
    error::Result,
    poller::Poller,
    progress::{self, Ticker},
    recorder::Recorder,
    snapshot::PlaybackSnapshot,
    spotify::Spotify,
    status::Status,
    store::CredentialStore,
    tokens::TokenManager,
};

/// Everything the embedding application plugs into the engine.
#[derive(Clone)]
pub struct Collaborators {
    /// The backend client's session.
    pub session: Arc<dyn BackendSession>,

    /// Source of the listener's position.
    pub location: Arc<dyn LocationProvider>,

    /// Durable destination for listen events.
    pub listens: Arc<dyn ListenSink>,

    /// Destination for the live activity flag.
    pub activity: Arc<dyn ActivitySink>,

    /// Optional mirror for refreshed credentials.
    pub credentials: Option<Arc<dyn CredentialSink>>,
}

/// A running synchronization engine.
pub struct Engine {
    /// Snapshot broadcast, for late subscribers.
    snapshots: broadcast::Sender<Option<PlaybackSnapshot>>,

    /// Engine status for foreground surfaces.
    status: watch::Receiver<Status>,

    /// Locally projected progress.
    progress: watch::Receiver<Option<progress::Progress>>,

    /// Web API client, shared with the poller.
    spotify: Arc<Spotify>,

    /// How the session bootstrap settled.
    outcome: SessionOutcome,

    /// Cancels every engine task.
    shutdown: CancellationToken,

    /// The spawned engine tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Bootstraps the session and starts the engine tasks.
    ///
    /// Returns once the session bootstrap has settled and every task is
    /// running. The engine runs until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns error if the credential store cannot be opened or the
    /// HTTP clients cannot be created. A failed session bootstrap is not
    /// an error; the engine then runs without a user id and skips what
    /// it cannot attribute.
    pub async fn start(config: &Config, collaborators: Collaborators) -> Result<Self> {
        let store = Arc::new(CredentialStore::open(config)?);
        let shutdown = CancellationToken::new();

        let outcome = Bootstrapper::new(Arc::clone(&collaborators.session), Arc::clone(&store))
            .run(&shutdown)
            .await;
        info!("session bootstrap: {outcome}");

        let tokens = TokenManager::new(config, store, collaborators.credentials.clone())?;
        let spotify = Arc::new(Spotify::new(config, Arc::new(Mutex::new(tokens)))?);

        let (snapshots, _) = broadcast::channel(Poller::CHANNEL_CAPACITY);
        let (status_tx, status) = watch::channel(Status::default());
        let (progress_tx, progress) = watch::channel(None);
        let poke = Arc::new(Notify::new());

        let owner_id = outcome.user_id().map(ToOwned::to_owned);

        // Subscriptions are taken before the poller runs so no task can
        // miss the first snapshot.
        let ticker = Ticker::new(
            snapshots.subscribe(),
            progress_tx,
            Arc::clone(&poke),
            shutdown.clone(),
        );
        let recorder = Recorder::new(
            snapshots.subscribe(),
            collaborators.location,
            collaborators.listens,
            Arc::clone(&collaborators.session),
            owner_id.clone(),
            shutdown.clone(),
        );
        let tracker = activity::Tracker::new(
            snapshots.subscribe(),
            collaborators.activity,
            collaborators.session,
            owner_id,
            shutdown.clone(),
        );
        let poller = Poller::new(
            Arc::clone(&spotify),
            snapshots.clone(),
            status_tx,
            poke,
            shutdown.clone(),
        );

        let tasks = vec![
            tokio::spawn(poller.run()),
            tokio::spawn(ticker.run()),
            tokio::spawn(recorder.run()),
            tokio::spawn(tracker.run()),
        ];

        Ok(Self {
            snapshots,
            status,
            progress,
            spotify,
            outcome,
            shutdown,
            tasks,
        })
    }

    /// Subscribes to playback observations.
    ///
    /// `None` observations mean nothing is playing. The subscription only
    /// sees snapshots published after it was taken.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Option<PlaybackSnapshot>> {
        self.snapshots.subscribe()
    }

    /// A watch over the engine status line.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// A watch over locally projected progress.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Option<progress::Progress>> {
        self.progress.clone()
    }

    /// How the session bootstrap settled.
    #[must_use]
    pub fn session_outcome(&self) -> &SessionOutcome {
        &self.outcome
    }

    /// Playback controls on the user's active device.
    #[must_use]
    pub fn controls(&self) -> &Spotify {
        &self.spotify
    }

    /// Stops every engine task and waits for them to finish.
    ///
    /// The activity tracker clears an active flag on the way out, so a
    /// stop during playback does not leave the listener flagged active.
    pub async fn stop(self) {
        info!("stopping engine");
        self.shutdown.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("engine task failed: {e}");
            }
        }

        debug!("engine stopped");
    }
}
