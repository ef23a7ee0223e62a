//! Session bootstrap at engine start.
//!
//! The backend client restores its session from its own storage some time
//! after process start. The bootstrapper gives that restoration a bounded
//! head start, then settles on the best identity it can find:
//!
//! 1. Poll the hydration status every 500 ms, up to 20 attempts
//! 2. A live session wins immediately
//! 3. Otherwise try one sign-in with stored email credentials
//! 4. Otherwise fall back to the bare stored identity, or give up
//!
//! The outcome decides how much the engine records: a full session records
//! everything, a bare identity still attributes listens, and no identity
//! disables every write until the owning application signs in again.
//!
//! Bootstrapping consumes the bootstrapper, so it runs exactly once per
//! engine start and concurrent starts cannot race it.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    backend::{BackendSession, HydrationStatus},
    store::CredentialStore,
};

/// How the bootstrap settled.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionOutcome {
    /// A backend session is live.
    Authenticated {
        /// Identifier of the signed-in user.
        user_id: String,
    },

    /// No backend session, but a stored identity still attributes listens.
    Degraded {
        /// Identifier restored from local storage.
        user_id: String,
    },

    /// No session and no stored identity; recording is disabled.
    Unauthenticated,
}

impl SessionOutcome {
    /// The user id this outcome attributes listens to, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated { user_id } | Self::Degraded { user_id } => Some(user_id),
            Self::Unauthenticated => None,
        }
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authenticated { user_id } => write!(f, "authenticated as {user_id}"),
            Self::Degraded { user_id } => write!(f, "recording with stored identity {user_id}"),
            Self::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// Waits out backend session hydration and resolves the identity.
pub struct Bootstrapper {
    /// The backend client's session.
    session: Arc<dyn BackendSession>,

    /// Storage holding the fallback identity.
    store: Arc<CredentialStore>,
}

impl Bootstrapper {
    /// How often the hydration status is polled.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// How many polls before giving up on hydration.
    ///
    /// Together with [`Self::POLL_INTERVAL`] this bounds the wait to ten
    /// seconds; the first poll happens immediately.
    pub const MAX_ATTEMPTS: u32 = 20;

    /// Creates a bootstrapper over the given session and store.
    #[must_use]
    pub fn new(session: Arc<dyn BackendSession>, store: Arc<CredentialStore>) -> Self {
        Self { session, store }
    }

    /// Runs the bootstrap to completion.
    ///
    /// Never fails: every problem degrades the outcome instead of
    /// aborting the engine. Cancellation resolves to
    /// [`SessionOutcome::Unauthenticated`] because a torn down engine
    /// records nothing anyway.
    pub async fn run(self, shutdown: &CancellationToken) -> SessionOutcome {
        info!("waiting for the backend session to hydrate");

        let mut interval = tokio::time::interval(Self::POLL_INTERVAL);
        for attempt in 1..=Self::MAX_ATTEMPTS {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("session bootstrap cancelled");
                    return SessionOutcome::Unauthenticated;
                }
                _ = interval.tick() => {}
            }

            match self.session.hydration_status() {
                HydrationStatus::Authenticated => {
                    debug!("backend session hydrated after {attempt} polls");
                    return self.authenticated();
                }
                HydrationStatus::Unauthenticated => {
                    debug!("backend session reports no stored session");
                    break;
                }
                HydrationStatus::Unknown | HydrationStatus::LoadingFromStorage => {}
            }
        }

        self.fallback().await
    }

    /// Resolves the identity of a live session.
    fn authenticated(&self) -> SessionOutcome {
        let user_id = self.session.user_id().or_else(|| self.stored_owner_id());

        match user_id {
            Some(user_id) => SessionOutcome::Authenticated { user_id },
            None => {
                warn!("backend session is live but exposes no user id");
                SessionOutcome::Unauthenticated
            }
        }
    }

    /// Settles the outcome without a live session.
    async fn fallback(&self) -> SessionOutcome {
        let owner = match self.store.load_owner() {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                info!("no stored identity; recording stays disabled");
                return SessionOutcome::Unauthenticated;
            }
            Err(e) => {
                warn!("could not read the stored identity: {e}");
                return SessionOutcome::Unauthenticated;
            }
        };

        if let (Some(email), Some(secret)) = (&owner.email, &owner.auth_secret) {
            info!("falling back to stored sign-in credentials");
            match self.session.sign_in(email, secret).await {
                Ok(user_id) => {
                    info!("fallback sign-in succeeded");
                    return SessionOutcome::Authenticated { user_id };
                }
                Err(e) => warn!("fallback sign-in failed: {e}"),
            }
        }

        if owner.id.is_empty() {
            return SessionOutcome::Unauthenticated;
        }

        info!("continuing with the stored identity only");
        SessionOutcome::Degraded { user_id: owner.id }
    }

    fn stored_owner_id(&self) -> Option<String> {
        match self.store.load_owner() {
            Ok(owner) => owner.map(|owner| owner.id),
            Err(e) => {
                warn!("could not read the stored identity: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;

    use crate::{
        config::Config,
        credentials::Owner,
        error::{Error, Result},
        secrets::Secrets,
    };

    struct FakeSession {
        /// Statuses reported in order; the last one repeats.
        statuses: Mutex<Vec<HydrationStatus>>,
        final_status: HydrationStatus,
        user_id: Option<String>,
        sign_in_result: Option<std::result::Result<String, ()>>,
        sign_in_calls: AtomicUsize,
    }

    impl FakeSession {
        fn new(final_status: HydrationStatus) -> Self {
            Self {
                statuses: Mutex::new(Vec::new()),
                final_status,
                user_id: None,
                sign_in_result: None,
                sign_in_calls: AtomicUsize::new(0),
            }
        }

        fn with_statuses(mut self, statuses: Vec<HydrationStatus>) -> Self {
            self.statuses = Mutex::new(statuses);
            self
        }

        fn with_user(mut self, user_id: &str) -> Self {
            self.user_id = Some(user_id.to_owned());
            self
        }

        fn with_sign_in(mut self, result: std::result::Result<String, ()>) -> Self {
            self.sign_in_result = Some(result);
            self
        }
    }

    #[async_trait]
    impl BackendSession for FakeSession {
        fn hydration_status(&self) -> HydrationStatus {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.is_empty() {
                self.final_status
            } else {
                statuses.remove(0)
            }
        }

        fn user_id(&self) -> Option<String> {
            self.user_id.clone()
        }

        async fn sign_in(&self, _email: &str, _auth_secret: &str) -> Result<String> {
            self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
            match &self.sign_in_result {
                Some(Ok(user_id)) => Ok(user_id.clone()),
                Some(Err(())) => Err(Error::unauthenticated("bad credentials")),
                None => Err(Error::unimplemented("sign-in not available")),
            }
        }
    }

    fn test_store() -> (Arc<CredentialStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = Config::with_secrets(Secrets {
            client_id: "id".to_owned(),
            client_secret: "secret".to_owned(),
        });
        config.data_dir = dir.path().to_path_buf();
        let store = Arc::new(CredentialStore::open(&config).expect("store"));
        (store, dir)
    }

    fn owner(email: Option<&str>, secret: Option<&str>) -> Owner {
        Owner {
            id: "user-1".to_owned(),
            email: email.map(ToOwned::to_owned),
            auth_secret: secret.map(ToOwned::to_owned),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn live_session_wins_immediately() {
        let (store, _dir) = test_store();
        let session = Arc::new(
            FakeSession::new(HydrationStatus::Authenticated)
                .with_statuses(vec![
                    HydrationStatus::Unknown,
                    HydrationStatus::LoadingFromStorage,
                ])
                .with_user("user-1"),
        );

        let started = tokio::time::Instant::now();
        let outcome = Bootstrapper::new(session, store)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            SessionOutcome::Authenticated {
                user_id: "user-1".to_owned()
            }
        );
        // Two pending polls and one that succeeds: one second of waiting.
        assert!(started.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn hydration_ceiling_is_ten_seconds() {
        let (store, _dir) = test_store();
        store.save_owner(&owner(None, None)).expect("seed owner");
        let session = Arc::new(FakeSession::new(HydrationStatus::LoadingFromStorage));

        let started = tokio::time::Instant::now();
        let outcome = Bootstrapper::new(session, store)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            SessionOutcome::Degraded {
                user_id: "user-1".to_owned()
            }
        );

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(9_500));
        assert!(elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn no_session_triggers_fallback_sign_in() {
        let (store, _dir) = test_store();
        store
            .save_owner(&owner(Some("user@example.com"), Some("s1")))
            .expect("seed owner");
        let session = Arc::new(
            FakeSession::new(HydrationStatus::Unauthenticated)
                .with_sign_in(Ok("user-1".to_owned())),
        );

        let outcome = Bootstrapper::new(Arc::clone(&session) as Arc<dyn BackendSession>, store)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            SessionOutcome::Authenticated {
                user_id: "user-1".to_owned()
            }
        );
        assert_eq!(session.sign_in_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sign_in_degrades_to_stored_identity() {
        let (store, _dir) = test_store();
        store
            .save_owner(&owner(Some("user@example.com"), Some("s1")))
            .expect("seed owner");
        let session =
            Arc::new(FakeSession::new(HydrationStatus::Unauthenticated).with_sign_in(Err(())));

        let outcome = Bootstrapper::new(session, store)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            SessionOutcome::Degraded {
                user_id: "user-1".to_owned()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_stored_resolves_unauthenticated() {
        let (store, _dir) = test_store();
        let session = Arc::new(FakeSession::new(HydrationStatus::Unauthenticated));

        let outcome = Bootstrapper::new(session, store)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(outcome, SessionOutcome::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resolves_unauthenticated() {
        let (store, _dir) = test_store();
        let session = Arc::new(FakeSession::new(HydrationStatus::LoadingFromStorage));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = Bootstrapper::new(session, store).run(&shutdown).await;
        assert_eq!(outcome, SessionOutcome::Unauthenticated);
    }
}
