//! Turns track changes into recorded listens.
//!
//! The recorder consumes the poller's snapshot stream and records one
//! listen per track change. Its deduplication key is the last track it
//! actually recorded, not the last snapshot it saw, so pauses, dropped
//! devices and polling gaps collapse into nothing:
//!
//! * Repeated snapshots of the same track record once
//! * An idle poll between two snapshots of the same track records once
//! * Seeking or restarting the same track records nothing new
//!
//! A listen needs a location fix and a user id. Missing either skips the
//! listen without retrying it later; a listen is tied to the moment the
//! track change was observed and has no meaning minutes after the fact.
//!
//! Writes to the listen sink retry a few times with backoff and are then
//! dropped with an error log. One unreachable backend must not wedge the
//! snapshot stream.

use std::{sync::Arc, time::Duration};

use exponential_backoff::Backoff;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{BackendSession, ListenEvent, ListenSink, LocationProvider},
    snapshot::PlaybackSnapshot,
};

/// Records a listen for every observed track change.
pub struct Recorder {
    /// Observations from the poller.
    snapshots: broadcast::Receiver<Option<PlaybackSnapshot>>,

    /// Source of the listener's position.
    location: Arc<dyn LocationProvider>,

    /// Destination for listen events.
    listens: Arc<dyn ListenSink>,

    /// Backend session, used to resolve the user id when none was
    /// configured explicitly.
    session: Arc<dyn BackendSession>,

    /// Explicitly configured listener id, taking precedence over the
    /// ambient session id.
    owner_id: Option<String>,

    /// The track the last recorded listen was for.
    last_recorded_track_id: Option<String>,

    /// Group cancellation for all engine tasks.
    shutdown: CancellationToken,
}

impl Recorder {
    /// How many times a listen write is attempted before it is dropped.
    const WRITE_ATTEMPTS: u32 = 3;

    /// Shortest delay between write attempts.
    const WRITE_BACKOFF_MIN: Duration = Duration::from_millis(100);

    /// Longest delay between write attempts.
    const WRITE_BACKOFF_MAX: Duration = Duration::from_secs(1);

    /// Creates a recorder over the given channels and sinks.
    #[must_use]
    pub fn new(
        snapshots: broadcast::Receiver<Option<PlaybackSnapshot>>,
        location: Arc<dyn LocationProvider>,
        listens: Arc<dyn ListenSink>,
        session: Arc<dyn BackendSession>,
        owner_id: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            snapshots,
            location,
            listens,
            session,
            owner_id,
            last_recorded_track_id: None,
            shutdown,
        }
    }

    /// Runs the recording loop until cancelled.
    pub async fn run(mut self) {
        debug!("listen recorder started");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                received = self.snapshots.recv() => match received {
                    Ok(Some(snapshot)) => self.observe(snapshot).await,
                    // Idle polls do not forget the last recorded track, so
                    // a pause or dropped device cannot duplicate a listen
                    // when the same track resumes.
                    Ok(None) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("listen recorder lagged by {missed} snapshots");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!("listen recorder stopped");
    }

    /// Handles one playback observation.
    async fn observe(&mut self, snapshot: PlaybackSnapshot) {
        if !snapshot.is_playing {
            return;
        }
        if self.last_recorded_track_id.as_deref() == Some(snapshot.track_id.as_str()) {
            return;
        }

        // Marked before the first await, so snapshots arriving while a
        // slow fix or write is in flight cannot record the track twice.
        self.last_recorded_track_id = Some(snapshot.track_id.clone());

        let Some(fix) = self.location.current_location().await else {
            info!(
                "no location fix, skipping listen for \"{}\"",
                snapshot.track_name
            );
            return;
        };

        let Some(user_id) = self.user_id() else {
            warn!(
                "no user id, skipping listen for \"{}\"",
                snapshot.track_name
            );
            return;
        };

        info!(
            "recording listen: \"{}\" by {}",
            snapshot.track_name,
            snapshot.artist_names.join(", ")
        );

        let event = ListenEvent {
            track_id: snapshot.track_id,
            user_id,
            latitude: fix.latitude,
            longitude: fix.longitude,
            occurred_at: OffsetDateTime::now_utc(),
        };
        self.emit(event).await;
    }

    /// The id to attribute listens to.
    fn user_id(&self) -> Option<String> {
        self.owner_id.clone().or_else(|| self.session.user_id())
    }

    /// Writes one event to the sink, retrying with backoff.
    async fn emit(&self, event: ListenEvent) {
        let backoff = Backoff::new(
            Self::WRITE_ATTEMPTS,
            Self::WRITE_BACKOFF_MIN,
            Self::WRITE_BACKOFF_MAX,
        );

        for duration in &backoff {
            match self.listens.record_listen(&event).await {
                Ok(()) => {
                    debug!("listen recorded for {}", event.track_id);
                    return;
                }
                Err(e) => match duration {
                    Some(duration) => {
                        debug!(
                            "listen write failed, retrying in {:.1}s: {e}",
                            duration.as_secs_f32()
                        );
                        tokio::time::sleep(duration).await;
                    }
                    None => {
                        error!("listen dropped for {}: {e}", event.track_id);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::{Instant, SystemTime},
    };

    use async_trait::async_trait;

    use crate::{
        backend::{GeoFix, HydrationStatus},
        error::{Error, Result},
    };

    struct FixedLocation(Option<GeoFix>);

    #[async_trait]
    impl LocationProvider for FixedLocation {
        async fn current_location(&self) -> Option<GeoFix> {
            self.0
        }
    }

    /// No fix on the first call, a fix on every later call.
    #[derive(Default)]
    struct WarmingLocation {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LocationProvider for WarmingLocation {
        async fn current_location(&self) -> Option<GeoFix> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                None
            } else {
                Some(GeoFix {
                    latitude: 52.4,
                    longitude: 4.9,
                })
            }
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        failures_left: Mutex<u32>,
        events: Mutex<Vec<ListenEvent>>,
    }

    impl CapturingSink {
        fn failing(failures: u32) -> Self {
            Self {
                failures_left: Mutex::new(failures),
                events: Mutex::new(Vec::new()),
            }
        }

        fn track_ids(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|event| event.track_id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ListenSink for CapturingSink {
        async fn record_listen(&self, event: &ListenEvent) -> Result<()> {
            {
                let mut left = self.failures_left.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::unavailable("backend briefly down"));
                }
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct AmbientSession(Option<String>);

    #[async_trait]
    impl BackendSession for AmbientSession {
        fn hydration_status(&self) -> HydrationStatus {
            HydrationStatus::Authenticated
        }

        fn user_id(&self) -> Option<String> {
            self.0.clone()
        }

        async fn sign_in(&self, _email: &str, _auth_secret: &str) -> Result<String> {
            Err(Error::unimplemented("not used in these tests"))
        }
    }

    fn playing(track_id: &str) -> Option<PlaybackSnapshot> {
        Some(PlaybackSnapshot {
            track_id: track_id.to_owned(),
            track_name: format!("Track {track_id}"),
            artist_names: vec!["Artist".to_owned()],
            duration: Duration::from_secs(180),
            position: Duration::from_secs(30),
            is_playing: true,
            has_device: true,
            captured_at: SystemTime::now(),
            captured_instant: Instant::now(),
        })
    }

    struct Fixture {
        snapshots: broadcast::Sender<Option<PlaybackSnapshot>>,
        sink: Arc<CapturingSink>,
        task: tokio::task::JoinHandle<()>,
    }

    impl Fixture {
        fn start(
            location: Arc<dyn LocationProvider>,
            sink: Arc<CapturingSink>,
            session: Arc<dyn BackendSession>,
            owner_id: Option<String>,
        ) -> Self {
            let (snapshots, receiver) = broadcast::channel(16);
            let recorder = Recorder::new(
                receiver,
                location,
                Arc::clone(&sink) as Arc<dyn ListenSink>,
                session,
                owner_id,
                CancellationToken::new(),
            );
            let task = tokio::spawn(recorder.run());
            Self {
                snapshots,
                sink,
                task,
            }
        }

        async fn finish(self) -> Arc<CapturingSink> {
            // Closing the channel lets the recorder drain the queue,
            // retries included, before it stops.
            drop(self.snapshots);
            self.task.await.expect("recorder task");
            self.sink
        }
    }

    #[tokio::test(start_paused = true)]
    async fn records_each_track_change_exactly_once() {
        let fixture = Fixture::start(
            Arc::new(FixedLocation(Some(GeoFix {
                latitude: 1.0,
                longitude: 2.0,
            }))),
            Arc::new(CapturingSink::default()),
            Arc::new(AmbientSession(Some("user-1".to_owned()))),
            None,
        );

        for track in ["a", "a", "a", "b", "b", "a"] {
            fixture.snapshots.send(playing(track)).expect("send");
        }

        let sink = fixture.finish().await;
        assert_eq!(sink.track_ids(), ["a", "b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_polls_do_not_duplicate_the_same_track() {
        let fixture = Fixture::start(
            Arc::new(FixedLocation(Some(GeoFix {
                latitude: 1.0,
                longitude: 2.0,
            }))),
            Arc::new(CapturingSink::default()),
            Arc::new(AmbientSession(Some("user-1".to_owned()))),
            None,
        );

        fixture.snapshots.send(playing("a")).expect("send");
        fixture.snapshots.send(None).expect("send");
        fixture.snapshots.send(playing("a")).expect("send");

        let sink = fixture.finish().await;
        assert_eq!(sink.track_ids(), ["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_snapshots_record_nothing() {
        let fixture = Fixture::start(
            Arc::new(FixedLocation(Some(GeoFix {
                latitude: 1.0,
                longitude: 2.0,
            }))),
            Arc::new(CapturingSink::default()),
            Arc::new(AmbientSession(Some("user-1".to_owned()))),
            None,
        );

        let mut paused = playing("a");
        if let Some(snapshot) = paused.as_mut() {
            snapshot.is_playing = false;
        }
        fixture.snapshots.send(paused).expect("send");

        let sink = fixture.finish().await;
        assert!(sink.track_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fix_drops_the_listen_for_good() {
        let location = Arc::new(WarmingLocation::default());
        let fixture = Fixture::start(
            Arc::clone(&location) as Arc<dyn LocationProvider>,
            Arc::new(CapturingSink::default()),
            Arc::new(AmbientSession(Some("user-1".to_owned()))),
            None,
        );

        // First observation of "a" has no fix yet. The second one is
        // deduplicated, so "a" is never recorded even though a fix is
        // available by then.
        fixture.snapshots.send(playing("a")).expect("send");
        fixture.snapshots.send(playing("a")).expect("send");
        fixture.snapshots.send(playing("b")).expect("send");

        let sink = fixture.finish().await;
        assert_eq!(sink.track_ids(), ["b"]);
        assert_eq!(location.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_owner_wins_over_the_session_user() {
        let fixture = Fixture::start(
            Arc::new(FixedLocation(Some(GeoFix {
                latitude: 1.0,
                longitude: 2.0,
            }))),
            Arc::new(CapturingSink::default()),
            Arc::new(AmbientSession(Some("ambient".to_owned()))),
            Some("configured".to_owned()),
        );

        fixture.snapshots.send(playing("a")).expect("send");

        let sink = fixture.finish().await;
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "configured");
    }

    #[tokio::test(start_paused = true)]
    async fn session_user_fills_in_when_no_owner_is_configured() {
        let fixture = Fixture::start(
            Arc::new(FixedLocation(Some(GeoFix {
                latitude: 1.0,
                longitude: 2.0,
            }))),
            Arc::new(CapturingSink::default()),
            Arc::new(AmbientSession(Some("ambient".to_owned()))),
            None,
        );

        fixture.snapshots.send(playing("a")).expect("send");

        let sink = fixture.finish().await;
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "ambient");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_write_failures_are_retried() {
        let fixture = Fixture::start(
            Arc::new(FixedLocation(Some(GeoFix {
                latitude: 1.0,
                longitude: 2.0,
            }))),
            Arc::new(CapturingSink::failing(2)),
            Arc::new(AmbientSession(Some("user-1".to_owned()))),
            None,
        );

        fixture.snapshots.send(playing("a")).expect("send");

        let sink = fixture.finish().await;
        assert_eq!(sink.track_ids(), ["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_dead_sink_drops_the_listen_but_not_the_stream() {
        let fixture = Fixture::start(
            Arc::new(FixedLocation(Some(GeoFix {
                latitude: 1.0,
                longitude: 2.0,
            }))),
            Arc::new(CapturingSink::failing(3)),
            Arc::new(AmbientSession(Some("user-1".to_owned()))),
            None,
        );

        fixture.snapshots.send(playing("a")).expect("send");
        fixture.snapshots.send(playing("b")).expect("send");

        let sink = fixture.finish().await;
        assert_eq!(sink.track_ids(), ["b"]);
    }
}
