//! Local playback progress between polls.
//!
//! Polling every ten seconds is too coarse for a progress display, so the
//! engine projects the position locally: every snapshot rebases a linear
//! projection, and a one-second ticker publishes the projected position
//! on a watch channel.
//!
//! The projection is deliberately simple:
//!
//! * Positions advance linearly from the last observed position
//! * Positions clamp at the track duration and never run past it
//! * A paused or idle observation clears the published progress
//!
//! When the projection reaches the end of the track the ticker pokes the
//! poller once, so the following track is observed within a poll round
//! trip instead of up to ten seconds late.
//!
//! [`Interpolator`] holds no clocks and is fully deterministic; the
//! [`Ticker`] owns all timing.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    sync::{broadcast, watch, Notify},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::snapshot::PlaybackSnapshot;

/// A locally projected playback position.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Progress {
    /// Projected position within the track.
    pub position: Duration,

    /// Total length of the track.
    pub duration: Duration,

    /// When the projection was computed.
    pub as_of: Instant,
}

/// Linear projection state between snapshots.
#[derive(Debug, Default)]
pub struct Interpolator {
    /// The observation the projection runs from, if any.
    base: Option<Base>,
}

#[derive(Debug)]
struct Base {
    position: Duration,
    duration: Duration,
    captured: Instant,
    playing: bool,
    end_announced: bool,
}

impl Interpolator {
    /// Rebases the projection on a fresh observation.
    ///
    /// `None` means nothing is playing and clears the projection.
    pub fn rebase(&mut self, snapshot: Option<&PlaybackSnapshot>) {
        self.base = snapshot.map(|snapshot| Base {
            position: snapshot.position,
            duration: snapshot.duration,
            captured: snapshot.captured_instant,
            playing: snapshot.is_playing,
            end_announced: false,
        });
    }

    /// The projected position at `now`.
    ///
    /// Returns `None` while paused or idle; a paused track holds its
    /// position and has nothing to project.
    #[must_use]
    pub fn at(&self, now: Instant) -> Option<Progress> {
        let base = self.base.as_ref()?;
        if !base.playing {
            return None;
        }

        let elapsed = now.saturating_duration_since(base.captured);
        Some(Progress {
            position: (base.position + elapsed).min(base.duration),
            duration: base.duration,
            as_of: now,
        })
    }

    /// Whether the playing track is projected to have ended.
    ///
    /// Answers `true` at most once per rebase, so one ending track causes
    /// one early poll rather than one per tick.
    pub fn track_end_reached(&mut self, now: Instant) -> bool {
        let Some(base) = self.base.as_mut() else {
            return false;
        };
        if !base.playing || base.end_announced || base.duration.is_zero() {
            return false;
        }

        let elapsed = now.saturating_duration_since(base.captured);
        if base.position + elapsed >= base.duration {
            base.end_announced = true;
            true
        } else {
            false
        }
    }
}

/// Publishes projected progress once a second.
pub struct Ticker {
    /// Projection state.
    interpolator: Interpolator,

    /// Observations from the poller.
    snapshots: broadcast::Receiver<Option<PlaybackSnapshot>>,

    /// Published progress; `None` while paused or idle.
    progress: watch::Sender<Option<Progress>>,

    /// Poke handle to request an early poll at track end.
    poke: Arc<Notify>,

    /// Group cancellation for all engine tasks.
    shutdown: CancellationToken,
}

impl Ticker {
    /// How often the projected position is published.
    pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

    /// Creates a ticker over the given channels.
    #[must_use]
    pub fn new(
        snapshots: broadcast::Receiver<Option<PlaybackSnapshot>>,
        progress: watch::Sender<Option<Progress>>,
        poke: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            interpolator: Interpolator::default(),
            snapshots,
            progress,
            poke,
            shutdown,
        }
    }

    /// Runs the tick loop until cancelled.
    pub async fn run(mut self) {
        debug!("progress ticker started");

        let mut tick = tokio::time::interval(Self::TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                received = self.snapshots.recv() => match received {
                    Ok(snapshot) => {
                        self.interpolator.rebase(snapshot.as_ref());
                        let _ = self.progress.send(self.interpolator.at(Self::now()));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("progress ticker lagged by {missed} snapshots");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tick.tick() => {
                    let now = Self::now();
                    if let Some(progress) = self.interpolator.at(now) {
                        let _ = self.progress.send(Some(progress));
                    }
                    if self.interpolator.track_end_reached(now) {
                        debug!("track is about to end, requesting an early poll");
                        self.poke.notify_one();
                    }
                }
            }
        }

        debug!("progress ticker stopped");
    }

    /// The current instant on Tokio's clock, which tests can pause.
    fn now() -> Instant {
        tokio::time::Instant::now().into_std()
    }
}
