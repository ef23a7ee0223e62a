//! Point-in-time observations of playback state.
//!
//! A [`PlaybackSnapshot`] is the unit that flows from the poller to every
//! consumer: the progress interpolator, the listen recorder and the
//! activity tracker. It is immutable once captured and carries both a wall
//! clock and a monotonic capture time, so consumers can interpolate
//! without being affected by wall clock adjustments.

use std::time::{Duration, Instant, SystemTime};

use crate::protocol::player::PlayerState;

/// An immutable observation of what is playing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlaybackSnapshot {
    /// Catalog identifier of the track.
    pub track_id: String,

    /// Display name of the track.
    pub track_name: String,

    /// Contributing artists in display order.
    pub artist_names: Vec<String>,

    /// Total length of the track.
    pub duration: Duration,

    /// Position within the track at capture time.
    ///
    /// Clamped to the track duration, so it never runs past the end even
    /// when the provider reports otherwise.
    pub position: Duration,

    /// Whether playback was running at capture time.
    pub is_playing: bool,

    /// Whether a playback device was attached at capture time.
    pub has_device: bool,

    /// Wall clock time of capture, for logging and emitted events.
    pub captured_at: SystemTime,

    /// Monotonic time of capture, for interpolation.
    pub captured_instant: Instant,
}

impl PlaybackSnapshot {
    /// Builds a snapshot from a playback state response.
    ///
    /// Returns `None` when the state carries no identifiable track, which
    /// happens between tracks, for local files without a catalog id and
    /// for private sessions. Consumers treat that the same as nothing
    /// playing.
    #[must_use]
    pub fn from_state(state: &PlayerState) -> Option<Self> {
        let item = state.item.as_ref()?;
        let track_id = item.id.clone()?;

        let position = state.progress_ms.unwrap_or_default().min(item.duration);

        Some(Self {
            track_id,
            track_name: item.name.clone(),
            artist_names: item.artists.iter().map(|artist| artist.name.clone()).collect(),
            duration: item.duration,
            position,
            is_playing: state.is_playing,
            has_device: state.device.is_some(),
            captured_at: SystemTime::now(),
            captured_instant: Instant::now(),
        })
    }
}
