//! Observable engine status for foreground surfaces.
//!
//! The engine publishes one [`Status`] value on a watch channel. Embedders
//! render it wherever they surface background work, for example a
//! persistent notification. The status is observational only: nothing in
//! the engine reads it back.

use std::fmt;

/// What the engine is doing right now.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Status {
    /// The engine is starting up and has not polled yet.
    #[default]
    Initializing,

    /// Playback is being monitored.
    Monitoring {
        /// Display name of the current track.
        track: String,
    },

    /// No device is playing anything.
    NoActiveDevice,

    /// Polling is failing in transport; the engine keeps retrying.
    ConnectionIssue,

    /// No usable authorization; the engine waits for a fresh token pair.
    ReauthRequired,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "starting playback monitoring"),
            Self::Monitoring { track } => write!(f, "monitoring: {track}"),
            Self::NoActiveDevice => write!(f, "no active playback"),
            Self::ConnectionIssue => write!(f, "connection issue, retrying"),
            Self::ReauthRequired => write!(f, "reauthentication required"),
        }
    }
}
