//! Playback state response types for the Web API.
//!
//! The `me/player` endpoint reports what the account is currently playing
//! across all of its devices. A `200 OK` carries the state below; a
//! `204 No Content` means no device is active and carries no body.
//!
//! # Example Response
//!
//! ```json
//! {
//!     "device": {
//!         "id": "74ba3de1",
//!         "is_active": true,
//!         "name": "Living Room"
//!     },
//!     "progress_ms": 42917,
//!     "is_playing": true,
//!     "item": {
//!         "id": "11dFghVXANMlKmJXsNCbNl",
//!         "name": "Cut To The Feeling",
//!         "duration_ms": 207959,
//!         "artists": [{ "name": "Carly Rae Jepsen" }]
//!     }
//! }
//! ```
//!
//! # Note
//!
//! Fields the engine does not use are not modeled; unknown fields are
//! ignored during deserialization. `item` and its `id` may be null for
//! local files or podcast content, which the engine treats as nothing
//! playing.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};

/// Playback state of the account, as reported by `me/player`.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct PlayerState {
    /// The device playback currently targets.
    #[serde(default)]
    pub device: Option<Device>,

    /// Position within the current item.
    ///
    /// May run ahead of the item duration when the provider's clock and
    /// the report lag disagree.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default)]
    pub progress_ms: Option<Duration>,

    /// Whether playback is running, as opposed to paused.
    #[serde(default)]
    pub is_playing: bool,

    /// The item being played, absent between tracks or for private
    /// sessions.
    #[serde(default)]
    pub item: Option<Item>,
}

/// The device playback targets.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Device {
    /// Device identifier, absent for restricted devices.
    #[serde(default)]
    pub id: Option<String>,

    /// Whether this device is the active playback target.
    #[serde(default)]
    pub is_active: bool,

    /// Human-readable device name.
    #[serde(default)]
    pub name: String,
}

/// A playable item, usually a track.
#[serde_as]
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Item {
    /// Catalog identifier, null for local files.
    #[serde(default)]
    pub id: Option<String>,

    /// Display name of the item.
    #[serde(default)]
    pub name: String,

    /// Total length of the item.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default, rename = "duration_ms")]
    pub duration: Duration,

    /// Contributing artists in display order.
    #[serde(default)]
    pub artists: Vec<Artist>,
}

/// An artist credited on an item.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Artist {
    /// Display name of the artist.
    #[serde(default)]
    pub name: String,
}
