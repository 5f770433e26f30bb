pub mod sound;
pub mod user;

use serde::Deserialize;

/// `{ "url": ... }` body returned for short-lived playback links.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackLink {
    pub url: String,
}
