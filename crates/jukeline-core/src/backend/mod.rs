//! Backend capability: the uniform interface over pluggable media sources
//! (component 4.D).
//!
//! A track's `source` field is the dispatch key: the player controller
//! looks up the owning backend by that tag whenever it needs to start or
//! finish playback. Backends are stateless from the coordinator's point of
//! view; concurrent `search` calls across backends are expected and safe.

mod dummy;
mod local;
mod upload;

pub use dummy::DummyBackend;
pub use local::LocalBackend;
pub use upload::UploadBackend;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::player::PlayerHandle;
use crate::track::Track;

/// Recognized search pattern keys (`patterns` argument to [`Backend::search`]).
pub const PATTERN_FREE_TEXT: &str = "pattern";
pub const PATTERN_TITLE: &str = "title";
pub const PATTERN_ARTIST: &str = "artist";
pub const PATTERN_ALBUM: &str = "album";

#[async_trait]
pub trait Backend: Send + Sync {
    /// The `source` tag this backend owns, e.g. `"local"`, `"dummy"`.
    fn source(&self) -> &str;

    /// Returns candidate tracks matching `patterns`. A backend with no
    /// opinion on the query returns an empty list; errors are swallowed
    /// here and logged by the implementation, never propagated, so one
    /// failing backend never blocks another's results.
    async fn search(&self, patterns: &HashMap<String, String>) -> Vec<Track>;

    /// Starts playback of one of this backend's own tracks by calling
    /// back into `player` with either `play_uri` or `play_data`.
    async fn play(&self, track: &Track, player: &dyn PlayerHandle);

    /// Invoked after `track` completes playback normally.
    async fn on_finished(&self, track: &Track);

    /// Loads an external playlist reference into a list of tracks.
    /// Optional; backends without playlist support return an empty list.
    async fn load_playlist(&self, _identifier: &str) -> Vec<Track> {
        Vec::new()
    }

    /// Type-erased accessor so callers that need a concrete backend (the
    /// upload route needs the real `UploadBackend` to hand it raw bytes)
    /// can recover it from the registry's `Arc<dyn Backend>` entries.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The player controller's map of backends, keyed by source tag.
pub type BackendRegistry = HashMap<String, Arc<dyn Backend>>;

/// Extracts the free-text / field-scoped patterns a client supplied as
/// query parameters, per the recognized key set in §6.
pub fn recognized_patterns(raw: &HashMap<String, String>) -> HashMap<String, String> {
    [PATTERN_FREE_TEXT, PATTERN_TITLE, PATTERN_ARTIST, PATTERN_ALBUM]
        .into_iter()
        .filter_map(|key| raw.get(key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_patterns_drops_unknown_keys() {
        let mut raw = HashMap::new();
        raw.insert("pattern".to_string(), "abba".to_string());
        raw.insert("bogus".to_string(), "x".to_string());
        let got = recognized_patterns(&raw);
        assert_eq!(got.len(), 1);
        assert_eq!(got.get("pattern").map(String::as_str), Some("abba"));
    }
}
