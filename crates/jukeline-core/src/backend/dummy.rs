//! A small, deterministic catalog used for demos and integration tests.
//!
//! Grounded on the original system's `DummyBackend`: a fixed in-memory
//! catalog with URIs derived from title+artist rather than a real media
//! source.

use std::collections::HashMap;

use async_trait::async_trait;

use super::Backend;
use crate::player::PlayerHandle;
use crate::track::Track;

pub struct DummyBackend {
    catalog: Vec<Track>,
}

impl DummyBackend {
    pub const SOURCE: &'static str = "dummy";

    pub fn new() -> Self {
        Self {
            catalog: vec![
                dummy_track("Lala", "SNFMT"),
                dummy_track("Hobelbank", "MC Wankwichtel"),
            ],
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a deterministic `dummy:<slug>` uri from title and artist so the
/// same pair always resolves to the same track identity.
fn dummy_track(title: &str, artist: &str) -> Track {
    let slug = format!("{title}-{artist}")
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>();
    Track::new(title, artist, DummyBackend::SOURCE, format!("dummy:{slug}"))
}

#[async_trait]
impl Backend for DummyBackend {
    fn source(&self) -> &str {
        Self::SOURCE
    }

    async fn search(&self, patterns: &HashMap<String, String>) -> Vec<Track> {
        let needle = patterns
            .values()
            .next()
            .map(|s| s.to_lowercase())
            .unwrap_or_default();
        if needle.is_empty() {
            return self.catalog.clone();
        }
        self.catalog
            .iter()
            .filter(|t| {
                t.title.to_lowercase().contains(&needle) || t.artist.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    async fn play(&self, track: &Track, player: &dyn PlayerHandle) {
        player.play_uri(track.uri.clone()).await;
    }

    async fn on_finished(&self, _track: &Track) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_with_no_pattern_returns_full_catalog() {
        let backend = DummyBackend::new();
        let results = backend.search(&HashMap::new()).await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn search_filters_by_substring() {
        let backend = DummyBackend::new();
        let mut patterns = HashMap::new();
        patterns.insert("pattern".to_string(), "hobel".to_string());
        let results = backend.search(&patterns).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Hobelbank");
    }

    #[test]
    fn same_title_and_artist_yield_same_uri() {
        let a = dummy_track("A", "B");
        let b = dummy_track("A", "B");
        assert_eq!(a.uri, b.uri);
    }
}
