//! Serves tracks out of a local music directory, walked once at startup.
//!
//! Grounded on the original system's `localBackend.go`: a one-time
//! directory walk builds an in-memory index; `search` matches against it
//! under a read lock; `play` dispatches a `file://` uri.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use walkdir::WalkDir;

use super::Backend;
use crate::player::PlayerHandle;
use crate::track::Track;

const EXCLUDED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "txt", "pdf", "m3u"];

pub struct LocalBackend {
    music_dir: PathBuf,
    tracks: RwLock<HashMap<String, Track>>,
}

impl LocalBackend {
    pub const SOURCE: &'static str = "local";

    /// Walks `music_dir` synchronously and builds the in-memory index.
    /// Called once at startup from the bootstrap composition root.
    pub fn new(music_dir: impl Into<PathBuf>) -> Self {
        let music_dir = music_dir.into();
        let tracks = scan_directory(&music_dir);
        tracing::info!(count = tracks.len(), dir = %music_dir.display(), "indexed local music directory");
        Self {
            music_dir,
            tracks: RwLock::new(tracks),
        }
    }

    pub fn music_dir(&self) -> &Path {
        &self.music_dir
    }

    pub fn track_count(&self) -> usize {
        self.tracks.read().len()
    }
}

fn scan_directory(root: &Path) -> HashMap<String, Track> {
    let mut index = HashMap::new();
    if !root.is_dir() {
        tracing::warn!(dir = %root.display(), "local music directory does not exist; serving an empty catalog");
        return index;
    }

    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if EXCLUDED_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }

        let uri = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        let track = read_tagged_track(path, &uri);
        index.insert(uri, track);
    }
    index
}

fn read_tagged_track(path: &Path, uri: &str) -> Track {
    use lofty::file::{AudioFile, TaggedFileExt};
    use lofty::probe::Probe;
    use lofty::tag::Accessor;

    let fallback_title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| uri.to_string());

    let tagged = match Probe::open(path).and_then(|p| p.read()) {
        Ok(tagged) => tagged,
        Err(_) => return Track::new(fallback_title, "Unknown", LocalBackend::SOURCE, uri),
    };

    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
    match tag {
        Some(tag) => Track::new_detailed(
            tag.title().map(|t| t.into_owned()).unwrap_or(fallback_title),
            tag.artist().map(|t| t.into_owned()).unwrap_or_else(|| "Unknown".to_string()),
            LocalBackend::SOURCE,
            uri,
            tag.album().map(|t| t.into_owned()).unwrap_or_default(),
            tag.year().unwrap_or(0) as i32,
        ),
        None => Track::new(fallback_title, "Unknown", LocalBackend::SOURCE, uri),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn source(&self) -> &str {
        Self::SOURCE
    }

    async fn search(&self, patterns: &HashMap<String, String>) -> Vec<Track> {
        let needle = patterns.values().next().map(|s| s.to_lowercase());
        let tracks = self.tracks.read();
        match needle {
            Some(needle) if !needle.is_empty() => tracks
                .values()
                .filter(|t| {
                    t.title.to_lowercase().contains(&needle) || t.artist.to_lowercase().contains(&needle)
                })
                .cloned()
                .collect(),
            _ => tracks.values().cloned().collect(),
        }
    }

    async fn play(&self, track: &Track, player: &dyn PlayerHandle) {
        player
            .play_uri(format!("file://{}", self.music_dir.join(&track.uri).display()))
            .await;
    }

    async fn on_finished(&self, _track: &Track) {
        // The source file belongs to the music directory; nothing to clean up.
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
