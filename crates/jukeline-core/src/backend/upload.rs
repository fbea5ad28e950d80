//! Accepts client-submitted files into a configured upload directory.
//!
//! Grounded on the original system's `upload.go`: bytes arrive from an
//! HTTP handler, get tagged and written under `upload_dir`, and are handed
//! back to the coordinator as a new track. Unlike `local`, the backend
//! does not pre-index anything, so `search` is unsupported.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use super::Backend;
use crate::player::PlayerHandle;
use crate::track::Track;

pub struct UploadBackend {
    upload_dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to write uploaded file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not read tags from uploaded file")]
    Untaggable,
}

impl UploadBackend {
    pub const SOURCE: &'static str = "upload";

    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Writes `bytes` under the upload directory and derives a [`Track`]
    /// from its embedded tags, ready for the coordinator's `add`.
    pub async fn ingest(&self, original_name: &str, bytes: &[u8]) -> Result<Track, UploadError> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let filename = format!("{}.{ext}", Uuid::new_v4());
        let path = self.upload_dir.join(&filename);
        tokio::fs::write(&path, bytes).await?;

        let track = read_tagged_track(&path, &filename, original_name)?;
        Ok(track)
    }
}

fn read_tagged_track(path: &Path, uri: &str, original_name: &str) -> Result<Track, UploadError> {
    use lofty::file::{AudioFile, TaggedFileExt};
    use lofty::probe::Probe;
    use lofty::tag::Accessor;

    let fallback_title = Path::new(original_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| original_name.to_string());

    let tagged = Probe::open(path)
        .and_then(|p| p.read())
        .map_err(|_| UploadError::Untaggable)?;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());

    Ok(match tag {
        Some(tag) => Track::new_detailed(
            tag.title().map(|t| t.into_owned()).unwrap_or(fallback_title),
            tag.artist().map(|t| t.into_owned()).unwrap_or_else(|| "Unknown".to_string()),
            UploadBackend::SOURCE,
            uri,
            tag.album().map(|t| t.into_owned()).unwrap_or_default(),
            tag.year().unwrap_or(0) as i32,
        ),
        None => Track::new(fallback_title, "Unknown", UploadBackend::SOURCE, uri),
    })
}

#[async_trait]
impl Backend for UploadBackend {
    fn source(&self) -> &str {
        Self::SOURCE
    }

    async fn search(&self, _patterns: &HashMap<String, String>) -> Vec<Track> {
        Vec::new()
    }

    async fn play(&self, track: &Track, player: &dyn PlayerHandle) {
        player
            .play_uri(format!("file://{}", self.upload_dir.join(&track.uri).display()))
            .await;
    }

    async fn on_finished(&self, track: &Track) {
        let path = self.upload_dir.join(&track.uri);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            tracing::warn!(uri = %track.uri, %err, "failed to remove finished upload");
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ingest_writes_file_and_returns_track_with_fallback_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let backend = UploadBackend::new(dir.path());
        // Not a real tagged audio file, so tag reading fails and `ingest`
        // propagates `Untaggable` rather than guessing at metadata.
        let result = backend.ingest("song.mp3", b"not really audio").await;
        assert!(matches!(result, Err(UploadError::Untaggable)));
    }

    #[tokio::test]
    async fn search_always_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = UploadBackend::new(dir.path());
        assert!(backend.search(&HashMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn on_finished_removes_the_uploaded_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = UploadBackend::new(dir.path());
        let path = dir.path().join("leftover.bin");
        tokio::fs::write(&path, b"data").await.unwrap();
        let track = Track::new("t", "a", UploadBackend::SOURCE, "leftover.bin");
        backend.on_finished(&track).await;
        assert!(!path.exists());
    }
}
