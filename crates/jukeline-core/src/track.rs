//! The track record: the entity tracks are voted on and queued as.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A queue position handle. `None` means the track is not currently held by
/// the queue (it is either the current-playing track or has been deleted).
pub type QueueHandle = Option<usize>;

/// One playable item, identified by `(source, uri)`.
///
/// `uri` is the track's primary key across the whole server: it must be
/// unique within its source, and in practice is globally unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub year: i32,
    pub source: String,
    pub uri: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub upvoters: HashSet<Uuid>,
    #[serde(default)]
    pub downvoters: HashSet<Uuid>,
    /// Position in the priority queue's backing vector, maintained by the
    /// queue itself on every swap. Never serialized; it is a queue concern,
    /// not a property of the track.
    #[serde(skip)]
    pub index: QueueHandle,
}

impl Track {
    /// Creates a bare track: zero weight, empty voter sets, no metadata.
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        source: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: String::new(),
            year: 0,
            source: source.into(),
            uri: uri.into(),
            weight: 0.0,
            upvoters: HashSet::new(),
            downvoters: HashSet::new(),
            index: None,
        }
    }

    /// Creates a track with full metadata.
    #[allow(clippy::too_many_arguments)]
    pub fn new_detailed(
        title: impl Into<String>,
        artist: impl Into<String>,
        source: impl Into<String>,
        uri: impl Into<String>,
        album: impl Into<String>,
        year: i32,
    ) -> Self {
        let mut track = Self::new(title, artist, source, uri);
        track.album = album.into();
        track.year = year;
        track
    }

    /// Deserializes a client-submitted track from JSON.
    ///
    /// Voter sets are always reinitialized empty regardless of what the
    /// payload contains: a client has no business submitting pre-populated
    /// votes, and trusting the payload here would let a malicious client
    /// forge vote state for an arbitrary subscriber id.
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        let mut track: Track = serde_json::from_slice(bytes)?;
        track.upvoters = HashSet::new();
        track.downvoters = HashSet::new();
        track.index = None;
        Ok(track)
    }

    /// Whether this subscriber currently has an upvote on the track.
    pub fn has_upvote(&self, subscriber: &Uuid) -> bool {
        self.upvoters.contains(subscriber)
    }

    /// Whether this subscriber currently has a downvote on the track.
    pub fn has_downvote(&self, subscriber: &Uuid) -> bool {
        self.downvoters.contains(subscriber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_zero_weight_and_empty_voters() {
        let t = Track::new("A", "Artist", "dummy", "a");
        assert_eq!(t.weight, 0.0);
        assert!(t.upvoters.is_empty());
        assert!(t.downvoters.is_empty());
        assert_eq!(t.index, None);
    }

    #[test]
    fn parse_resets_voter_sets_even_if_present_in_payload() {
        let subscriber = Uuid::new_v4();
        let payload = serde_json::json!({
            "title": "A",
            "artist": "Artist",
            "source": "dummy",
            "uri": "a",
            "weight": 9000.0,
            "upvoters": [subscriber],
        });
        let bytes = serde_json::to_vec(&payload).unwrap();
        let track = Track::parse(&bytes).unwrap();
        assert!(track.upvoters.is_empty());
        assert!(track.downvoters.is_empty());
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(Track::parse(b"not json").is_err());
    }
}
