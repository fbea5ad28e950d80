//! Core coordinator (component 4.F): the single owner of queue state,
//! the playback intent flag, and event-id allocation.
//!
//! Every public operation acquires the write lock at most once, builds
//! whatever event the operation produces while still holding it (so
//! event ids stay ordered with respect to the state transition that
//! produced them), then releases the lock before broadcasting or
//! talking to the player. Grounded on the original system's `Wrms`
//! methods (`AddSong`, `DeleteSong`, `AdjustSongWeight`, `Next`,
//! `PlayPause`, `Search`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::{Backend, BackendRegistry, UploadBackend};
use crate::config::Config;
use crate::constants;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventCounter, EventEmitter, TimeBonusEvent};
use crate::player::{PlaybackObserver, PlayerController, PlayerHandle};
use crate::queue::PriorityQueue;
use crate::track::Track;

/// The three vote operations a subscriber may apply to a queued track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    Up,
    Down,
    Unvote,
}

struct CoordinatorState {
    queue: PriorityQueue,
    current: Option<Track>,
    /// User-facing intent: "the server should be making sound". Independent
    /// of whether a subprocess has actually been spawned for `current`:
    /// whether that subprocess is actually running is `player.playing()`,
    /// not anything tracked here.
    playing: bool,
}

pub struct Coordinator {
    state: RwLock<CoordinatorState>,
    counter: EventCounter,
    connections: Arc<dyn EventEmitter>,
    backends: BackendRegistry,
    player: Arc<PlayerController>,
    config: Arc<Config>,
    admins: DashMap<Uuid, ()>,
}

impl Coordinator {
    /// Builds a bare `Coordinator`. Callers almost always want this inside
    /// an `Arc::new_cyclic` closure (see `bootstrap`), since the player
    /// controller needs a `Weak<Coordinator>` to report finished tracks
    /// back to before the coordinator itself exists as an `Arc`.
    pub fn new(
        connections: Arc<dyn EventEmitter>,
        backends: BackendRegistry,
        player: Arc<PlayerController>,
        config: Arc<Config>,
    ) -> Self {
        let admins = DashMap::new();
        for id in &config.admin_ids {
            admins.insert(*id, ());
        }
        Self {
            state: RwLock::new(CoordinatorState {
                queue: PriorityQueue::new(),
                current: None,
                playing: false,
            }),
            counter: EventCounter::new(),
            connections,
            backends,
            player,
            config,
            admins,
        }
    }

    pub fn is_admin(&self, subscriber: &Uuid) -> bool {
        self.admins.contains_key(subscriber)
    }

    /// Returns the player controller this coordinator dispatches playback
    /// through, for callers (the HTTP layer, shutdown) that need to issue
    /// commands to it directly rather than through a coordinator method.
    pub fn player_handle(&self) -> Arc<PlayerController> {
        Arc::clone(&self.player)
    }

    /// Current event counter value, for stamping private events (search,
    /// finish-search) the same way `catch_up` stamps its own batch: reusing
    /// the counter without incrementing it.
    pub fn current_event_id(&self) -> u64 {
        self.counter.current()
    }

    /// Checks `password` against the configured admin password and, if it
    /// matches, promotes `subscriber` for the remainder of the process.
    pub fn promote_admin(&self, subscriber: Uuid, password: &str) -> CoreResult<()> {
        match &self.config.admin_password {
            Some(expected) if expected == password => {
                self.admins.insert(subscriber, ());
                tracing::info!(%subscriber, "promoted subscriber to admin");
                Ok(())
            }
            _ => Err(CoreError::InvalidAdminToken),
        }
    }

    /// Adds `track` to the queue, applying time-bonus aging first and
    /// auto-advancing the queue if playback was stalled on an empty one.
    pub async fn add(&self, track: Track) {
        let event = {
            let mut state = self.state.write();
            if self.config.time_bonus != 0.0 {
                state.queue.apply_uniform_bonus(self.config.time_bonus);
            }
            let auto_advance = state.playing && state.current.is_none();
            state.queue.push(track.clone());
            let id = self.counter.increment();
            tracing::info!(uri = %track.uri, "added track to queue");
            (Event::new(constants::EVENT_ADD, id, vec![track]), auto_advance)
        };
        let (event, auto_advance) = event;
        self.connections.broadcast(event).await;
        if auto_advance {
            self.next().await;
        }
    }

    /// Hands raw bytes to the upload backend and queues the resulting
    /// track through the normal `add` path. Errors if no backend is
    /// registered under `UploadBackend::SOURCE`, or if the bytes couldn't
    /// be tagged.
    pub async fn ingest_upload(&self, original_name: &str, bytes: &[u8]) -> CoreResult<()> {
        let backend = self
            .backends
            .get(UploadBackend::SOURCE)
            .ok_or_else(|| CoreError::InvalidRequest("upload backend is not enabled".to_string()))?;
        let upload = backend
            .as_any()
            .downcast_ref::<UploadBackend>()
            .ok_or_else(|| CoreError::Internal("upload backend source tag mismatched type".to_string()))?;
        let track = upload
            .ingest(original_name, bytes)
            .await
            .map_err(|err| CoreError::InvalidRequest(err.to_string()))?;
        self.add(track).await;
        Ok(())
    }

    /// Loads every configured playlist identifier by offering it to each
    /// enabled backend in turn; backends without playlist support return
    /// nothing (`Backend::load_playlist`'s default). Every resulting track
    /// is queued through the normal `add` path, so it ages and broadcasts
    /// like any other track. Called once at startup.
    pub async fn load_playlists(&self, identifiers: &[String]) {
        for identifier in identifiers {
            for backend in self.backends.values() {
                let tracks = backend.load_playlist(identifier).await;
                if !tracks.is_empty() {
                    tracing::info!(identifier, count = tracks.len(), source = backend.source(), "loaded playlist");
                }
                for track in tracks {
                    self.add(track).await;
                }
            }
        }
    }

    /// Admin-only: removes a queued track by `uri`. Authorization is the
    /// caller's responsibility (the HTTP layer checks `is_admin` first).
    pub async fn delete(&self, uri: &str) -> CoreResult<()> {
        let event = {
            let mut state = self.state.write();
            let removed = state
                .queue
                .remove_by_uri(uri)
                .ok_or_else(|| CoreError::TrackNotFound(uri.to_string()))?;
            let id = self.counter.increment();
            tracing::info!(%uri, "deleted track from queue");
            Event::new(constants::EVENT_DELETE, id, vec![removed])
        };
        self.connections.broadcast(event).await;
        Ok(())
    }

    /// Applies a vote. Refused votes (already voted, or unvoting a track
    /// with no vote from this subscriber) are logged and otherwise
    /// invisible: no event, no counter increment, no error returned.
    pub async fn vote(&self, subscriber: Uuid, uri: &str, kind: VoteKind) -> CoreResult<()> {
        let event = {
            let mut state = self.state.write();
            let index = state
                .queue
                .position_by_uri(uri)
                .ok_or_else(|| CoreError::TrackNotFound(uri.to_string()))?;

            let applied = {
                let track = state.queue.get_mut(index).expect("index just located");
                apply_vote(track, subscriber, kind)
            };
            if !applied {
                tracing::warn!(%subscriber, %uri, ?kind, "refused vote: no-op under current vote state");
                return Ok(());
            }
            state.queue.reheapify_at(index);
            let id = self.counter.increment();
            let changed = state.queue.get(index).expect("index unchanged by reheapify").clone();
            Event::new(constants::EVENT_UPDATE, id, vec![changed])
        };
        self.connections.broadcast(event).await;
        Ok(())
    }

    /// Stops whatever is currently playing (a no-op if nothing is) and
    /// advances to the next queued track.
    pub async fn next(&self) {
        self.player.stop().await;
        self.advance().await;
    }

    /// `_next` from the design: pop the queue and either start or cue the
    /// new current track, always under a single lock acquisition.
    async fn advance(&self) {
        enum Outcome {
            Empty,
            Cued(Track),
            Started(Track, Arc<dyn Backend>),
        }

        let outcome = {
            let mut state = self.state.write();
            match state.queue.pop_max() {
                None => {
                    state.current = None;
                    Outcome::Empty
                }
                Some(mut track) => {
                    track.index = None;
                    state.current = Some(track.clone());
                    if state.playing {
                        match self.backends.get(&track.source) {
                            Some(backend) => Outcome::Started(track, Arc::clone(backend)),
                            None => {
                                tracing::error!(source = %track.source, "no backend registered for track source");
                                Outcome::Cued(track)
                            }
                        }
                    } else {
                        Outcome::Cued(track)
                    }
                }
            }
        };

        let event = match outcome {
            Outcome::Empty => {
                let id = self.counter.increment();
                Event::notification(constants::EVENT_STOP, id)
            }
            Outcome::Cued(track) => {
                let id = self.counter.increment();
                Event::new(constants::EVENT_NEXT, id, vec![track])
            }
            Outcome::Started(track, backend) => {
                self.player.prepare(track.clone(), Arc::clone(&backend)).await;
                backend.play(&track, self.player.as_ref() as &dyn PlayerHandle).await;
                let id = self.counter.increment();
                Event::new(constants::EVENT_PLAY, id, vec![track])
            }
        };
        self.connections.broadcast(event).await;
    }

    /// Toggles the `playing` intent flag and reconciles the player/queue
    /// state to match.
    pub async fn play_pause(&self) {
        enum Action {
            Paused,
            AdvanceFromEmpty,
            Resumed,
            Started(Track, Arc<dyn Backend>),
        }

        let action = {
            let mut state = self.state.write();
            state.playing = !state.playing;
            if !state.playing {
                Action::Paused
            } else if state.current.is_none() {
                Action::AdvanceFromEmpty
            } else if self.player.playing() {
                Action::Resumed
            } else {
                let track = state.current.clone().expect("checked Some above");
                match self.backends.get(&track.source) {
                    Some(backend) => Action::Started(track, Arc::clone(backend)),
                    None => {
                        tracing::error!(source = %track.source, "no backend registered for track source");
                        Action::Resumed
                    }
                }
            }
        };

        match action {
            Action::Paused => {
                self.player.pause().await;
                let id = self.counter.increment();
                self.connections
                    .broadcast(Event::notification(constants::EVENT_PAUSE, id))
                    .await;
            }
            Action::AdvanceFromEmpty => self.advance().await,
            Action::Resumed => {
                self.player.resume().await;
                let id = self.counter.increment();
                self.connections
                    .broadcast(Event::notification(constants::EVENT_PLAY, id))
                    .await;
            }
            Action::Started(track, backend) => {
                self.player.prepare(track.clone(), Arc::clone(&backend)).await;
                backend.play(&track, self.player.as_ref() as &dyn PlayerHandle).await;
                let id = self.counter.increment();
                self.connections
                    .broadcast(Event::new(constants::EVENT_PLAY, id, vec![track]))
                    .await;
            }
        }
    }

    /// Fans a search out to every enabled backend concurrently. Each
    /// backend's non-empty result batch arrives on the returned channel
    /// as soon as it's ready; the channel closes once every backend task
    /// has finished (the last clone of the sender is dropped).
    pub fn search(&self, patterns: HashMap<String, String>) -> mpsc::Receiver<Vec<Track>> {
        let (tx, rx) = mpsc::channel(self.backends.len().max(1));
        for backend in self.backends.values() {
            let backend = Arc::clone(backend);
            let tx = tx.clone();
            let patterns = patterns.clone();
            tokio::spawn(async move {
                let results = backend.search(&patterns).await;
                if !results.is_empty() {
                    let _ = tx.send(results).await;
                }
            });
        }
        rx
    }

    /// Builds the private catch-up batch for a newly subscribed
    /// connection, and the `next-expected` id it should start counting
    /// from. Neither is broadcast; the caller sends these directly to the
    /// one new connection.
    pub fn catch_up(&self, subscriber: Uuid) -> (Vec<Event>, Option<TimeBonusEvent>, u64) {
        let state = self.state.read();
        let current_id = self.counter.current();
        let mut events = Vec::new();

        let time_bonus = (self.config.time_bonus != 0.0)
            .then(|| Event::time_bonus(current_id, self.config.time_bonus));

        if state.playing {
            if let Some(track) = &state.current {
                events.push(Event::new(constants::EVENT_PLAY, current_id, vec![track.clone()]));
            }
        }
        let queued: Vec<Track> = state.queue.snapshot_in_order();
        events.push(Event::new(constants::EVENT_ADD, current_id, queued.clone()));

        let upvoted: Vec<Track> = queued
            .iter()
            .filter(|t| t.has_upvote(&subscriber))
            .cloned()
            .collect();
        if !upvoted.is_empty() {
            events.push(Event::new(constants::EVENT_UPVOTED, current_id, upvoted));
        }
        let downvoted: Vec<Track> = queued
            .iter()
            .filter(|t| t.has_downvote(&subscriber))
            .cloned()
            .collect();
        if !downvoted.is_empty() {
            events.push(Event::new(constants::EVENT_DOWNVOTED, current_id, downvoted));
        }

        (events, time_bonus, current_id + 1)
    }
}

/// Applies `kind` to `track` for `subscriber`, returning whether the vote
/// actually changed anything (a refused vote returns `false`).
fn apply_vote(track: &mut Track, subscriber: Uuid, kind: VoteKind) -> bool {
    match kind {
        VoteKind::Up => {
            if track.has_upvote(&subscriber) {
                return false;
            }
            if track.downvoters.remove(&subscriber) {
                track.weight += 2.0;
            } else {
                track.weight += 1.0;
            }
            track.upvoters.insert(subscriber);
            true
        }
        VoteKind::Down => {
            if track.has_downvote(&subscriber) {
                return false;
            }
            if track.upvoters.remove(&subscriber) {
                track.weight -= 2.0;
            } else {
                track.weight -= 1.0;
            }
            track.downvoters.insert(subscriber);
            true
        }
        VoteKind::Unvote => {
            if track.downvoters.remove(&subscriber) {
                track.weight += 1.0;
                true
            } else if track.upvoters.remove(&subscriber) {
                track.weight -= 1.0;
                true
            } else {
                false
            }
        }
    }
}

#[async_trait]
impl PlaybackObserver for Coordinator {
    async fn on_track_finished(&self, _track: Track) {
        self.advance().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;

    fn track(uri: &str) -> Track {
        Track::new(uri, "artist", "dummy", uri)
    }

    #[test]
    fn up_then_unvote_restores_original_weight_and_voters() {
        let mut t = track("a");
        let subscriber = Uuid::new_v4();
        assert!(apply_vote(&mut t, subscriber, VoteKind::Up));
        assert!(apply_vote(&mut t, subscriber, VoteKind::Unvote));
        assert_eq!(t.weight, 0.0);
        assert!(t.upvoters.is_empty());
        assert!(t.downvoters.is_empty());
    }

    #[test]
    fn down_then_up_nets_plus_one_from_neutral() {
        let mut t = track("a");
        let subscriber = Uuid::new_v4();
        assert!(apply_vote(&mut t, subscriber, VoteKind::Down));
        assert!(apply_vote(&mut t, subscriber, VoteKind::Up));
        assert_eq!(t.weight, 1.0);
        assert!(t.upvoters.contains(&subscriber));
        assert!(t.downvoters.is_empty());
    }

    #[test]
    fn repeated_upvote_from_same_subscriber_is_refused() {
        let mut t = track("a");
        let subscriber = Uuid::new_v4();
        assert!(apply_vote(&mut t, subscriber, VoteKind::Up));
        assert!(!apply_vote(&mut t, subscriber, VoteKind::Up));
        assert_eq!(t.weight, 1.0);
    }

    #[test]
    fn unvote_with_no_prior_vote_is_refused() {
        let mut t = track("a");
        let subscriber = Uuid::new_v4();
        assert!(!apply_vote(&mut t, subscriber, VoteKind::Unvote));
        assert_eq!(t.weight, 0.0);
    }

    #[tokio::test]
    async fn add_then_delete_leaves_queue_empty() {
        let connections: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let backends: BackendRegistry = HashMap::new();
        let weak: std::sync::Weak<dyn PlaybackObserver> = std::sync::Weak::<Coordinator>::new() as _;
        let player = PlayerController::new("true", weak);
        let config = Arc::new(Config::default());
        let coordinator = Coordinator::new(connections, backends, player, config);

        coordinator.add(track("a")).await;
        coordinator.delete("a").await.unwrap();
        let (events, _time_bonus, _next_expected) = coordinator.catch_up(Uuid::new_v4());
        let add_event = events
            .iter()
            .find(|e| e.kind == constants::EVENT_ADD)
            .unwrap();
        assert!(add_event.tracks.is_empty());
    }

    #[tokio::test]
    async fn time_bonus_ages_older_tracks_above_new_ones() {
        let connections: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let backends: BackendRegistry = HashMap::new();
        let weak: std::sync::Weak<dyn PlaybackObserver> = std::sync::Weak::<Coordinator>::new() as _;
        let player = PlayerController::new("true", weak);
        let config = Arc::new(Config {
            time_bonus: 0.1,
            ..Config::default()
        });
        let coordinator = Coordinator::new(connections, backends, player, config);

        coordinator.add(track("a")).await;
        coordinator.add(track("b")).await;
        coordinator.add(track("c")).await;

        let (events, time_bonus, _next_expected) = coordinator.catch_up(Uuid::new_v4());
        assert!(time_bonus.is_some());
        let queued = &events
            .iter()
            .find(|e| e.kind == constants::EVENT_ADD)
            .unwrap()
            .tracks;
        let weight_of = |uri: &str| queued.iter().find(|t| t.uri == uri).unwrap().weight;
        assert!((weight_of("a") - 0.2).abs() < 1e-9);
        assert!((weight_of("b") - 0.1).abs() < 1e-9);
        assert!((weight_of("c") - 0.0).abs() < 1e-9);
    }

    fn coordinator_with(backends: BackendRegistry, config: Config) -> Coordinator {
        let connections: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let weak: std::sync::Weak<dyn PlaybackObserver> = std::sync::Weak::<Coordinator>::new() as _;
        let player = PlayerController::new("true", weak);
        Coordinator::new(connections, backends, player, Arc::new(config))
    }

    #[tokio::test]
    async fn ingest_upload_without_an_upload_backend_is_rejected() {
        let coordinator = coordinator_with(HashMap::new(), Config::default());
        let err = coordinator.ingest_upload("song.mp3", b"bytes").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn ingest_upload_queues_the_resulting_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut backends: BackendRegistry = HashMap::new();
        backends.insert(
            crate::backend::UploadBackend::SOURCE.to_string(),
            Arc::new(crate::backend::UploadBackend::new(dir.path())),
        );
        let coordinator = coordinator_with(backends, Config::default());

        // Not a real tagged audio file, so tag reading fails and the
        // upload is rejected before ever reaching the queue.
        let err = coordinator.ingest_upload("song.mp3", b"not audio").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));

        let (events, _, _) = coordinator.catch_up(Uuid::new_v4());
        let add_event = events.iter().find(|e| e.kind == constants::EVENT_ADD).unwrap();
        assert!(add_event.tracks.is_empty());
    }

    struct StubPlaylistBackend {
        tracks: Vec<Track>,
    }

    #[async_trait]
    impl Backend for StubPlaylistBackend {
        fn source(&self) -> &str {
            "stub"
        }

        async fn search(&self, _patterns: &HashMap<String, String>) -> Vec<Track> {
            Vec::new()
        }

        async fn play(&self, _track: &Track, _player: &dyn PlayerHandle) {}

        async fn on_finished(&self, _track: &Track) {}

        async fn load_playlist(&self, _identifier: &str) -> Vec<Track> {
            self.tracks.clone()
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[tokio::test]
    async fn load_playlists_queues_every_track_every_backend_returns() {
        let mut backends: BackendRegistry = HashMap::new();
        backends.insert(
            "stub".to_string(),
            Arc::new(StubPlaylistBackend {
                tracks: vec![track("a"), track("b")],
            }),
        );
        let coordinator = coordinator_with(backends, Config::default());

        coordinator.load_playlists(&["favorites".to_string()]).await;

        let (events, _, _) = coordinator.catch_up(Uuid::new_v4());
        let queued = &events.iter().find(|e| e.kind == constants::EVENT_ADD).unwrap().tracks;
        assert_eq!(queued.len(), 2);
    }
}
