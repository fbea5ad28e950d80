//! Subprocess playback control (component 4.E).
//!
//! A single command channel serializes every instruction to the player:
//! the command-loop task is the only place that ever touches the child
//! process, so pause/continue/stop/start can never race each other. The
//! child itself is owned by a separately spawned watcher task that blocks
//! on `wait()` and reports back over the same channel, so the command
//! loop is never stuck waiting on a subprocess.
//!
//! Grounded on the original system's player goroutine: SIGSTOP/SIGCONT for
//! pause/continue, SIGTERM for an explicit stop, and an exit-code
//! convention (4) the configured player uses when killed by signal, used
//! together with an induced-stop flag to tell a user-requested stop apart
//! from the track simply running out.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::backend::Backend;
use crate::constants::{PLAYER_COMMAND_CHANNEL_CAPACITY, PLAYER_SIGNAL_EXIT_CODE};
use crate::track::Track;

/// The handle backends use to start playback without knowing anything
/// about subprocesses or the player's internal state.
#[async_trait]
pub trait PlayerHandle: Send + Sync {
    async fn play_uri(&self, uri: String);
    async fn play_data(&self, data: Bytes, extension: String);

    /// Whether a player subprocess is currently running, i.e. the
    /// controller holds a live child pid. Distinct from any caller's own
    /// "should be playing" intent, which the player has no way to see.
    fn playing(&self) -> bool;
}

/// Notified when the currently playing track finishes on its own, so the
/// coordinator can advance the queue. Not invoked for an explicit stop.
#[async_trait]
pub trait PlaybackObserver: Send + Sync {
    async fn on_track_finished(&self, track: Track);
}

struct CurrentPlayback {
    track: Track,
    backend: Arc<dyn Backend>,
}

enum PlayerCommand {
    /// Records which track/backend the next `PlayUri`/`PlayData` belongs
    /// to, so the watcher can call back into the right backend on finish.
    Prepare {
        track: Track,
        backend: Arc<dyn Backend>,
    },
    PlayUri {
        uri: String,
    },
    PlayData {
        data: Bytes,
        extension: String,
    },
    Pause,
    Continue,
    Stop,
    WatcherFinished {
        generation: u64,
        natural: bool,
    },
}

/// Owns the single subprocess slot and the command channel that
/// serializes access to it.
pub struct PlayerController {
    tx: mpsc::Sender<PlayerCommand>,
    player_binary: String,
    has_child: Arc<AtomicBool>,
}

struct CommandLoop {
    rx: mpsc::Receiver<PlayerCommand>,
    tx: mpsc::Sender<PlayerCommand>,
    player_binary: String,
    observer: std::sync::Weak<dyn PlaybackObserver>,
    pending: Option<CurrentPlayback>,
    current: Option<CurrentPlayback>,
    child_pid: Option<u32>,
    has_child: Arc<AtomicBool>,
    induced: Arc<AtomicBool>,
    generation: u64,
}

impl PlayerController {
    /// `observer` is typically a `Weak` reference to the coordinator,
    /// obtained through `Arc::new_cyclic` at bootstrap to break the
    /// coordinator/player ownership cycle.
    pub fn new(player_binary: impl Into<String>, observer: std::sync::Weak<dyn PlaybackObserver>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(PLAYER_COMMAND_CHANNEL_CAPACITY);
        let player_binary = player_binary.into();
        let loop_tx = tx.clone();
        let has_child = Arc::new(AtomicBool::new(false));
        let mut command_loop = CommandLoop {
            rx,
            tx: loop_tx,
            player_binary: player_binary.clone(),
            observer,
            pending: None,
            current: None,
            child_pid: None,
            has_child: Arc::clone(&has_child),
            induced: Arc::new(AtomicBool::new(false)),
            generation: 0,
        };
        tokio::spawn(async move {
            command_loop.run().await;
        });
        Arc::new(Self {
            tx,
            player_binary,
            has_child,
        })
    }

    /// Tells the player which track/backend the upcoming `play_uri` or
    /// `play_data` call belongs to. Called by the coordinator immediately
    /// before it invokes `backend.play`.
    pub async fn prepare(&self, track: Track, backend: Arc<dyn Backend>) {
        let _ = self.tx.send(PlayerCommand::Prepare { track, backend }).await;
    }

    pub async fn pause(&self) {
        let _ = self.tx.send(PlayerCommand::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.tx.send(PlayerCommand::Continue).await;
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(PlayerCommand::Stop).await;
    }

    pub fn player_binary(&self) -> &str {
        &self.player_binary
    }

    /// Whether the subprocess pointer is non-null, independent of any
    /// caller's own playback-intent flag.
    pub fn playing(&self) -> bool {
        self.has_child.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayerHandle for PlayerController {
    async fn play_uri(&self, uri: String) {
        let _ = self.tx.send(PlayerCommand::PlayUri { uri }).await;
    }

    async fn play_data(&self, data: Bytes, extension: String) {
        let _ = self.tx.send(PlayerCommand::PlayData { data, extension }).await;
    }

    fn playing(&self) -> bool {
        PlayerController::playing(self)
    }
}

impl CommandLoop {
    async fn run(&mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                PlayerCommand::Prepare { track, backend } => {
                    self.pending = Some(CurrentPlayback { track, backend });
                }
                PlayerCommand::PlayUri { uri } => self.spawn(uri).await,
                PlayerCommand::PlayData { data, extension } => {
                    match write_temp_file(&data, &extension).await {
                        Ok(path) => self.spawn(format!("file://{}", path.display())).await,
                        Err(err) => tracing::error!(%err, "failed to stage uploaded audio for playback"),
                    }
                }
                PlayerCommand::Pause => self.signal(libc::SIGSTOP),
                PlayerCommand::Continue => self.signal(libc::SIGCONT),
                PlayerCommand::Stop => {
                    self.induced.store(true, Ordering::SeqCst);
                    self.signal(libc::SIGTERM);
                }
                PlayerCommand::WatcherFinished { generation, natural } => {
                    if generation != self.generation {
                        continue; // stale report from an already-superseded child
                    }
                    self.child_pid = None;
                    self.has_child.store(false, Ordering::SeqCst);
                    self.induced.store(false, Ordering::SeqCst);
                    if let Some(playback) = self.current.take() {
                        if natural {
                            playback.backend.on_finished(&playback.track).await;
                            if let Some(observer) = self.observer.upgrade() {
                                observer.on_track_finished(playback.track).await;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn spawn(&mut self, uri: String) {
        if self.child_pid.is_some() {
            tracing::warn!("playback requested while a track is already running; ignoring");
            return;
        }
        let Some(playback) = self.pending.take() else {
            tracing::warn!(%uri, "playback requested with no prepared track; ignoring");
            return;
        };

        let mut command = Command::new(&self.player_binary);
        command
            .arg("--no-video")
            .arg("--really-quiet")
            .arg(&uri)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                // `has_child` stays false, so a caller that queries
                // `playing()` after this (e.g. the coordinator's
                // play/pause toggle) correctly sees nothing running and
                // retries the dispatch instead of treating it as live.
                tracing::error!(%err, %uri, "failed to spawn player process");
                return;
            }
        };
        let pid = child.id();
        self.child_pid = pid;
        self.has_child.store(true, Ordering::SeqCst);
        self.generation += 1;
        let generation = self.generation;
        self.current = Some(playback);

        let tx = self.tx.clone();
        let induced = Arc::clone(&self.induced);
        tokio::spawn(async move {
            let status = child.wait().await;
            let natural = match status {
                Ok(status) => {
                    let exited_on_signal_code = status.code() == Some(PLAYER_SIGNAL_EXIT_CODE);
                    !induced.load(Ordering::SeqCst) && !exited_on_signal_code
                }
                Err(err) => {
                    tracing::error!(%err, "failed to wait on player process");
                    false
                }
            };
            let _ = tx
                .send(PlayerCommand::WatcherFinished { generation, natural })
                .await;
        });
    }

    fn signal(&self, signal: i32) {
        let Some(pid) = self.child_pid else {
            tracing::trace!("signal requested with no running player process");
            return;
        };
        // SAFETY: `pid` is a process id we obtained from `Child::id`, and
        // sending a signal to it cannot violate Rust's memory safety.
        let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if result != 0 {
            tracing::warn!(pid, signal, "failed to signal player process");
        }
    }
}

async fn write_temp_file(data: &Bytes, extension: &str) -> std::io::Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("{}.{extension}", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct RecordingObserver {
        finished: AtomicUsize,
    }

    #[async_trait]
    impl PlaybackObserver for RecordingObserver {
        async fn on_track_finished(&self, _track: Track) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn signal_with_no_running_process_does_not_panic() {
        let observer: Arc<RecordingObserver> = Arc::new(RecordingObserver {
            finished: AtomicUsize::new(0),
        });
        let weak: std::sync::Weak<dyn PlaybackObserver> = Arc::downgrade(&observer) as _;
        let player = PlayerController::new("true", weak);
        player.pause().await;
        player.resume().await;
        player.stop().await;
        // give the command loop a moment to process; nothing should panic
        tokio::task::yield_now().await;
    }

    #[test]
    fn write_temp_file_path_uses_requested_extension() {
        let path = std::env::temp_dir().join(format!("{}.{}", uuid::Uuid::new_v4(), "mp3"));
        assert_eq!(path.extension().unwrap(), "mp3");
    }
}
