//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::connection::ConnectionManager;
use crate::backend::{Backend, BackendRegistry, DummyBackend, LocalBackend, UploadBackend};
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::events::EventEmitter;
use crate::player::{PlaybackObserver, PlayerController};

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by `AppState` to build the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// The single state/event owner.
    pub coordinator: Arc<Coordinator>,
    /// Registry of live subscriber connections.
    pub connections: Arc<ConnectionManager>,
    /// Subprocess playback control.
    pub player: Arc<PlayerController>,
    /// Merged application configuration.
    pub config: Arc<Config>,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown of all services: stop the player if
    /// running, cancel every connection's task, then propagate the
    /// cancellation token to anything else that selected on it.
    pub async fn shutdown(&self) {
        log::info!("beginning graceful shutdown");
        self.player.stop().await;
        let closed = self.connections.close_all();
        log::info!("closed {closed} connection(s)");
        self.cancel_token.cancel();
        log::info!("shutdown complete");
    }
}

/// Builds the `BackendRegistry` for every backend tag named in
/// `config.backends`, skipping (and logging) any unrecognized tag rather
/// than failing startup over an optional feature.
fn build_backends(config: &Config) -> BackendRegistry {
    let mut registry: BackendRegistry = HashMap::new();
    for tag in &config.backends {
        let backend: Arc<dyn Backend> = match tag.as_str() {
            DummyBackend::SOURCE => Arc::new(DummyBackend::new()),
            LocalBackend::SOURCE => {
                let dir = config.local_music_dir.clone().unwrap_or_else(|| {
                    log::warn!("local backend enabled with no local_music_dir configured");
                    String::new()
                });
                Arc::new(LocalBackend::new(dir))
            }
            UploadBackend::SOURCE => {
                let dir = config.upload_dir.clone().unwrap_or_else(|| {
                    log::warn!("upload backend enabled with no upload_dir configured");
                    std::env::temp_dir().display().to_string()
                });
                Arc::new(UploadBackend::new(dir))
            }
            other => {
                log::warn!(target: "jukeline_core::bootstrap", "unrecognized backend tag {other:?}; skipping");
                continue;
            }
        };
        registry.insert(tag.clone(), backend);
    }
    registry
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Connection manager (no dependencies)
/// 2. Backend registry (depends on config)
/// 3. Coordinator and player controller, wired cyclically: the player
///    needs a `Weak<Coordinator>` to report finished tracks, and the
///    coordinator needs the player to dispatch playback. `Arc::new_cyclic`
///    produces the coordinator's `Arc` and hands out a `Weak` to it before
///    the coordinator itself is constructed, breaking the cycle.
pub fn bootstrap_services(config: Config) -> BootstrappedServices {
    let config = Arc::new(config);
    let connections = Arc::new(ConnectionManager::new());
    let backends = build_backends(&config);
    let cancel_token = CancellationToken::new();

    let player_binary = config.media_player_binary.clone();
    let coordinator = Arc::new_cyclic(|weak_coordinator| {
        let observer: std::sync::Weak<dyn PlaybackObserver> = weak_coordinator.clone() as _;
        let player = PlayerController::new(player_binary, observer);
        let emitter: Arc<dyn EventEmitter> = Arc::clone(&connections) as _;
        Coordinator::new(emitter, backends, player, Arc::clone(&config))
    });

    let player = coordinator.player_handle();

    BootstrappedServices {
        coordinator,
        connections,
        player,
        config,
        cancel_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_services_wires_dummy_backend_by_default() {
        let services = bootstrap_services(Config::default());
        assert!(services.coordinator.player_handle().player_binary() == "mpv");
    }
}
