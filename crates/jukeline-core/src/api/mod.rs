//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the coordinator.
//! It provides the router construction and server startup functionality.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::connection::ConnectionManager;
use crate::config::Config;
use crate::coordinator::Coordinator;

pub mod connection;
pub mod http;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services. All
/// business logic lives in the coordinator itself.
#[derive(Clone)]
pub struct AppState {
    /// The single state/event owner.
    pub coordinator: Arc<Coordinator>,
    /// Registry of live subscriber connections.
    pub connections: Arc<ConnectionManager>,
    /// Merged application configuration.
    pub config: Arc<Config>,
    /// Cancellation token propagated to every per-connection task.
    pub cancel_token: CancellationToken,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    coordinator: Option<Arc<Coordinator>>,
    connections: Option<Arc<ConnectionManager>>,
    config: Option<Arc<Config>>,
    cancel_token: Option<CancellationToken>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates every field from a `BootstrappedServices` container.
    pub fn from_services(mut self, services: &crate::BootstrappedServices) -> Self {
        self.coordinator = Some(Arc::clone(&services.coordinator));
        self.connections = Some(Arc::clone(&services.connections));
        self.config = Some(Arc::clone(&services.config));
        self.cancel_token = Some(services.cancel_token.clone());
        self
    }

    pub fn coordinator(mut self, coordinator: Arc<Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn connections(mut self, connections: Arc<ConnectionManager>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            coordinator: self.coordinator.expect("coordinator is required"),
            connections: self.connections.expect("connections is required"),
            config: self.config.expect("config is required"),
            cancel_token: self.cancel_token.unwrap_or_default(),
        }
    }
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Starts the HTTP server on the configured port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("server listening on http://{addr}");

    let app = http::create_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
