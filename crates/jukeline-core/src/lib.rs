//! Jukeline Core - shared library for Jukeline, a collaborative music
//! queue server.
//!
//! This crate provides the core functionality: clients vote tracks up or
//! down, the highest-weighted track plays next, and every subscriber sees
//! the queue change in real time. It is designed to be used by the
//! standalone server binary.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`track`]: The track record voted on and queued
//! - [`queue`]: The weight-ordered priority queue
//! - [`events`]: The wire event format and broadcast abstraction
//! - [`api`]: HTTP/WebSocket layer and the per-connection delivery loop
//! - [`backend`]: Pluggable media source capability
//! - [`player`]: Subprocess playback control
//! - [`coordinator`]: The single owner of queue state and event ordering
//! - [`config`]: Application configuration
//! - [`bootstrap`]: Composition root wiring all of the above together
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from
//! transport and platform-specific concerns:
//!
//! - [`EventEmitter`](events::EventEmitter): Broadcasting domain events
//! - [`EventSink`](api::connection::EventSink): Writing framed events to a transport
//! - [`Backend`](backend::Backend): A pluggable media source
//! - [`PlayerHandle`](player::PlayerHandle): What a backend uses to start playback
//! - [`PlaybackObserver`](player::PlaybackObserver): Notified when a track finishes naturally

#![warn(clippy::all)]

pub mod api;
pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod player;
pub mod queue;
pub mod track;

// Re-export commonly used types at the crate root.
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use config::Config;
pub use coordinator::{Coordinator, VoteKind};
pub use error::{CoreError, CoreResult, ErrorCode};
pub use events::{Event, EventCounter, EventEmitter};
pub use queue::PriorityQueue;
pub use track::Track;

// Re-export API types.
pub use api::{start_server, AppState, AppStateBuilder, ServerError};
