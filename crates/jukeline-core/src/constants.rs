//! Fixed protocol and tuning constants.
//!
//! These values are either dictated by the wire protocol (event kinds, JSON
//! field names) or are deliberate engineering choices documented where they
//! are introduced in the design notes.

// ─────────────────────────────────────────────────────────────────────────────
// Connection / Event Bus
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of a single connection's event channel.
///
/// Kept deliberately small so a slow subscriber's producers notice
/// backpressure quickly instead of buffering unbounded history.
pub const CONNECTION_EVENT_BUFFER_SIZE: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Player Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Exit code mpv (and compatible players) use to report termination by signal.
///
/// Any other nonzero code is still treated as a natural (if unsuccessful)
/// completion so the queue keeps advancing rather than wedging on a bad track.
pub const PLAYER_SIGNAL_EXIT_CODE: i32 = 4;

/// Capacity of the player controller's command channel.
pub const PLAYER_COMMAND_CHANNEL_CAPACITY: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Event kinds (wire protocol)
// ─────────────────────────────────────────────────────────────────────────────

pub const EVENT_ADD: &str = "add";
pub const EVENT_DELETE: &str = "delete";
pub const EVENT_UPDATE: &str = "update";
pub const EVENT_PLAY: &str = "play";
pub const EVENT_NEXT: &str = "next";
pub const EVENT_PAUSE: &str = "pause";
pub const EVENT_STOP: &str = "stop";
pub const EVENT_UPVOTED: &str = "upvoted";
pub const EVENT_DOWNVOTED: &str = "downvoted";
pub const EVENT_SEARCH: &str = "search";
pub const EVENT_FINISH_SEARCH: &str = "finish-search";
pub const EVENT_TIME_BONUS: &str = "timeBonus";

/// Cookie name the HTTP layer uses to carry the subscriber id.
pub const SUBSCRIBER_COOKIE: &str = "UUID";
