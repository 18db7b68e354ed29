//! OneBot Shared Protocol Types
//!
//! This crate provides the types shared between the orchestrator, its
//! worker processes and the development transport stub: inbound webhook
//! events, outbound reply segments and the frame codec used on worker pipes.

pub mod codec;
pub mod event;
pub mod segment;

use std::time::{SystemTime, UNIX_EPOCH};

pub use event::{MessageEvent, MessageSender, SUPPORTED_SEGMENT_TYPES};
pub use segment::{Reply, ReplyPart, Segment};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing and retry limits for the system
pub mod limits {
    /// Auto-scheduler tick period in milliseconds
    pub const TICK_INTERVAL_MS: u64 = 1000;

    /// Default attempt count for outbound calls
    pub const DEFAULT_RETRY_COUNT: u32 = 3;

    /// Fixed delay between outbound attempts (no backoff)
    pub const RETRY_DELAY_MS: u64 = 1000;

    /// Overall bound on the startup status probe
    pub const STATUS_PROBE_TIMEOUT_MS: u64 = 30_000;

    /// Overall bound on delivering one outbound message
    pub const SEND_TIMEOUT_MS: u64 = 120_000;

    /// Per-request timeout for HTTP calls
    pub const REQUEST_TIMEOUT_MS: u64 = 60_000;
}

/// Returns true when the OneBot message type addresses a group
pub fn is_group(message_type: &str) -> bool {
    message_type == "group"
}
