//! Inbound webhook events posted by the messaging transport

use crate::segment::Segment;
use serde::{Deserialize, Serialize};

/// First-segment types the dispatcher accepts
pub const SUPPORTED_SEGMENT_TYPES: &[&str] = &[
    "text", "face", "image", "record", "video", "at", "rps", "dice", "shake", "poke", "share",
    "contact", "location", "music", "reply", "forward", "node", "xml", "json",
];

/// Sender block of a message event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSender {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
}

/// A message event as posted to the webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_id: i64,
    /// "private" or "group"; absent on non-message events
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub message: Vec<Segment>,
    /// Flattened text, used for command-prefix splitting
    #[serde(default)]
    pub raw_message: String,
    #[serde(default)]
    pub sender: MessageSender,
    #[serde(default)]
    pub group_id: Option<i64>,
}

impl MessageEvent {
    /// Returns the message type when this is a real message event
    /// (type present and at least one segment)
    pub fn message_kind(&self) -> Option<&str> {
        match self.message_type.as_deref() {
            Some(kind) if !kind.is_empty() && !self.message.is_empty() => Some(kind),
            _ => None,
        }
    }

    /// Type of the first segment, which decides routing
    pub fn first_segment_type(&self) -> Option<&str> {
        self.message.first().map(|s| s.kind.as_str())
    }

    /// Whether the first segment type is one the dispatcher handles
    pub fn is_supported(&self) -> bool {
        self.first_segment_type()
            .map(|kind| SUPPORTED_SEGMENT_TYPES.contains(&kind))
            .unwrap_or(false)
    }

    /// Reply target: the group for group messages, the sender otherwise
    pub fn target_id(&self) -> i64 {
        if self.message_kind().map(crate::is_group).unwrap_or(false) {
            self.group_id.unwrap_or_default()
        } else {
            self.sender.user_id
        }
    }

    /// Split the raw text on the first `|` into `(command, payload)`
    ///
    /// Text without a delimiter is ordinary chat and yields `None`.
    pub fn split_command(&self) -> Option<(&str, &str)> {
        self.raw_message.split_once('|')
    }
}
