//! Transport trait abstraction for the outbound message API

use anyhow::Result;
use async_trait::async_trait;
use onebot_shared::{is_group, Segment};
use serde::{Deserialize, Serialize};

/// Body of a send request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub message_type: String,
    pub message: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl SendRequest {
    /// Address `target_id` as a group or a user depending on `message_type`
    pub fn new(message_type: &str, target_id: i64, message: Vec<Segment>) -> Self {
        let (group_id, user_id) = if is_group(message_type) {
            (Some(target_id), None)
        } else {
            (None, Some(target_id))
        };
        Self {
            message_type: message_type.to_string(),
            message,
            group_id,
            user_id,
        }
    }
}

/// Result of a status probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub online: bool,
}

/// The messaging endpoint replies are delivered through
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Ask whether the endpoint is online
    async fn get_status(&self) -> Result<StatusReport>;

    /// Deliver one message; errors when the endpoint does not accept it
    async fn send_msg(&self, request: &SendRequest) -> Result<()>;

    /// Clear the endpoint's cache
    async fn clean_cache(&self) -> Result<()>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_request_addresses_group() {
        let request = SendRequest::new("group", 1001, vec![Segment::text("hi")]);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "message_type": "group",
                "message": [{"type": "text", "data": {"text": "hi"}}],
                "group_id": 1001
            })
        );
    }

    #[test]
    fn test_private_request_addresses_user() {
        let request = SendRequest::new("private", 42, vec![]);
        assert_eq!(request.user_id, Some(42));
        assert_eq!(request.group_id, None);
    }
}
