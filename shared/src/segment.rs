//! Reply values and their mapping onto transport segments

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;

/// One typed segment of a OneBot message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    fn new(kind: &str, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.to_string(),
            data,
        }
    }

    /// Plain text segment
    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text", json!({ "text": text.into() }))
    }
}

/// One value of a reply together with its kind ("text", "image", ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPart {
    pub value: String,
    pub kind: String,
}

/// The reply a command produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub parts: Vec<ReplyPart>,
}

impl Reply {
    /// A reply of one value with the given kind
    pub fn new(value: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            parts: vec![ReplyPart {
                value: value.into(),
                kind: kind.into(),
            }],
        }
    }

    /// A single text reply
    pub fn text(value: impl Into<String>) -> Self {
        Self::new(value, "text")
    }

    /// Append another part
    pub fn with_part(mut self, value: impl Into<String>, kind: impl Into<String>) -> Self {
        self.parts.push(ReplyPart {
            value: value.into(),
            kind: kind.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Values joined for logging
    pub fn summary(&self) -> String {
        self.parts
            .iter()
            .map(|p| format!("[{}] {}", p.kind, p.value))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Map every part onto a transport segment
    pub fn to_segments(&self) -> Vec<Segment> {
        self.parts
            .iter()
            .map(|p| to_segment(&p.value, &p.kind))
            .collect()
    }
}

/// Map one `(value, kind)` pair onto the transport's segment shape
///
/// File-like kinds need an existing local path or an http(s) URL; anything
/// else, and any unknown kind, degrades to a descriptive text segment.
pub fn to_segment(value: &str, kind: &str) -> Segment {
    match kind {
        "text" => {
            // The transport rejects empty text segments
            let text = if value.is_empty() { " " } else { value };
            Segment::text(text)
        }
        "image" | "record" | "video" | "file" => {
            if Path::new(value).exists() {
                Segment::new(kind, json!({ "file": value }))
            } else if value.starts_with("http://") || value.starts_with("https://") {
                Segment::new(kind, json!({ "file": value, "url": value }))
            } else {
                Segment::text(format!("File not found: {}", value))
            }
        }
        "at" => Segment::new(kind, json!({ "qq": value })),
        "face" | "reply" | "forward" | "node" => Segment::new(kind, json!({ "id": value })),
        "dice" | "shake" | "rps" => Segment::new(kind, json!({})),
        _ => Segment::text(format!("Unsupported message kind: [{}:{}]", kind, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_becomes_space() {
        let seg = to_segment("", "text");
        assert_eq!(seg.kind, "text");
        assert_eq!(seg.data["text"], " ");
    }

    #[test]
    fn test_image_url_keeps_kind() {
        let seg = to_segment("https://example.com/a.png", "image");
        assert_eq!(seg.kind, "image");
        assert_eq!(seg.data["url"], "https://example.com/a.png");
    }

    #[test]
    fn test_missing_file_degrades_to_text() {
        let seg = to_segment("/definitely/not/here.png", "image");
        assert_eq!(seg.kind, "text");
        assert!(seg.data["text"].as_str().unwrap().contains("File not found"));
    }

    #[test]
    fn test_unknown_kind_degrades_to_text() {
        let seg = to_segment("x", "hologram");
        assert_eq!(seg.kind, "text");
        assert!(seg.data["text"].as_str().unwrap().contains("hologram"));
    }

    #[test]
    fn test_dice_has_empty_data_object() {
        let seg = to_segment("", "dice");
        let encoded = serde_json::to_value(&seg).unwrap();
        assert_eq!(encoded, json!({"type": "dice", "data": {}}));
    }

    #[test]
    fn test_multi_part_reply() {
        let reply = Reply::text("look").with_part("10001", "at");
        let segments = reply.to_segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].data["qq"], "10001");
    }
}
