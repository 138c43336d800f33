//! PubSub wire protocol
//!
//! Every frame is a JSON object with a `type` discriminator. Outbound:
//! `LISTEN`, `PING`. Inbound: `RESPONSE`, `MESSAGE`, `PONG`, `RECONNECT`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder substituted with the broadcaster id in topic templates
pub const CHANNEL_ID_PLACEHOLDER: &str = "{channel_id}";

/// Subscription request sent once per (re)connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: ListenData<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ListenData<'a> {
    topics: Vec<String>,
    auth_token: &'a str,
}

impl<'a> ListenRequest<'a> {
    pub fn new(topics: Vec<String>, auth_token: &'a str) -> Self {
        Self {
            kind: "LISTEN",
            data: ListenData { topics, auth_token },
        }
    }

    pub fn to_frame(&self) -> String {
        // Serializing owned strings into a map cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Expand topic templates for one broadcaster
pub fn interpolate_topics(templates: &[String], channel_id: &str) -> Vec<String> {
    templates
        .iter()
        .map(|t| t.replace(CHANNEL_ID_PLACEHOLDER, channel_id))
        .collect()
}

/// Loosely typed inbound frame; fields are checked per message type
#[derive(Debug, Clone, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Reply to LISTEN; `error` is empty on success
    Response { error: Option<String> },
    /// Application event on a topic
    Message { topic: String, message: String },
    /// Heartbeat acknowledgment
    Pong,
    /// Server asks the client to reconnect
    Reconnect,
    /// Well-formed frame with a type this client does not handle
    Unknown { kind: String, raw: String },
}

/// Frames that cannot be routed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("frame has no type discriminator")]
    MissingType,
    #[error("MESSAGE frame missing field `{0}`")]
    MissingField(&'static str),
    #[error("topic `{topic}` has non-numeric segment `{segment}`")]
    NonNumericSegment { topic: String, segment: String },
    #[error("message payload is not valid JSON: {0}")]
    InvalidPayload(String),
}

impl InboundFrame {
    /// Classify one text frame
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let kind = raw.kind.ok_or(FrameError::MissingType)?;

        match kind.as_str() {
            "RESPONSE" => Ok(Self::Response {
                error: raw.error.filter(|e| !e.is_empty()),
            }),
            "PONG" => Ok(Self::Pong),
            "RECONNECT" => Ok(Self::Reconnect),
            "MESSAGE" => {
                let data = raw.data.ok_or(FrameError::MissingField("data"))?;
                let topic = data
                    .get("topic")
                    .and_then(Value::as_str)
                    .ok_or(FrameError::MissingField("topic"))?;
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or(FrameError::MissingField("message"))?;
                Ok(Self::Message {
                    topic: topic.to_string(),
                    message: message.to_string(),
                })
            }
            _ => Ok(Self::Unknown {
                kind,
                raw: text.to_string(),
            }),
        }
    }
}

/// Topic key plus the numeric identifiers that followed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPath {
    pub key: String,
    /// Identifiers in right-to-left pop order
    pub ids: Vec<i64>,
}

/// Split a dot-delimited topic into its key and trailing numeric ids
///
/// Segments after the first are popped from the right and must all be
/// (possibly signed) integers: `"foo.1.2"` gives key `"foo"` and ids `[2, 1]`.
pub fn parse_topic(topic: &str) -> Result<TopicPath, FrameError> {
    let mut rest = topic;
    let mut ids = Vec::new();

    while let Some((head, segment)) = rest.rsplit_once('.') {
        let id = segment
            .parse::<i64>()
            .map_err(|_| FrameError::NonNumericSegment {
                topic: topic.to_string(),
                segment: segment.to_string(),
            })?;
        ids.push(id);
        rest = head;
    }

    Ok(TopicPath {
        key: rest.to_string(),
        ids,
    })
}

/// Decode the JSON string carried in a MESSAGE frame
pub fn decode_payload(message: &str) -> Result<Value, FrameError> {
    serde_json::from_str(message).map_err(|e| FrameError::InvalidPayload(e.to_string()))
}
