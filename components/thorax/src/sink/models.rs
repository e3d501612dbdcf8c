//! Analytics message types and their Segment wire representation.

// External crates
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Largest single message Segment accepts.
pub const MAX_MESSAGE_BYTES: usize = 32 * 1024;

/// Largest batch request body Segment accepts.
pub const MAX_BATCH_BYTES: usize = 500 * 1024;

/// Property/trait map attached to a message.
pub type Properties = Map<String, Value>;

/// Sink error handling
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("invalid message: {0}")]
    Validation(&'static str),
    #[error("message is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("sink is closed")]
    Closed,
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("analytics request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("analytics collector responded with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Activity event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub event: String,
    pub user_id: String,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Associates a subject with traits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub user_id: String,
    pub traits: Properties,
}

/// Anything the sink accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Track(Track),
    Identify(Identify),
}

impl Message {
    /// Input checks performed at enqueue time, before anything is buffered.
    pub fn validate(&self) -> Result<(), SinkError> {
        match self {
            Message::Track(track) => {
                if track.event.is_empty() {
                    return Err(SinkError::Validation("track event name is empty"));
                }
                if track.user_id.is_empty() {
                    return Err(SinkError::Validation("track user id is empty"));
                }
            }
            Message::Identify(identify) => {
                if identify.user_id.is_empty() {
                    return Err(SinkError::Validation("identify user id is empty"));
                }
            }
        }
        Ok(())
    }
}

/// Library identification sent with every message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryContext {
    pub name: String,
    pub version: String,
}

impl Default for LibraryContext {
    fn default() -> Self {
        Self {
            name: "thorax".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageContext {
    pub library: LibraryContext,
}

/// A validated message as it goes over the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(flatten)]
    pub message: Message,
    pub message_id: String,
    pub context: MessageContext,
}

impl Envelope {
    /// Validate `message` and wrap it with a fresh message id.
    pub fn seal(message: Message, library: &LibraryContext) -> Result<(Self, usize), SinkError> {
        message.validate()?;

        let envelope = Self {
            message,
            message_id: uuid::Uuid::new_v4().to_string(),
            context: MessageContext {
                library: library.clone(),
            },
        };

        let size = serde_json::to_vec(&envelope)?.len();
        if size > MAX_MESSAGE_BYTES {
            return Err(SinkError::TooLarge {
                size,
                limit: MAX_MESSAGE_BYTES,
            });
        }
        Ok((envelope, size))
    }
}

/// Batch request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub batch: Vec<Envelope>,
    pub sent_at: DateTime<Utc>,
}
