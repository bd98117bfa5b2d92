//! Host message events.
//!
//! The host emits one event per conversational message change; these types
//! model that stream as a first-class capability rather than mirroring any
//! host-internal message type.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// A tool invocation attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub finished: bool,
}

/// The outcome of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Snapshot of a conversational message at event time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
}

/// One observation from the host's message stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum MessageEvent {
    Created(Message),
    Updated(Message),
    Deleted(Message),
}

impl MessageEvent {
    /// The message snapshot carried by this event.
    pub fn message(&self) -> &Message {
        match self {
            MessageEvent::Created(msg) | MessageEvent::Updated(msg) | MessageEvent::Deleted(msg) => {
                msg
            }
        }
    }
}
