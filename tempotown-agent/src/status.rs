//! Projection from host message events to orchestrator status reports.

use serde_json::json;

use crate::events::{MessageEvent, MessageRole};

/// Advisory phase label attached to the agent for human readability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Idle,
    Working,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Idle => "idle",
            Phase::Working => "working",
        }
    }
}

/// One `report_status` payload derived from a message event.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: String,
    pub progress: u8,
    pub details: Option<serde_json::Value>,
    /// Phase transition implied by this update, if any.
    pub phase: Option<Phase>,
}

impl StatusUpdate {
    /// Arguments for the `report_status` tool call.
    pub fn to_args(&self) -> serde_json::Value {
        let mut args = json!({
            "status": self.status,
            "progress": self.progress,
        });
        if let Some(details) = &self.details {
            args["details"] = details.clone();
        }
        args
    }
}

/// Map a message event to a status update.
///
/// Creation of a user message means input is being processed; creation of an
/// assistant message means a response is being generated; an assistant update
/// reports the first unfinished tool call, or completion once every call has
/// finished. Everything else is ignored.
pub fn project(event: &MessageEvent) -> Option<StatusUpdate> {
    match event {
        MessageEvent::Created(msg) => match msg.role {
            MessageRole::User => Some(StatusUpdate {
                status: "processing user input".to_string(),
                progress: 0,
                details: None,
                phase: None,
            }),
            MessageRole::Assistant => Some(StatusUpdate {
                status: "generating response".to_string(),
                progress: 50,
                details: None,
                phase: None,
            }),
            _ => None,
        },
        MessageEvent::Updated(msg) => {
            if msg.role != MessageRole::Assistant {
                return None;
            }
            if let Some(call) = msg.tool_calls.iter().find(|call| !call.finished) {
                return Some(StatusUpdate {
                    status: format!("running tool: {}", call.name),
                    progress: 50,
                    details: Some(json!({"tool": call.name, "tool_id": call.id})),
                    phase: Some(Phase::Working),
                });
            }
            Some(StatusUpdate {
                status: "response complete".to_string(),
                progress: 100,
                details: None,
                phase: Some(Phase::Idle),
            })
        }
        MessageEvent::Deleted(_) => None,
    }
}
