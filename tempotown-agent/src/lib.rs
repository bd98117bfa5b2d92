//! Tempotown agent controller.
//!
//! A long-lived, self-healing MCP client that registers this instance with
//! the orchestrator, mirrors host activity as status reports, and polls for
//! out-of-band feedback. The orchestrator being absent or flaky is never
//! visible to the host beyond the connection flag and an empty feedback
//! stream.

pub mod config;
pub mod controller;
pub mod events;
pub mod feedback;
pub mod status;

pub use config::{AgentConfig, Role, DEFAULT_POLL_INTERVAL_SECONDS};
pub use controller::{AgentController, ConnectionState, DIAL_TIMEOUT, RECONNECT_DELAY};
pub use events::{Message, MessageEvent, MessageRole, ToolCall, ToolResult};
pub use feedback::{FeedbackPayload, FEEDBACK_BUFFER, FEEDBACK_POLL_LIMIT};
pub use status::{project, Phase, StatusUpdate};
