//! MCP client layer for the Tempotown orchestrator.
//!
//! Speaks the `initialize` / `initialized` handshake and the `tools/call`
//! method over a [`tempotown_rpc::RpcClient`], translating tool results into
//! plain text and tool-reported failures into domain errors.

pub mod session;
pub mod types;

pub use session::{McpError, McpSession};
pub use types::PROTOCOL_VERSION;
