//! Wire types for the MCP subset this client speaks.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// MCP protocol revision understood by the orchestrator.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Params for the `initialize` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client_info: Implementation,
    pub capabilities: ClientCapabilities,
}

/// Identifies this client to the peer.
#[derive(Debug, Serialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Client capabilities. This client advertises none.
#[derive(Debug, Default, Serialize)]
pub struct ClientCapabilities {}

/// Params for `tools/call`.
#[derive(Debug, Serialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Box<RawValue>,
}

/// Result of `tools/call`.
#[derive(Debug, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// One content block in a tool result. Only text blocks carry payload here.
#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}
