//! MCP session: handshake and tool invocation.

use tempotown_rpc::{RpcClient, RpcClientError, RPC_TIMEOUT};

use crate::types::{
    ClientCapabilities, Implementation, InitializeParams, ToolCallParams, ToolCallResult,
    PROTOCOL_VERSION,
};

/// Errors from the MCP layer.
///
/// `Rpc` failures are transport or peer-protocol problems; `Tool` is a
/// domain error reported inside a successful `tools/call` response and must
/// not tear the connection down.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error(transparent)]
    Rpc(#[from] RpcClientError),
    #[error("tool error: {message}")]
    Tool { message: String },
    #[error("invalid tool result: {0}")]
    InvalidResult(#[source] serde_json::Error),
    #[error("response carried no result")]
    EmptyResult,
}

/// An initialized MCP session over one transport.
pub struct McpSession {
    client: RpcClient,
}

impl McpSession {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    /// Perform the `initialize` / `initialized` handshake.
    ///
    /// Any failure here is fatal for the current connection attempt.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: Implementation {
                name: "tempotown-agent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ClientCapabilities::default(),
        };
        let params = serde_json::value::to_raw_value(&params).map_err(RpcClientError::Encode)?;
        self.client
            .call("initialize", Some(params), RPC_TIMEOUT)
            .await?;
        self.client.notify("initialized", None).await?;
        Ok(())
    }

    /// Invoke a tool and return the text of its first content block.
    ///
    /// A result with `isError: true` becomes [`McpError::Tool`]; the
    /// connection stays up.
    pub async fn call_tool(
        &self,
        name: &str,
        args: &serde_json::Value,
    ) -> Result<String, McpError> {
        let arguments = serde_json::value::to_raw_value(args).map_err(RpcClientError::Encode)?;
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let params = serde_json::value::to_raw_value(&params).map_err(RpcClientError::Encode)?;

        let raw = self
            .client
            .call("tools/call", Some(params), RPC_TIMEOUT)
            .await?
            .ok_or(McpError::EmptyResult)?;
        let result: ToolCallResult =
            serde_json::from_str(raw.get()).map_err(McpError::InvalidResult)?;

        if result.is_error {
            let message = result
                .content
                .iter()
                .find(|block| block.kind == "text")
                .map(|block| block.text.clone())
                .unwrap_or_else(|| "tool returned an error".to_string());
            return Err(McpError::Tool { message });
        }

        Ok(first_text(&result))
    }

    /// Close the underlying transport.
    pub async fn close(&self) {
        self.client.close().await;
    }

    /// Resolves when the underlying transport is gone.
    pub async fn closed(&self) {
        self.client.closed().await;
    }
}

/// Text of the first text content block, or empty if there is none.
fn first_text(result: &ToolCallResult) -> String {
    result
        .content
        .iter()
        .find(|block| block.kind == "text")
        .map(|block| block.text.clone())
        .unwrap_or_default()
}
