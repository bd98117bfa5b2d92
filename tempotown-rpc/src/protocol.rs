//! JSON-RPC 2.0 message types.
//!
//! Uses `Box<RawValue>` for params/result to avoid early parsing; payloads
//! are passed through untouched and decoded at the layer that knows their
//! shape.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Protocol version string carried in every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound JSON-RPC request or notification.
///
/// A request carries an `id` and expects a response; a notification has no
/// `id` and no response is ever correlated to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
}

impl Request {
    /// Construct a request with the given id.
    pub fn new(id: i64, method: impl Into<String>, params: Option<Box<RawValue>>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Construct a notification (no id, no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Box<RawValue>>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// An inbound frame before correlation.
///
/// The peer may send responses (with `id`) or notifications (with `method`,
/// no `id`); decoding into one permissive shape lets the reader task decide
/// what to do with each frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Incoming {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl Incoming {
    /// Returns true if this frame is a notification from the peer.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Convert into a [`Response`] for delivery to a waiting caller.
    pub fn into_response(self) -> Response {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: self.id,
            result: self.result,
            error: self.error,
        }
    }
}
