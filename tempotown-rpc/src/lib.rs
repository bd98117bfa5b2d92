//! JSON-RPC 2.0 plumbing for the Tempotown orchestrator client.
//!
//! Three layers, composed leaves-first:
//! - [`protocol`]: the message types, with pass-through `RawValue` payloads.
//! - [`transport`]: JSONL framing over async byte streams.
//! - [`client`]: the request/response multiplexer (one reader task, many
//!   concurrent submitters, single-shot delivery slots).

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{RpcClient, RpcClientError, RPC_TIMEOUT};
pub use protocol::{Incoming, Request, Response, RpcErrorObject, JSONRPC_VERSION};
pub use transport::{FrameReader, FrameWriter, TransportError};
