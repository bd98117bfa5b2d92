//! Request/response multiplexer over a JSONL stream.
//!
//! Many callers submit concurrently; one reader task correlates responses
//! back to them through single-shot delivery slots keyed by request id. The
//! write path and the pending map live under one lock since every submit
//! touches both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::value::RawValue;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch, Mutex};

use crate::protocol::{Request, Response};
use crate::transport::{FrameReader, FrameWriter, TransportError};

/// Hard upper bound on how long any single call may wait for its response.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by the submit path.
#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    /// The transport went away (peer reset, EOF, framing failure).
    #[error("transport closed")]
    TransportClosed,
    /// The call did not receive a response within its deadline.
    #[error("request timed out")]
    Timeout,
    /// The client was shut down locally while the call was in flight.
    #[error("cancelled")]
    Cancelled,
    /// The peer answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },
    /// Parameters could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Cancelled,
    TransportClosed,
}

impl CloseReason {
    fn into_error(self) -> RpcClientError {
        match self {
            CloseReason::Cancelled => RpcClientError::Cancelled,
            CloseReason::TransportClosed => RpcClientError::TransportClosed,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct State {
    writer: Option<FrameWriter<BoxedWriter>>,
    pending: HashMap<i64, oneshot::Sender<Response>>,
    close_reason: Option<CloseReason>,
}

struct Shared {
    next_id: AtomicI64,
    state: Mutex<State>,
    orphans: AtomicU64,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    /// Close the transport once. Dropping the pending senders wakes every
    /// submit-path waiter; the stored reason tells them why.
    async fn teardown(&self, reason: CloseReason) {
        let mut state = self.state.lock().await;
        if state.close_reason.is_none() {
            state.close_reason = Some(reason);
        }
        state.writer = None;
        state.pending.clear();
        drop(state);
        // send_replace stores the flag even when nobody subscribed yet.
        self.closed_tx.send_replace(true);
    }

    async fn close_error(&self) -> RpcClientError {
        self.state
            .lock()
            .await
            .close_reason
            .unwrap_or(CloseReason::TransportClosed)
            .into_error()
    }
}

/// Multiplexing JSON-RPC client over one transport.
///
/// Cheap to clone; all clones share the transport, the id counter, and the
/// pending map.
#[derive(Clone)]
pub struct RpcClient {
    shared: Arc<Shared>,
}

impl RpcClient {
    /// Take ownership of a duplex stream's halves and spawn the reader task.
    pub fn spawn<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            next_id: AtomicI64::new(0),
            state: Mutex::new(State {
                writer: Some(FrameWriter::new(Box::new(writer) as BoxedWriter)),
                pending: HashMap::new(),
                close_reason: None,
            }),
            orphans: AtomicU64::new(0),
            closed_tx,
        });

        tokio::spawn(read_loop(Arc::clone(&shared), FrameReader::new(reader)));

        Self { shared }
    }

    /// Submit a request and wait for its response.
    ///
    /// Ids are strictly increasing from 1 for the lifetime of the transport.
    /// `deadline` is capped at [`RPC_TIMEOUT`]. A response that arrives after
    /// the deadline is discarded silently by the reader.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Box<RawValue>>,
        deadline: Duration,
    ) -> Result<Option<Box<RawValue>>, RpcClientError> {
        let deadline = deadline.min(RPC_TIMEOUT);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.shared.state.lock().await;
            if state.writer.is_none() {
                return Err(state
                    .close_reason
                    .unwrap_or(CloseReason::TransportClosed)
                    .into_error());
            }
            state.pending.insert(id, tx);

            let request = Request::new(id, method, params);
            let write_result = match state.writer.as_mut() {
                // Checked non-None above; the lock has not been released since.
                Some(writer) => writer.write_frame(&request).await,
                None => Err(TransportError::Closed),
            };
            if let Err(err) = write_result {
                tracing::warn!(method, error = %err, "request write failed");
                state.writer = None;
                state.close_reason = Some(CloseReason::TransportClosed);
                state.pending.clear();
                drop(state);
                self.shared.closed_tx.send_replace(true);
                return Err(RpcClientError::TransportClosed);
            }
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => match response.error {
                Some(err) => Err(RpcClientError::Rpc {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(response.result),
            },
            // Slot dropped by teardown before delivery.
            Ok(Err(_)) => Err(self.shared.close_error().await),
            Err(_) => {
                self.shared.state.lock().await.pending.remove(&id);
                Err(RpcClientError::Timeout)
            }
        }
    }

    /// Send a notification. No id is allocated and no response is awaited.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<Box<RawValue>>,
    ) -> Result<(), RpcClientError> {
        let mut state = self.shared.state.lock().await;
        if state.writer.is_none() {
            return Err(state
                .close_reason
                .unwrap_or(CloseReason::TransportClosed)
                .into_error());
        }
        let notification = Request::notification(method, params);
        let write_result = match state.writer.as_mut() {
            Some(writer) => writer.write_frame(&notification).await,
            None => Err(TransportError::Closed),
        };
        if let Err(err) = write_result {
            tracing::warn!(method, error = %err, "notification write failed");
            state.writer = None;
            state.close_reason = Some(CloseReason::TransportClosed);
            state.pending.clear();
            drop(state);
            self.shared.closed_tx.send_replace(true);
            return Err(RpcClientError::TransportClosed);
        }
        Ok(())
    }

    /// Close the transport locally. In-flight calls fail with `Cancelled`.
    pub async fn close(&self) {
        self.shared.teardown(CloseReason::Cancelled).await;
    }

    /// Resolves once the transport is gone, whichever side ended it.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        closed_signal(&mut rx).await;
    }

    /// Number of requests currently awaiting a response.
    pub async fn in_flight(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    /// Responses received whose id matched no pending request.
    pub fn orphan_count(&self) -> u64 {
        self.shared.orphans.load(Ordering::Relaxed)
    }
}

/// Resolve once the closed flag flips to `true`.
async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    if *closed.borrow() {
        return;
    }
    while closed.changed().await.is_ok() {
        if *closed.borrow() {
            return;
        }
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut reader: FrameReader<R>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut closed = shared.closed_tx.subscribe();
    loop {
        let frame = tokio::select! {
            frame = reader.read_frame() => frame,
            // Exit on local close as well, releasing the read half instead
            // of waiting for the peer to hang up.
            _ = closed_signal(&mut closed) => break,
        };
        match frame {
            Ok(frame) => {
                if frame.is_notification() {
                    tracing::debug!(method = ?frame.method, "ignoring peer notification");
                    continue;
                }
                // is_notification() returned false, so the id is present.
                let id = frame.id.unwrap_or(0);
                let slot = shared.state.lock().await.pending.remove(&id);
                match slot {
                    Some(tx) => {
                        // A send failure means the caller already gave up
                        // (timeout or cancellation); discard silently.
                        let _ = tx.send(frame.into_response());
                    }
                    None => {
                        shared.orphans.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(id, "response with no pending request");
                    }
                }
            }
            Err(TransportError::Closed) => break,
            Err(err) => {
                tracing::warn!(error = %err, "transport read failed");
                break;
            }
        }
    }
    shared.teardown(CloseReason::TransportClosed).await;
}
