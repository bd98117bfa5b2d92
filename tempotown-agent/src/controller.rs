//! The agent controller: connection supervision, status projection, and
//! feedback polling.
//!
//! Three long-lived tasks run for the controller's lifetime. The supervisor
//! owns the socket and recycles it on failure; the projector and poller
//! consult the connection flag and skip work while disconnected, so the
//! host never observes the orchestrator being absent or flaky.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;

use tempotown_mcp::{McpError, McpSession};
use tempotown_rpc::RpcClient;

use crate::config::AgentConfig;
use crate::events::MessageEvent;
use crate::feedback::{FeedbackBatch, FeedbackPayload, FEEDBACK_BUFFER, FEEDBACK_POLL_LIMIT};
use crate::status::{project, Phase};

/// How long one dial attempt may take.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between the end of one connection and the next attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Recover the guard even if a holder panicked; the protected values stay
/// coherent (plain swaps only).
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Long-lived orchestrator client for one agent instance.
///
/// Construct with [`AgentController::new`], then drive it with
/// [`AgentController::run`]. All state is owned here and shared by `Arc`;
/// there is no global registry.
pub struct AgentController {
    cfg: AgentConfig,
    started: AtomicBool,
    state: AtomicU8,
    session: Mutex<Option<Arc<McpSession>>>,
    agent_id: Mutex<String>,
    phase: Mutex<Phase>,
    current_task: Mutex<Option<String>>,
    feedback_tx: Mutex<Option<mpsc::Sender<FeedbackPayload>>>,
}

impl AgentController {
    /// Create the controller and the outbound feedback channel.
    ///
    /// The receiver lives as long as the controller; it is closed when the
    /// controller shuts down for good.
    pub fn new(cfg: AgentConfig) -> (Arc<Self>, mpsc::Receiver<FeedbackPayload>) {
        let (tx, rx) = mpsc::channel(FEEDBACK_BUFFER);
        let controller = Arc::new(Self {
            cfg,
            started: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            session: Mutex::new(None),
            agent_id: Mutex::new(String::new()),
            phase: Mutex::new(Phase::Init),
            current_task: Mutex::new(None),
            feedback_tx: Mutex::new(Some(tx)),
        });
        (controller, rx)
    }

    /// Run until the shutdown signal flips to `true`.
    ///
    /// Spawns the supervisor, the feedback poller, and (when the host
    /// provides an event stream) the status projector, then waits for all
    /// of them. Calling `run` a second time returns immediately.
    pub async fn run(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
        events: Option<mpsc::Receiver<MessageEvent>>,
    ) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            hook = "tempotown",
            endpoint = %self.cfg.endpoint,
            role = %self.cfg.role,
            "starting orchestrator integration"
        );

        let supervisor = tokio::spawn(Arc::clone(&self).supervise(shutdown.clone()));
        let poller = tokio::spawn(Arc::clone(&self).poll_loop(shutdown.clone()));
        let projector = match events {
            Some(rx) => Some(tokio::spawn(Arc::clone(&self).project_loop(shutdown, rx))),
            None => {
                tracing::warn!(
                    hook = "tempotown",
                    "no message subscriber available, status reporting disabled"
                );
                None
            }
        };

        let _ = supervisor.await;
        let _ = poller.await;
        if let Some(projector) = projector {
            let _ = projector.await;
        }

        // Signals end-of-stream to the feedback consumer.
        lock(&self.feedback_tx).take();
        tracing::info!(hook = "tempotown", "orchestrator integration stopped");
    }

    /// Cheap connection check; true only while a registered session is up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Id assigned by the orchestrator; empty while unregistered.
    pub fn agent_id(&self) -> String {
        lock(&self.agent_id).clone()
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    /// Task id of the most recent feedback item that carried one.
    pub fn current_task(&self) -> Option<String> {
        lock(&self.current_task).clone()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn set_phase(&self, phase: Phase) {
        *lock(&self.phase) = phase;
    }

    fn current_session(&self) -> Option<Arc<McpSession>> {
        lock(&self.session).clone()
    }

    /// Drop the session and the identity that came with it.
    fn clear_connection(&self) {
        *lock(&self.session) = None;
        lock(&self.agent_id).clear();
        self.set_state(ConnectionState::Disconnected);
    }

    // Connection supervisor: dial, handshake, register, serve, back off.
    async fn supervise(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            if let Some(session) = self.connect_once(&mut shutdown).await {
                tokio::select! {
                    _ = session.closed() => {
                        tracing::info!(hook = "tempotown", "connection lost, reconnecting");
                        self.clear_connection();
                    }
                    _ = wait_shutdown(&mut shutdown) => {
                        session.close().await;
                        self.clear_connection();
                        break;
                    }
                }
            } else {
                self.set_state(ConnectionState::Disconnected);
                if *shutdown.borrow() {
                    break;
                }
            }

            if sleep_or_shutdown(&mut shutdown, RECONNECT_DELAY).await {
                break;
            }
        }
        self.clear_connection();
    }

    /// One full connection attempt. Logs and returns `None` on any failure
    /// or on shutdown; the supervisor decides when to retry. A partially
    /// established session is closed before returning, so no socket, reader
    /// task, or pending slot outlives the attempt.
    async fn connect_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Arc<McpSession>> {
        let endpoint = self.cfg.endpoint.as_str();
        let stream = tokio::select! {
            result = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(endpoint)) => {
                match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(err)) => {
                        tracing::warn!(hook = "tempotown", endpoint, error = %err, "dial failed");
                        return None;
                    }
                    Err(_) => {
                        tracing::warn!(hook = "tempotown", endpoint, "dial timed out");
                        return None;
                    }
                }
            }
            _ = wait_shutdown(shutdown) => return None,
        };

        let (read_half, write_half) = stream.into_split();
        let session = Arc::new(McpSession::new(RpcClient::spawn(read_half, write_half)));

        // From here on a reader task and pending slots exist; dropping the
        // handle is not enough, the session must be closed explicitly.
        let established = tokio::select! {
            established = self.establish(&session) => established,
            _ = wait_shutdown(shutdown) => false,
        };
        if !established {
            session.close().await;
            return None;
        }

        *lock(&self.session) = Some(Arc::clone(&session));
        self.set_state(ConnectionState::Connected);
        tracing::info!(
            hook = "tempotown",
            agent_id = %self.agent_id(),
            "connected to orchestrator"
        );
        Some(session)
    }

    /// Handshake then register over a fresh transport.
    async fn establish(&self, session: &McpSession) -> bool {
        if let Err(err) = session.initialize().await {
            tracing::warn!(hook = "tempotown", error = %err, "MCP handshake failed");
            return false;
        }
        if let Err(err) = self.register(session).await {
            tracing::warn!(hook = "tempotown", error = %err, "agent registration failed");
            return false;
        }
        true
    }

    /// Announce role and capabilities; adopt the assigned id when present.
    ///
    /// A result that is not JSON, or JSON without an `agent_id`, still
    /// counts as a successful registration: the orchestrator may assign
    /// no id at all.
    async fn register(&self, session: &McpSession) -> Result<(), McpError> {
        let args = json!({
            "role": self.cfg.role,
            "capabilities": self.cfg.capabilities,
        });
        let text = session.call_tool("register_agent", &args).await?;

        #[derive(Deserialize)]
        struct RegisterResult {
            #[serde(default)]
            agent_id: String,
        }
        if let Ok(result) = serde_json::from_str::<RegisterResult>(&text) {
            if !result.agent_id.is_empty() {
                *lock(&self.agent_id) = result.agent_id;
            }
        }
        self.set_phase(Phase::Idle);
        Ok(())
    }

    // Status projector: consume host events, emit fire-and-forget reports.
    async fn project_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut events: mpsc::Receiver<MessageEvent>,
    ) {
        loop {
            let event = tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_event(event);
        }
    }

    /// Project one event. Never blocks the event stream: the actual RPC is
    /// detached and bounded by the call timeout.
    fn handle_event(&self, event: MessageEvent) {
        let Some(update) = project(&event) else {
            return;
        };
        if let Some(phase) = update.phase {
            self.set_phase(phase);
        }
        if !self.is_connected() {
            return;
        }
        let Some(session) = self.current_session() else {
            return;
        };

        let args = update.to_args();
        let status = update.status;
        tokio::spawn(async move {
            if let Err(err) = session.call_tool("report_status", &args).await {
                tracing::debug!(
                    hook = "tempotown",
                    status = %status,
                    error = %err,
                    "status report failed"
                );
            }
        });
    }

    // Feedback poller: ask for pending signals on a fixed cadence.
    async fn poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            if !self.is_connected() {
                continue;
            }
            let Some(session) = self.current_session() else {
                continue;
            };
            self.poll_once(&session).await;
        }
    }

    async fn poll_once(&self, session: &McpSession) {
        let args = json!({"limit": FEEDBACK_POLL_LIMIT});
        let text = match session.call_tool("get_pending_feedback", &args).await {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(hook = "tempotown", error = %err, "feedback poll failed");
                return;
            }
        };
        let batch: FeedbackBatch = match serde_json::from_str(&text) {
            Ok(batch) => batch,
            Err(err) => {
                tracing::debug!(hook = "tempotown", error = %err, "feedback result not parseable");
                return;
            }
        };
        self.deliver(batch);
    }

    /// Hand a batch to the host, preserving order and dropping on overflow.
    fn deliver(&self, batch: FeedbackBatch) {
        for item in batch.items {
            if let Some(task_id) = &item.task_id {
                *lock(&self.current_task) = Some(task_id.clone());
            }
            let Some(tx) = lock(&self.feedback_tx).clone() else {
                return;
            };
            match tx.try_send(item) {
                Ok(()) => {}
                Err(TrySendError::Full(item)) => {
                    tracing::warn!(
                        hook = "tempotown",
                        source = %item.source,
                        "feedback channel full, dropping"
                    );
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }
}

/// Resolve once the signal flips to `true` (or its sender is gone).
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    loop {
        if shutdown.changed().await.is_err() {
            return;
        }
        if *shutdown.borrow() {
            return;
        }
    }
}

/// Sleep for `delay`, returning `true` if shutdown arrived first.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = wait_shutdown(shutdown) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
