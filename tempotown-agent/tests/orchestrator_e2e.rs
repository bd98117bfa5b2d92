//! End-to-end tests against an in-process mock orchestrator.
//!
//! The mock binds a real TCP listener, speaks newline-delimited JSON-RPC,
//! records every method it sees, and answers tool calls from a script.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use tempotown_agent::{
    AgentConfig, AgentController, FeedbackPayload, Message, MessageEvent, MessageRole, Role,
    ToolCall,
};

#[derive(Debug, Clone)]
struct RecordedCall {
    method: String,
    id: Option<i64>,
    tool: Option<String>,
    args: serde_json::Value,
}

#[derive(Default)]
struct OrchestratorState {
    calls: Mutex<Vec<RecordedCall>>,
    feedback_script: Mutex<VecDeque<serde_json::Value>>,
    fail_report_status: AtomicBool,
    conn_tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct MockOrchestrator {
    addr: SocketAddr,
    state: Arc<OrchestratorState>,
    accept_task: JoinHandle<()>,
}

impl MockOrchestrator {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener).await
    }

    /// Rebind on a fixed address; used to simulate an orchestrator restart.
    async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener).await
    }

    async fn serve(listener: TcpListener) -> Self {
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(OrchestratorState::default());
        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let conn_state = Arc::clone(&accept_state);
                let task = tokio::spawn(handle_connection(stream, conn_state));
                accept_state.conn_tasks.lock().unwrap().push(task);
            }
        });
        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// Drop the listener and every live connection.
    fn stop(&self) {
        self.accept_task.abort();
        for task in self.state.conn_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Method names in arrival order, tool calls expanded to the tool name.
    fn call_sequence(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|call| match &call.tool {
                Some(tool) => format!("tools/call:{tool}"),
                None => call.method.clone(),
            })
            .collect()
    }

    fn tool_calls(&self, tool: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.tool.as_deref() == Some(tool))
            .collect()
    }

    fn script_feedback(&self, items: serde_json::Value) {
        self.state
            .feedback_script
            .lock()
            .unwrap()
            .push_back(items);
    }

    fn fail_report_status(&self) {
        self.state.fail_report_status.store(true, Ordering::SeqCst);
    }
}

impl Drop for MockOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, state: Arc<OrchestratorState>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let frame: serde_json::Value = serde_json::from_str(trimmed).unwrap();
        let method = frame["method"].as_str().unwrap_or_default().to_string();
        let id = frame["id"].as_i64();
        let (tool, args) = if method == "tools/call" {
            let tool = frame["params"]["name"].as_str().unwrap_or_default();
            let args: serde_json::Value = frame["params"]["arguments"].clone();
            (Some(tool.to_string()), args)
        } else {
            (None, frame["params"].clone())
        };

        state.calls.lock().unwrap().push(RecordedCall {
            method: method.clone(),
            id,
            tool: tool.clone(),
            args,
        });

        // Notifications get no response.
        let Some(id) = id else {
            continue;
        };

        let result = match method.as_str() {
            "initialize" => serde_json::json!({"protocolVersion": "2024-11-05"}),
            "tools/call" => match tool.as_deref() {
                Some("register_agent") => tool_text(serde_json::json!({"agent_id": "A-1"})),
                Some("report_status") => {
                    if state.fail_report_status.load(Ordering::SeqCst) {
                        serde_json::json!({
                            "content": [{"type": "text", "text": "nope"}],
                            "isError": true,
                        })
                    } else {
                        tool_text(serde_json::json!({"ok": true}))
                    }
                }
                Some("get_pending_feedback") => {
                    let scripted = state.feedback_script.lock().unwrap().pop_front();
                    tool_text(scripted.unwrap_or_else(|| serde_json::json!({"items": []})))
                }
                _ => tool_text(serde_json::json!({})),
            },
            _ => serde_json::Value::Null,
        };

        let response = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result});
        let json = serde_json::to_string(&response).unwrap();
        if write_half.write_all(json.as_bytes()).await.is_err() {
            break;
        }
        if write_half.write_all(b"\n").await.is_err() {
            break;
        }
    }
}

/// Wrap a JSON value as a single-text-block tool result.
fn tool_text(value: serde_json::Value) -> serde_json::Value {
    serde_json::json!({"content": [{"type": "text", "text": value.to_string()}]})
}

struct Running {
    controller: Arc<AgentController>,
    feedback: mpsc::Receiver<FeedbackPayload>,
    events: Option<mpsc::Sender<MessageEvent>>,
    shutdown: watch::Sender<bool>,
    runner: JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(10), self.runner).await;
    }
}

fn launch(cfg: AgentConfig, with_events: bool) -> Running {
    let (controller, feedback) = AgentController::new(cfg);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(64);
    let events = if with_events {
        Some(events_tx)
    } else {
        drop(events_tx);
        None
    };
    let runner = {
        let controller = Arc::clone(&controller);
        let events_rx = if events.is_some() {
            Some(events_rx)
        } else {
            None
        };
        tokio::spawn(async move { controller.run(shutdown_rx, events_rx).await })
    };
    Running {
        controller,
        feedback,
        events,
        shutdown: shutdown_tx,
        runner,
    }
}

fn config_for(addr: SocketAddr) -> AgentConfig {
    AgentConfig {
        endpoint: addr.to_string(),
        role: Role::Coder,
        capabilities: vec!["code".to_string(), "test".to_string()],
        poll_interval_seconds: 1,
    }
}

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn assistant_update(tool_calls: Vec<ToolCall>) -> MessageEvent {
    MessageEvent::Updated(Message {
        id: "m-2".to_string(),
        session_id: "s-1".to_string(),
        role: MessageRole::Assistant,
        content: String::new(),
        tool_calls,
        tool_results: vec![],
    })
}

fn created(role: MessageRole, content: &str) -> MessageEvent {
    MessageEvent::Created(Message {
        id: "m-1".to_string(),
        session_id: "s-1".to_string(),
        role,
        content: content.to_string(),
        tool_calls: vec![],
        tool_results: vec![],
    })
}

fn grep_call(finished: bool) -> ToolCall {
    ToolCall {
        id: "t1".to_string(),
        name: "grep".to_string(),
        input: serde_json::Value::Null,
        finished,
    }
}

#[tokio::test]
async fn happy_path_connects_registers_and_adopts_id() {
    let orchestrator = MockOrchestrator::start().await;
    let running = launch(config_for(orchestrator.addr), false);

    let connected = wait_until(Duration::from_secs(2), || running.controller.is_connected()).await;
    assert!(connected, "must connect within two seconds");

    let sequence = orchestrator.call_sequence();
    assert_eq!(
        &sequence[..3],
        &[
            "initialize".to_string(),
            "initialized".to_string(),
            "tools/call:register_agent".to_string(),
        ],
    );
    assert_eq!(running.controller.agent_id(), "A-1");

    let register = &orchestrator.tool_calls("register_agent")[0];
    assert_eq!(register.args["role"], "coder");
    assert_eq!(register.args["capabilities"], serde_json::json!(["code", "test"]));

    // Handshake request carries an id; the notification does not.
    let calls = orchestrator.calls();
    assert!(calls[0].id.is_some());
    assert!(calls[1].id.is_none());

    running.stop().await;
}

#[tokio::test]
async fn status_projection_reports_in_causal_order() {
    let orchestrator = MockOrchestrator::start().await;
    let running = launch(config_for(orchestrator.addr), true);
    assert!(wait_until(Duration::from_secs(2), || running.controller.is_connected()).await);

    let events = running.events.as_ref().unwrap();
    let script = [
        created(MessageRole::User, "hello"),
        created(MessageRole::Assistant, ""),
        assistant_update(vec![grep_call(false)]),
        assistant_update(vec![grep_call(true)]),
    ];
    for (n, event) in script.into_iter().enumerate() {
        events.send(event).await.unwrap();
        // Wait for each detached report to land so arrival order is causal.
        assert!(
            wait_until(Duration::from_secs(2), || {
                orchestrator.tool_calls("report_status").len() > n
            })
            .await,
            "status report {n} must arrive",
        );
    }

    let statuses: Vec<String> = orchestrator
        .tool_calls("report_status")
        .iter()
        .map(|call| call.args["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        statuses,
        vec![
            "processing user input",
            "generating response",
            "running tool: grep",
            "response complete",
        ],
    );

    let running_tool = &orchestrator.tool_calls("report_status")[2];
    assert_eq!(
        running_tool.args["details"],
        serde_json::json!({"tool": "grep", "tool_id": "t1"}),
    );
    assert_eq!(running_tool.args["progress"], 50);

    running.stop().await;
}

#[tokio::test]
async fn reconnects_and_reregisters_after_peer_restart() {
    let orchestrator = MockOrchestrator::start().await;
    let addr = orchestrator.addr;
    let running = launch(config_for(addr), false);
    assert!(wait_until(Duration::from_secs(2), || running.controller.is_connected()).await);

    // Kill the orchestrator; the agent must notice.
    orchestrator.stop();
    assert!(
        wait_until(Duration::from_secs(10), || !running.controller.is_connected()).await,
        "disconnect must be observed",
    );
    assert!(running.controller.agent_id().is_empty());

    // Bring it back on the same port; the agent must re-register.
    let revived = MockOrchestrator::start_on(addr).await;
    assert!(
        wait_until(Duration::from_secs(10), || running.controller.is_connected()).await,
        "reconnect must happen after the backoff",
    );
    assert_eq!(revived.tool_calls("register_agent").len(), 1);
    assert_eq!(running.controller.agent_id(), "A-1");

    // Ids restart at 1 on the fresh transport.
    assert_eq!(revived.calls()[0].method, "initialize");
    assert_eq!(revived.calls()[0].id, Some(1));

    running.stop().await;
}

#[tokio::test]
async fn feedback_is_delivered_in_order() {
    let orchestrator = MockOrchestrator::start().await;
    orchestrator.script_feedback(serde_json::json!({"items": [
        {"message": "m1", "source": "t"},
        {"message": "m2", "source": "t"},
    ]}));

    let mut running = launch(config_for(orchestrator.addr), false);
    assert!(wait_until(Duration::from_secs(2), || running.controller.is_connected()).await);

    let first = tokio::time::timeout(Duration::from_secs(5), running.feedback.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.message, "m1");
    assert_eq!(first.source, "t");

    let second = tokio::time::timeout(Duration::from_secs(5), running.feedback.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.message, "m2");

    running.stop().await;
}

#[tokio::test]
async fn feedback_overflow_drops_beyond_capacity() {
    let orchestrator = MockOrchestrator::start().await;
    let items: Vec<serde_json::Value> = (1..=20)
        .map(|n| serde_json::json!({"message": format!("m{n}"), "source": "t"}))
        .collect();
    orchestrator.script_feedback(serde_json::json!({"items": items}));

    let mut running = launch(config_for(orchestrator.addr), false);
    assert!(wait_until(Duration::from_secs(2), || running.controller.is_connected()).await);

    // Wait until the oversized batch has been polled and a quiet poll followed.
    assert!(
        wait_until(Duration::from_secs(5), || {
            orchestrator.tool_calls("get_pending_feedback").len() >= 2
        })
        .await,
    );

    let mut received = Vec::new();
    while let Ok(item) = running.feedback.try_recv() {
        received.push(item.message);
    }
    assert_eq!(received.len(), 10, "channel capacity bounds delivery");
    let expected: Vec<String> = (1..=10).map(|n| format!("m{n}")).collect();
    assert_eq!(received, expected);

    running.stop().await;
}

#[tokio::test]
async fn tool_error_on_report_status_leaves_connection_up() {
    let orchestrator = MockOrchestrator::start().await;
    orchestrator.fail_report_status();

    let running = launch(config_for(orchestrator.addr), true);
    assert!(wait_until(Duration::from_secs(2), || running.controller.is_connected()).await);

    running
        .events
        .as_ref()
        .unwrap()
        .send(created(MessageRole::User, "hello"))
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            !orchestrator.tool_calls("report_status").is_empty()
        })
        .await,
    );
    let polls_before = orchestrator.tool_calls("get_pending_feedback").len();

    // Polling continues and the connection stays up after the tool error.
    assert!(
        wait_until(Duration::from_secs(5), || {
            orchestrator.tool_calls("get_pending_feedback").len() > polls_before
        })
        .await,
    );
    assert!(running.controller.is_connected());

    running.stop().await;
}

#[tokio::test]
async fn shutdown_during_handshake_releases_the_socket() {
    // A peer that accepts and reads but never answers, stalling the
    // handshake until the 30 s call timeout.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicBool::new(false));
    let released = Arc::new(AtomicBool::new(false));
    {
        let accepted = Arc::clone(&accepted);
        let released = Arc::clone(&released);
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            accepted.store(true, Ordering::SeqCst);
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            // EOF: the agent gave the socket back.
            released.store(true, Ordering::SeqCst);
        });
    }

    let running = launch(config_for(addr), false);
    assert!(
        wait_until(Duration::from_secs(2), || accepted.load(Ordering::SeqCst)).await,
        "the stalled peer must see the connection",
    );

    let _ = running.shutdown.send(true);
    assert!(
        wait_until(Duration::from_secs(5), || released.load(Ordering::SeqCst)).await,
        "shutdown mid-handshake must close the socket",
    );
    let _ = tokio::time::timeout(Duration::from_secs(10), running.runner)
        .await
        .expect("run() must return despite the stalled handshake");
}

#[tokio::test]
async fn shutdown_closes_transport_and_feedback_channel() {
    let orchestrator = MockOrchestrator::start().await;
    let mut running = launch(config_for(orchestrator.addr), false);
    assert!(wait_until(Duration::from_secs(2), || running.controller.is_connected()).await);

    let controller = Arc::clone(&running.controller);
    let _ = running.shutdown.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(10), running.runner)
        .await
        .expect("run() must return on shutdown");

    assert!(!controller.is_connected());
    assert!(running.feedback.recv().await.is_none());
}
