//! The hook seam between the host and the agent controller.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use tempotown_agent::{AgentConfig, AgentController, FeedbackPayload, MessageEvent};

use crate::config::{ConfigError, HostConfig};

/// Name of this hook in the host's plugin table.
pub const HOOK_NAME: &str = "tempotown";

/// Errors surfaced to the host through the hook lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Lifecycle contract every hook implements for the host.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Stable identifier, also the config section key.
    fn name(&self) -> &str;
    /// Run until [`Hook::stop`] is called.
    async fn start(&self) -> Result<(), HookError>;
    /// Request shutdown. Safe to call before `start` or more than once.
    async fn stop(&self) -> Result<(), HookError>;
}

/// The host's message stream as an abstract capability.
///
/// A host without one (or a surface that cannot subscribe) returns `None`,
/// which disables status projection and nothing else.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn subscribe(&self) -> Option<mpsc::Receiver<MessageEvent>>;
}

/// Hook wiring the agent controller into a host.
pub struct TempotownHook {
    controller: Arc<AgentController>,
    bus: Option<Arc<dyn MessageBus>>,
    feedback: Mutex<Option<mpsc::Receiver<FeedbackPayload>>>,
    shutdown: watch::Sender<bool>,
}

impl TempotownHook {
    /// Build the hook from the host's config blob.
    ///
    /// Returns `Ok(None)` when no endpoint is configured: the feature stays
    /// compiled in but dormant, and nothing touches the network.
    pub fn from_config(
        config: &HostConfig,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> Result<Option<Self>, HookError> {
        let agent_config: AgentConfig = config.load_config(HOOK_NAME)?;
        Ok(Self::new(agent_config, bus))
    }

    /// Build directly from an [`AgentConfig`]; `None` when disabled.
    pub fn new(config: AgentConfig, bus: Option<Arc<dyn MessageBus>>) -> Option<Self> {
        if !config.is_enabled() {
            return None;
        }
        let (controller, feedback_rx) = AgentController::new(config);
        let (shutdown, _) = watch::channel(false);
        Some(Self {
            controller,
            bus,
            feedback: Mutex::new(Some(feedback_rx)),
            shutdown,
        })
    }

    /// The outbound feedback stream. Yields items in orchestrator order and
    /// closes on final shutdown. Can be taken once.
    pub fn take_feedback(&self) -> Option<mpsc::Receiver<FeedbackPayload>> {
        self.feedback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn controller(&self) -> &Arc<AgentController> {
        &self.controller
    }

    pub fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }
}

#[async_trait]
impl Hook for TempotownHook {
    fn name(&self) -> &str {
        HOOK_NAME
    }

    async fn start(&self) -> Result<(), HookError> {
        let events = match &self.bus {
            Some(bus) => bus.subscribe().await,
            None => None,
        };
        Arc::clone(&self.controller)
            .run(self.shutdown.subscribe(), events)
            .await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), HookError> {
        // send_replace stores the value even before anyone subscribed, so
        // stop-before-start still takes effect.
        self.shutdown.send_replace(true);
        Ok(())
    }
}
