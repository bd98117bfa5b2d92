//! Agent configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default poll cadence for pending feedback.
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;

/// Configuration for one agent instance, read once at construction.
///
/// An empty `endpoint` means the integration is disabled: nothing is
/// constructed and no network activity occurs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Orchestrator address as `host:port`.
    #[serde(default)]
    pub endpoint: String,
    /// Role announced during registration.
    #[serde(default)]
    pub role: Role,
    /// Capability tokens announced during registration.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Seconds between feedback polls. Zero falls back to the default.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            role: Role::default(),
            capabilities: Vec::new(),
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
        }
    }
}

impl AgentConfig {
    /// Whether an endpoint is configured at all.
    pub fn is_enabled(&self) -> bool {
        !self.endpoint.is_empty()
    }

    /// Effective poll interval, never shorter than one second.
    pub fn poll_interval(&self) -> Duration {
        let seconds = match self.poll_interval_seconds {
            0 => DEFAULT_POLL_INTERVAL_SECONDS,
            s => s,
        };
        Duration::from_secs(seconds.max(1))
    }
}

/// The role this instance plays inside the orchestrated fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Coder,
    Reviewer,
    Merger,
    Supervisor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Coder => "coder",
            Role::Reviewer => "reviewer",
            Role::Merger => "merger",
            Role::Supervisor => "supervisor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
