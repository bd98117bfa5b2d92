//! Host adapter for the Tempotown orchestrator client.
//!
//! The only crate that knows about the host: it resolves the hook's config
//! section from the host's options blob, subscribes to the host's message
//! stream, and drives the agent controller through the hook lifecycle.

pub mod config;
pub mod hook;

pub use config::{ConfigError, HostConfig};
pub use hook::{Hook, HookError, MessageBus, TempotownHook, HOOK_NAME};
