//! Host configuration blob.
//!
//! The host owns one JSON document with a `plugins` object keyed by hook
//! name; each hook deserializes its own section and ignores everything
//! else. Unknown keys inside a section are ignored too, so hosts may carry
//! settings this build does not know about.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Errors from loading or resolving host configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config for hook {hook:?}: {source}")]
    Hook {
        hook: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The host's structured options, as far as hooks are concerned.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub plugins: HashMap<String, serde_json::Value>,
}

impl HostConfig {
    /// Load from a JSON file on disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Deserialize the section for `hook`, or its default when absent.
    pub fn load_config<T>(&self, hook: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        match self.plugins.get(hook) {
            None => Ok(T::default()),
            Some(section) => {
                serde_json::from_value(section.clone()).map_err(|source| ConfigError::Hook {
                    hook: hook.to_string(),
                    source,
                })
            }
        }
    }
}
