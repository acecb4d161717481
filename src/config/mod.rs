//! Engine configuration.
//!
//! [`EngineConfig`] collects the tunables of a workflow engine. Every field
//! has a default, so a YAML file only needs the values it changes:
//!
//! ```
//! use steadyflow::config::EngineConfig;
//! use std::time::Duration;
//!
//! let config = EngineConfig::from_yaml_str(
//!     "state_key: uploads\nretry:\n  base_delay_ms: 250\n  max_retries: 3\n",
//! )
//! .unwrap();
//! assert_eq!(config.state_key, "uploads");
//! assert_eq!(config.retry.base_delay, Duration::from_millis(250));
//! assert_eq!(config.retry.max_delay, Duration::from_secs(300));
//! assert!(config.auto_resume);
//! ```

mod retry;

pub use retry::RetryPolicy;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, SteadyflowError};

/// Key the registry is persisted under unless configured otherwise.
pub const DEFAULT_STATE_KEY: &str = "WorkflowEngineState";

/// Tunables of a workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryPolicy,

    /// Store key the registry is saved under.
    pub state_key: String,

    /// Resume restored flows as soon as the engine is built.
    pub auto_resume: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            state_key: DEFAULT_STATE_KEY.to_string(),
            auto_resume: true,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Self::parse(content, Path::new("<string>"))
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| SteadyflowError::ConfigParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
