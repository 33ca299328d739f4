//! Engine configuration.
//!
//! Loaded from JSON; every field is optional and falls back to its default.
//!
//! # Example
//!
//! ```
//! use marlin_cdm::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{ "initial_session_id": 100 }"#).unwrap();
//! assert_eq!(config.initial_session_id, 100);
//! assert!(config.finalize_sessions_on_drop);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CdmError, Result};
use crate::session::INITIAL_SESSION_ID;

/// Tunables for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// First session id handed out. Must be positive.
    pub initial_session_id: i64,
    /// Finalize still-open sessions when the engine shuts down.
    pub finalize_sessions_on_drop: bool,
    /// Retry parked session finalizations on every `close_session`.
    pub retry_cleanup_on_close: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_session_id: INITIAL_SESSION_ID,
            finalize_sessions_on_drop: true,
            retry_cleanup_on_close: true,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded engine config");
        Self::from_json(&json)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.initial_session_id <= 0 {
            return Err(CdmError::Config(format!(
                "initial_session_id must be positive, got {}",
                self.initial_session_id
            )));
        }
        Ok(())
    }
}
