//! Session module - session id issuance and session-to-handle mapping.
//!
//! Provides:
//! - [`SessionId`] - decimal text of a 64-bit counter
//! - [`SessionRegistry`] - thread-safe id counter with wraparound
//! - [`SessionMap`] - maps session ids to agent-side handles

mod map;
mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use map::SessionMap;
pub use registry::{SessionRegistry, INITIAL_SESSION_ID};

/// Caller-visible session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric value of the id, if it was issued by a [`SessionRegistry`].
    pub fn counter(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
