//! Error types for marlin-cdm.
//!
//! Every engine operation returns [`Result<T>`]. Callers that need the flat
//! status code exposed to the browser layer use [`CdmError::status`] or
//! [`Status::from_result`].

use thiserror::Error;

use crate::agent::AgentError;
use crate::session::SessionId;

/// Main error type for all CDM operations.
#[derive(Debug, Error)]
pub enum CdmError {
    /// Malformed or missing caller input, including init-data layout violations.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// The session id is unknown or was already closed.
    #[error("Session not opened: {0}")]
    SessionNotOpened(SessionId),

    /// Generic agent failure or internal invariant violation.
    #[error("Unknown error: {0}")]
    Unknown(String),

    /// Specific condition reported by the agent, passed through unchanged.
    #[error("Agent error: {0}")]
    Agent(AgentError),

    /// Invalid engine configuration.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<AgentError> for CdmError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Failure(reason) => CdmError::Unknown(reason),
            specific => CdmError::Agent(specific),
        }
    }
}

impl From<serde_json::Error> for CdmError {
    fn from(err: serde_json::Error) -> Self {
        CdmError::Config(err.to_string())
    }
}

impl From<std::io::Error> for CdmError {
    fn from(err: std::io::Error) -> Self {
        CdmError::Config(err.to_string())
    }
}

impl CdmError {
    /// Flat status code for this error.
    pub fn status(&self) -> Status {
        match self {
            CdmError::IllegalArgument(_) | CdmError::Config(_) => Status::IllegalArgument,
            CdmError::SessionNotOpened(_) => Status::SessionNotOpened,
            CdmError::Unknown(_) => Status::Unknown,
            CdmError::Agent(err) => err.status(),
        }
    }

    pub(crate) fn illegal(msg: impl Into<String>) -> Self {
        CdmError::IllegalArgument(msg.into())
    }

    pub(crate) fn unknown(msg: impl Into<String>) -> Self {
        CdmError::Unknown(msg.into())
    }
}

/// Status code surfaced across the browser-facing boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Unknown,
    IllegalArgument,
    SessionNotOpened,
    InvalidRequestType,
    InvalidActionId,
    InvalidActionParam,
    InvalidResponseMessage,
    AgentFailure,
    TooSmallBuffer,
}

impl Status {
    /// Collapse an operation result into its status code.
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        }
    }

    /// Numeric code as carried over the adapter boundary.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// Result type alias using CdmError.
pub type Result<T> = std::result::Result<T, CdmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_agent_failure_becomes_unknown() {
        let err: CdmError = AgentError::Failure("init".to_string()).into();
        assert!(matches!(err, CdmError::Unknown(_)));
        assert_eq!(err.status(), Status::Unknown);
    }

    #[test]
    fn test_specific_agent_errors_pass_through() {
        let cases = [
            (AgentError::InvalidRequestType, Status::InvalidRequestType),
            (AgentError::InvalidActionId, Status::InvalidActionId),
            (AgentError::InvalidActionParam, Status::InvalidActionParam),
            (AgentError::InvalidResponseMessage, Status::InvalidResponseMessage),
            (AgentError::AgentInternal, Status::AgentFailure),
            (
                AgentError::DestinationTooSmall {
                    required: 10,
                    available: 4,
                },
                Status::TooSmallBuffer,
            ),
        ];

        for (agent_err, status) in cases {
            let err = CdmError::from(agent_err);
            assert!(matches!(err, CdmError::Agent(_)));
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Unknown.code(), 1);
        assert_eq!(Status::IllegalArgument.code(), 2);
        assert_eq!(Status::SessionNotOpened.code(), 3);
    }

    #[test]
    fn test_status_from_result() {
        let ok: Result<()> = Ok(());
        assert_eq!(Status::from_result(&ok), Status::Ok);

        let err: Result<()> = Err(CdmError::SessionNotOpened(SessionId::from("7")));
        assert_eq!(Status::from_result(&err), Status::SessionNotOpened);
    }

    #[test]
    fn test_display_messages() {
        let err = CdmError::SessionNotOpened(SessionId::from("42"));
        assert_eq!(err.to_string(), "Session not opened: 42");

        let err = CdmError::illegal("init data is empty");
        assert!(err.to_string().contains("init data is empty"));
    }
}
