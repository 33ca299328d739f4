//! Agent module - the boundary to the vendor DRM agent.
//!
//! The agent implements the actual cryptography and license protocol. This
//! crate only consumes it through the [`Agent`] trait. Byte sequences cross
//! the boundary as owned `Bytes`/[`CdmBuffer`] values; there is no
//! allocate-here/free-there protocol.
//!
//! [`StubAgent`] is the in-repo pass-through stand-in used when no vendor
//! agent is linked.

mod stub;

use bytes::Bytes;
use thiserror::Error;

use crate::buffer::CdmBuffer;
use crate::error::Status;
use crate::protocol::{ChallengeParameters, KeyIdInfo};
use crate::session::SessionId;

pub use stub::StubAgent;

/// Result type for agent calls.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Failure reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// Unspecified failure.
    #[error("agent call failed: {0}")]
    Failure(String),

    /// Failure inside the agent itself.
    #[error("agent internal failure")]
    AgentInternal,

    #[error("invalid request type")]
    InvalidRequestType,

    #[error("invalid action id")]
    InvalidActionId,

    #[error("invalid action parameter")]
    InvalidActionParam,

    #[error("invalid response message")]
    InvalidResponseMessage,

    /// Decrypt destination cannot hold the output.
    #[error("destination too small: need {required} bytes, have {available}")]
    DestinationTooSmall { required: usize, available: usize },
}

impl AgentError {
    /// Shorthand for a generic failure.
    pub fn failure(reason: impl Into<String>) -> Self {
        AgentError::Failure(reason.into())
    }

    /// Status code this error surfaces as.
    pub fn status(&self) -> Status {
        match self {
            AgentError::Failure(_) => Status::Unknown,
            AgentError::AgentInternal => Status::AgentFailure,
            AgentError::InvalidRequestType => Status::InvalidRequestType,
            AgentError::InvalidActionId => Status::InvalidActionId,
            AgentError::InvalidActionParam => Status::InvalidActionParam,
            AgentError::InvalidResponseMessage => Status::InvalidResponseMessage,
            AgentError::DestinationTooSmall { .. } => Status::TooSmallBuffer,
        }
    }
}

/// Opaque handle to the initialized agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentHandle(u64);

impl AgentHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque agent-side context for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Outcome of processing a key response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyExchange {
    /// The acquisition protocol is complete.
    Done,
    /// Another round trip is needed; send this request to the server.
    Continue(CdmBuffer),
}

impl KeyExchange {
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, KeyExchange::Done)
    }

    /// The follow-up request, if the exchange must continue.
    pub fn next_request(&self) -> Option<&CdmBuffer> {
        match self {
            KeyExchange::Done => None,
            KeyExchange::Continue(request) => Some(request),
        }
    }
}

/// Pending key-release message queued by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRelease {
    /// Session the released key belonged to.
    pub session_id: SessionId,
    /// Release message to deliver to the server.
    pub message: Bytes,
}

impl KeyRelease {
    pub fn new(session_id: SessionId, message: impl Into<Bytes>) -> Self {
        Self {
            session_id,
            message: message.into(),
        }
    }
}

/// Capability set exposed by the vendor DRM agent.
///
/// Every call is synchronous. Implementations must be safe to call from
/// several threads at once; the engine never serializes calls for different
/// sessions.
pub trait Agent: Send + Sync {
    /// Initialize the agent, returning its handle.
    fn init_agent(&self) -> AgentResult<AgentHandle>;

    /// Finalize the agent.
    fn fin_agent(&self, handle: AgentHandle) -> AgentResult<()>;

    fn increase_ref_count(&self) -> AgentResult<()>;

    fn decrease_ref_count(&self) -> AgentResult<()>;

    /// Current number of engine users tracked by the agent.
    fn ref_count(&self) -> u32;

    /// Whether a usable key exists for `key_id`.
    fn check_key_exist(&self, key_id: &KeyIdInfo) -> AgentResult<bool>;

    /// Create the agent-side context for a new session.
    fn init_session_handle(
        &self,
        agent: AgentHandle,
        session_id: &SessionId,
    ) -> AgentResult<SessionHandle>;

    /// Destroy a session context.
    fn fin_session_handle(&self, handle: SessionHandle) -> AgentResult<()>;

    /// Build the challenge request for a license/permission server.
    fn create_challenge_request(
        &self,
        handle: SessionHandle,
        params: &ChallengeParameters,
    ) -> AgentResult<CdmBuffer>;

    /// Process a server response; decides whether the exchange is complete.
    fn process_response(
        &self,
        handle: SessionHandle,
        response: &CdmBuffer,
        params: Option<&ChallengeParameters>,
    ) -> AgentResult<KeyExchange>;

    /// Drop any pending request state held for the session. Idempotent.
    fn release_request(&self, handle: SessionHandle) -> AgentResult<()>;

    /// Abandon pending protocol state for the session.
    fn cancel_key_request(&self, handle: SessionHandle) -> AgentResult<()>;

    /// Decrypt `src` with the key identified by `key_id`.
    fn decrypt(&self, key_id: &KeyIdInfo, src: &CdmBuffer) -> AgentResult<CdmBuffer>;

    /// Pending key-release messages across all sessions.
    fn key_releases(&self) -> AgentResult<Vec<KeyRelease>>;

    /// Acknowledge that a key-release message was delivered.
    fn commit_key_release(&self, release: &KeyRelease) -> AgentResult<()>;

    /// Return key-release messages obtained from `key_releases`.
    fn free_key_releases(&self, releases: Vec<KeyRelease>) -> AgentResult<()>;
}
