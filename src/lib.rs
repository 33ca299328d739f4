//! # marlin-cdm
//!
//! Content Decryption Module shim for the Marlin DRM scheme.
//!
//! The crate sits between a browser's media-key layer and a vendor DRM
//! agent. It decodes the binary init data the browser hands over, keeps the
//! mapping from session ids to agent session handles, and forwards key
//! exchange and decryption to the agent.
//!
//! ## Architecture
//!
//! - **Protocol**: strict codecs for the key-id info and challenge layouts
//! - **Session**: id allocation and the id to handle map
//! - **Engine**: input validation and agent orchestration
//! - **Host / Interface**: shared, reference-counted engine lifetime
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use marlin_cdm::{CdmInterface, EngineHost};
//!
//! let host = Arc::new(EngineHost::with_stub_agent());
//! let cdm = CdmInterface::acquire(&host).unwrap();
//!
//! let session = cdm.open_session().unwrap();
//! cdm.close_session(&session).unwrap();
//!
//! assert!(cdm.release().unwrap());
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

mod buffer;
mod engine;
mod host;
mod interface;

pub use agent::{
    Agent, AgentError, AgentHandle, AgentResult, KeyExchange, KeyRelease, SessionHandle,
    StubAgent,
};
pub use buffer::CdmBuffer;
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{CdmError, Result, Status};
pub use host::EngineHost;
pub use interface::CdmInterface;
pub use protocol::{ChallengeParameters, KeyIdInfo};
pub use session::SessionId;
