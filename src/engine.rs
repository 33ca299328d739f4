//! Engine builder and session orchestration.
//!
//! The [`Engine`] validates caller input, decodes init data, keeps the
//! session map, and forwards each operation to the [`Agent`]. It does not
//! serialize calls for the same session id; callers must not run concurrent
//! operations on one session.
//!
//! An engine runs until [`Engine::shutdown`] or drop, whichever comes first.
//! Shutdown finalizes sessions and the agent exactly once; afterwards every
//! operation fails with `Unknown`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use marlin_cdm::{Engine, StubAgent};
//!
//! let engine = Engine::builder()
//!     .agent(Arc::new(StubAgent::new()))
//!     .build()
//!     .unwrap();
//!
//! let session = engine.open_session().unwrap();
//! assert_eq!(session.as_str(), "1");
//! engine.close_session(&session).unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::agent::{Agent, AgentError, AgentHandle, KeyExchange, KeyRelease, SessionHandle, StubAgent};
use crate::buffer::CdmBuffer;
use crate::config::EngineConfig;
use crate::error::{CdmError, Result};
use crate::protocol::{ChallengeParameters, KeyIdInfo};
use crate::session::{SessionId, SessionMap, SessionRegistry};

/// Builder for configuring and creating an [`Engine`].
pub struct EngineBuilder {
    agent: Option<Arc<dyn Agent>>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Create a new engine builder.
    pub fn new() -> Self {
        Self {
            agent: None,
            config: EngineConfig::default(),
        }
    }

    /// Set the agent the engine forwards to.
    ///
    /// Default: [`StubAgent`]
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the first session id handed out.
    ///
    /// Default: 1
    pub fn initial_session_id(mut self, id: i64) -> Self {
        self.config.initial_session_id = id;
        self
    }

    /// Finalize open sessions when the engine shuts down.
    ///
    /// Default: true
    pub fn finalize_sessions_on_drop(mut self, enabled: bool) -> Self {
        self.config.finalize_sessions_on_drop = enabled;
        self
    }

    /// Build the engine, initializing the agent.
    pub fn build(self) -> Result<Engine> {
        let agent = self
            .agent
            .unwrap_or_else(|| Arc::new(StubAgent::new()) as Arc<dyn Agent>);
        Engine::new(agent, self.config)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Session handle whose agent-side finalization failed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingCleanup {
    session_id: SessionId,
    handle: SessionHandle,
}

/// State guarded by the engine lock.
#[derive(Debug, Default)]
struct EngineState {
    sessions: SessionMap,
    /// Closed sessions the agent still has to finalize.
    pending_cleanup: Vec<PendingCleanup>,
}

/// Key-session engine in front of a DRM agent.
pub struct Engine {
    agent: Arc<dyn Agent>,
    agent_handle: AgentHandle,
    registry: SessionRegistry,
    state: Mutex<EngineState>,
    /// `true` until shutdown. Operations hold a read guard for their whole
    /// duration so shutdown never races an in-flight agent call.
    live: RwLock<bool>,
    config: EngineConfig,
}

impl Engine {
    /// Create a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Validate `config` and initialize `agent`.
    pub fn new(agent: Arc<dyn Agent>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let agent_handle = agent
            .init_agent()
            .map_err(|e| agent_error("init_agent", e))?;
        tracing::debug!(agent_handle = agent_handle.raw(), "Engine initialized");

        Ok(Self {
            agent,
            agent_handle,
            registry: SessionRegistry::starting_at(config.initial_session_id),
            state: Mutex::new(EngineState::default()),
            live: RwLock::new(true),
            config,
        })
    }

    /// Finalize the engine: open sessions (if configured), parked cleanups,
    /// then the agent.
    ///
    /// Waits for in-flight operations. Returns `false` if the engine was
    /// already shut down.
    pub fn shutdown(&self) -> bool {
        let mut live = self.live.write();
        if !*live {
            return false;
        }
        *live = false;

        let leftover: Vec<PendingCleanup> = {
            let mut state = self.state.lock();
            let pending = std::mem::take(&mut state.pending_cleanup);
            if self.config.finalize_sessions_on_drop {
                state
                    .sessions
                    .drain()
                    .into_iter()
                    .map(|(session_id, handle)| PendingCleanup { session_id, handle })
                    .chain(pending)
                    .collect()
            } else {
                state.sessions.drain();
                pending
            }
        };

        for entry in leftover {
            if let Err(e) = self.agent.fin_session_handle(entry.handle) {
                tracing::warn!(
                    session_id = %entry.session_id,
                    error = %e,
                    "Failed to finalize session on shutdown"
                );
            }
        }

        if let Err(e) = self.agent.fin_agent(self.agent_handle) {
            tracing::error!(error = %e, "Agent finalization failed");
        }
        tracing::debug!("Engine finalized");
        true
    }

    /// Whether [`shutdown`](Self::shutdown) has not run yet.
    pub fn is_live(&self) -> bool {
        *self.live.read()
    }

    /// Check whether the agent holds a key for the Layout A `init_data`.
    pub fn check_key_exist(&self, init_data: &[u8]) -> Result<bool> {
        let _live = self.running()?;

        if init_data.is_empty() {
            return Err(CdmError::illegal("Init data is empty"));
        }

        let key_id = KeyIdInfo::decode(init_data).map_err(decode_error)?;

        self.agent
            .check_key_exist(&key_id)
            .map_err(|e| agent_error("check_key_exist", e))
    }

    /// Open a new session and return its id.
    pub fn open_session(&self) -> Result<SessionId> {
        let _live = self.running()?;

        let session_id = self.registry.next_id()?;

        if self.state.lock().sessions.contains(&session_id) {
            tracing::error!(session_id = %session_id, "Issued session id is still open");
            return Err(CdmError::unknown(format!(
                "Session id {} is still open",
                session_id
            )));
        }

        let handle = self
            .agent
            .init_session_handle(self.agent_handle, &session_id)
            .map_err(|e| agent_error("init_session_handle", e))?;

        let inserted = self.state.lock().sessions.insert(session_id.clone(), handle);
        if let Err(e) = inserted {
            // Lost a race for a wrapped id; the fresh handle is never reachable.
            tracing::error!(session_id = %session_id, "Session id collision on insert");
            if let Err(fin) = self.agent.fin_session_handle(handle) {
                tracing::warn!(error = %fin, "Failed to finalize orphaned session handle");
            }
            return Err(e);
        }

        tracing::debug!(session_id = %session_id, "Session opened");
        Ok(session_id)
    }

    /// Close a session.
    ///
    /// The session is removed even if the agent fails to finalize its
    /// handle; the handle is then parked for [`retry_pending_cleanup`]
    /// and the agent error is returned.
    ///
    /// [`retry_pending_cleanup`]: Self::retry_pending_cleanup
    pub fn close_session(&self, session_id: &SessionId) -> Result<()> {
        let _live = self.running()?;

        let handle = self
            .state
            .lock()
            .sessions
            .remove(session_id)
            .ok_or_else(|| not_opened(session_id))?;

        if self.config.retry_cleanup_on_close {
            self.retry_parked();
        }

        if let Err(e) = self.agent.fin_session_handle(handle) {
            self.state.lock().pending_cleanup.push(PendingCleanup {
                session_id: session_id.clone(),
                handle,
            });
            return Err(agent_error("fin_session_handle", e));
        }

        tracing::debug!(session_id = %session_id, "Session closed");
        Ok(())
    }

    /// Build a key request from Layout B `init_data`.
    pub fn generate_key_request(
        &self,
        session_id: &SessionId,
        init_data: &[u8],
    ) -> Result<CdmBuffer> {
        let _live = self.running()?;

        if init_data.is_empty() {
            return Err(CdmError::illegal("Init data is empty"));
        }

        let handle = self.session_handle(session_id)?;
        let params = ChallengeParameters::decode(init_data).map_err(decode_error)?;

        match self.agent.create_challenge_request(handle, &params) {
            Ok(request) => {
                tracing::debug!(
                    session_id = %session_id,
                    request_len = request.len(),
                    "Key request generated"
                );
                Ok(request)
            }
            Err(e) => {
                self.release_request_quietly(handle);
                Err(agent_error("create_challenge_request", e))
            }
        }
    }

    /// Feed a server response into the session's key exchange.
    ///
    /// `init_data`, when present, is a Layout B buffer for the next step.
    pub fn add_key(
        &self,
        session_id: &SessionId,
        key_response: &CdmBuffer,
        init_data: Option<&[u8]>,
    ) -> Result<KeyExchange> {
        let _live = self.running()?;

        let handle = self.session_handle(session_id)?;

        self.agent
            .release_request(handle)
            .map_err(|e| agent_error("release_request", e))?;

        let params = init_data
            .map(ChallengeParameters::decode)
            .transpose()
            .map_err(decode_error)?;

        match self
            .agent
            .process_response(handle, key_response, params.as_ref())
        {
            Ok(exchange) => {
                tracing::debug!(
                    session_id = %session_id,
                    done = exchange.is_done(),
                    "Key response processed"
                );
                Ok(exchange)
            }
            Err(e) => {
                self.release_request_quietly(handle);
                Err(agent_error("process_response", e))
            }
        }
    }

    /// Abandon the session's pending key exchange.
    pub fn cancel_key_request(&self, session_id: &SessionId) -> Result<()> {
        let _live = self.running()?;

        let handle = self.session_handle(session_id)?;

        self.agent
            .release_request(handle)
            .map_err(|e| agent_error("release_request", e))?;
        self.agent
            .cancel_key_request(handle)
            .map_err(|e| agent_error("cancel_key_request", e))
    }

    /// Decrypt `src` using the key named by Layout A `init_data`.
    pub fn decrypt(&self, init_data: &[u8], src: &CdmBuffer) -> Result<CdmBuffer> {
        let _live = self.running()?;

        if init_data.is_empty() {
            return Err(CdmError::illegal("Init data is empty"));
        }
        if src.is_empty() {
            return Err(CdmError::illegal("Source buffer is empty"));
        }

        let key_id = KeyIdInfo::decode(init_data).map_err(decode_error)?;

        self.agent
            .decrypt(&key_id, src)
            .map_err(|e| agent_error("decrypt", e))
    }

    /// Key-release messages queued by the agent across all sessions.
    pub fn key_releases(&self) -> Result<Vec<KeyRelease>> {
        let _live = self.running()?;

        self.agent
            .key_releases()
            .map_err(|e| agent_error("key_releases", e))
    }

    /// Acknowledge delivery of a key-release message.
    pub fn commit_key_release(&self, release: &KeyRelease) -> Result<()> {
        let _live = self.running()?;

        if release.session_id.is_empty() {
            return Err(CdmError::illegal("Key release has no session id"));
        }
        self.agent
            .commit_key_release(release)
            .map_err(|e| agent_error("commit_key_release", e))
    }

    /// Hand key-release messages back to the agent.
    pub fn free_key_releases(&self, releases: Vec<KeyRelease>) -> Result<()> {
        let _live = self.running()?;

        self.agent
            .free_key_releases(releases)
            .map_err(|e| agent_error("free_key_releases", e))
    }

    /// Retry agent finalization of closed sessions whose cleanup failed.
    ///
    /// Returns the number of handles still pending. A shut-down engine has
    /// none.
    pub fn retry_pending_cleanup(&self) -> usize {
        match self.running() {
            Ok(_live) => self.retry_parked(),
            Err(_) => 0,
        }
    }

    /// Caller holds the live guard.
    fn retry_parked(&self) -> usize {
        let pending = std::mem::take(&mut self.state.lock().pending_cleanup);
        if pending.is_empty() {
            return 0;
        }

        let failed: Vec<PendingCleanup> = pending
            .into_iter()
            .filter(|entry| match self.agent.fin_session_handle(entry.handle) {
                Ok(()) => {
                    tracing::debug!(session_id = %entry.session_id, "Deferred session cleanup done");
                    false
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %entry.session_id,
                        error = %e,
                        "Deferred session cleanup failed"
                    );
                    true
                }
            })
            .collect();

        let mut state = self.state.lock();
        state.pending_cleanup.extend(failed);
        state.pending_cleanup.len()
    }

    /// Number of closed sessions awaiting agent finalization.
    pub fn pending_cleanup_count(&self) -> usize {
        self.state.lock().pending_cleanup.len()
    }

    /// Whether `session_id` is currently open.
    pub fn is_session_open(&self, session_id: &SessionId) -> bool {
        self.state.lock().sessions.contains(session_id)
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle returned by the agent's `init_agent`.
    pub fn agent_handle(&self) -> AgentHandle {
        self.agent_handle
    }

    fn running(&self) -> Result<RwLockReadGuard<'_, bool>> {
        // Recursive: an agent may call back into the engine mid-operation.
        let live = self.live.read_recursive();
        if !*live {
            tracing::debug!("Operation on shut-down engine");
            return Err(CdmError::unknown("Engine is shut down"));
        }
        Ok(live)
    }

    #[cfg(test)]
    pub(crate) fn rewind_session_ids(&self, next: i64) {
        self.registry.rewind(next);
    }

    fn session_handle(&self, session_id: &SessionId) -> Result<SessionHandle> {
        self.state
            .lock()
            .sessions
            .lookup(session_id)
            .ok_or_else(|| not_opened(session_id))
    }

    fn release_request_quietly(&self, handle: SessionHandle) {
        if let Err(e) = self.agent.release_request(handle) {
            tracing::warn!(error = %e, "Failed to release pending request");
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("agent_handle", &self.agent_handle)
            .field("registry", &self.registry)
            .field("state", &*self.state.lock())
            .field("live", &self.is_live())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn agent_error(op: &'static str, err: AgentError) -> CdmError {
    tracing::error!(op, error = %err, "Agent call failed");
    err.into()
}

fn decode_error(err: CdmError) -> CdmError {
    tracing::debug!(error = %err, "Init data rejected");
    err
}

fn not_opened(session_id: &SessionId) -> CdmError {
    tracing::debug!(session_id = %session_id, "Session is not opened");
    CdmError::SessionNotOpened(session_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use crate::testing::{AgentOp, MockAgent};

    fn engine_with(agent: &Arc<MockAgent>) -> Engine {
        Engine::builder()
            .agent(agent.clone() as Arc<dyn Agent>)
            .build()
            .unwrap()
    }

    fn pssh_init_data() -> Vec<u8> {
        vec![0x01, 0x00, 0x00, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]
    }

    fn challenge_init_data() -> Vec<u8> {
        let mut buf = vec![0x01, 0x01, 0x00];
        buf.extend_from_slice(&[0u8; 28 + 16]);
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(b"uri");
        buf.extend_from_slice(&[0x01, 0, 0, 0, 1, 0x42]);
        buf
    }

    #[test]
    fn test_builder_defaults_to_stub_agent() {
        let engine = Engine::builder().build().unwrap();
        assert_eq!(engine.open_session().unwrap().as_str(), "1");
        assert_eq!(engine.config(), &EngineConfig::default());
    }

    #[test]
    fn test_builder_configuration() {
        let engine = Engine::builder()
            .initial_session_id(500)
            .finalize_sessions_on_drop(false)
            .build()
            .unwrap();
        assert_eq!(engine.config().initial_session_id, 500);
        assert!(!engine.config().finalize_sessions_on_drop);
        assert_eq!(engine.open_session().unwrap().as_str(), "500");
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = Engine::builder().initial_session_id(-1).build();
        assert!(matches!(result, Err(CdmError::Config(_))));
    }

    #[test]
    fn test_init_agent_failure() {
        let agent = Arc::new(MockAgent::new());
        agent.fail(AgentOp::InitAgent, AgentError::failure("boom"));
        let result = Engine::builder().agent(agent.clone() as Arc<dyn Agent>).build();
        assert!(matches!(result, Err(CdmError::Unknown(_))));
    }

    #[test]
    fn test_open_sessions_are_sequential() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);

        assert_eq!(engine.open_session().unwrap().as_str(), "1");
        assert_eq!(engine.open_session().unwrap().as_str(), "2");
        assert_eq!(engine.session_count(), 2);
    }

    #[test]
    fn test_open_session_agent_failure_not_inserted() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        agent.fail(AgentOp::InitSessionHandle, AgentError::failure("no slots"));

        let err = engine.open_session().unwrap_err();
        assert_eq!(err.status(), Status::Unknown);
        assert_eq!(engine.session_count(), 0);
        assert!(!engine.is_session_open(&SessionId::from("1")));
    }

    #[test]
    fn test_open_session_rejects_wrapped_id_still_open() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let first = engine.open_session().unwrap();

        // Counter wraps to 1 while session "1" is still open.
        engine.rewind_session_ids(i64::MAX);
        let err = engine.open_session().unwrap_err();
        assert_eq!(err.status(), Status::Unknown);
        assert_eq!(engine.session_count(), 1);
        assert!(engine.is_session_open(&first));
        assert_eq!(agent.count(AgentOp::InitSessionHandle), 1);

        assert_eq!(engine.open_session().unwrap().as_str(), "2");
    }

    #[test]
    fn test_open_session_collision_on_insert_finalizes_handle() {
        let agent = Arc::new(MockAgent::new());
        let engine = Arc::new(engine_with(&agent));

        // Another open for the same id lands while the agent is busy.
        let weak = Arc::downgrade(&engine);
        agent.on_next_session_init(move || {
            if let Some(engine) = weak.upgrade() {
                engine.rewind_session_ids(1);
                engine.open_session().unwrap();
            }
        });

        let err = engine.open_session().unwrap_err();
        assert_eq!(err.status(), Status::Unknown);
        assert_eq!(engine.session_count(), 1);
        assert!(engine.is_session_open(&SessionId::from("1")));
        assert_eq!(agent.count(AgentOp::InitSessionHandle), 2);
        assert_eq!(agent.count(AgentOp::FinSessionHandle), 1);
    }

    #[test]
    fn test_shutdown_finalizes_once_and_rejects_operations() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let open = engine.open_session().unwrap();
        let parked = engine.open_session().unwrap();
        agent.fail(AgentOp::FinSessionHandle, AgentError::failure("busy"));
        assert!(engine.close_session(&parked).is_err());
        agent.clear_failure(AgentOp::FinSessionHandle);

        assert!(engine.shutdown());
        assert!(!engine.is_live());
        assert_eq!(engine.session_count(), 0);
        assert_eq!(engine.pending_cleanup_count(), 0);
        // One failed close, then the open and the parked session.
        assert_eq!(agent.count(AgentOp::FinSessionHandle), 3);
        assert_eq!(agent.count(AgentOp::FinAgent), 1);

        assert!(!engine.shutdown());
        assert_eq!(
            engine.close_session(&open).unwrap_err().status(),
            Status::Unknown
        );
        assert_eq!(
            engine.check_key_exist(&pssh_init_data()).unwrap_err().status(),
            Status::Unknown
        );
        assert!(engine.key_releases().is_err());
        assert_eq!(engine.retry_pending_cleanup(), 0);

        drop(engine);
        assert_eq!(agent.count(AgentOp::FinAgent), 1);
    }

    #[test]
    fn test_close_session_twice() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let id = engine.open_session().unwrap();

        engine.close_session(&id).unwrap();
        let err = engine.close_session(&id).unwrap_err();
        assert!(matches!(err, CdmError::SessionNotOpened(ref s) if s == &id));
        assert_eq!(agent.count(AgentOp::FinSessionHandle), 1);
    }

    #[test]
    fn test_close_failure_parks_handle() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let id = engine.open_session().unwrap();

        agent.fail(AgentOp::FinSessionHandle, AgentError::failure("busy"));
        let err = engine.close_session(&id).unwrap_err();
        assert_eq!(err.status(), Status::Unknown);

        // Mapping is gone even though the agent failed.
        assert!(!engine.is_session_open(&id));
        assert_eq!(engine.pending_cleanup_count(), 1);
        assert!(matches!(
            engine.close_session(&id),
            Err(CdmError::SessionNotOpened(_))
        ));

        // Still failing: stays parked.
        assert_eq!(engine.retry_pending_cleanup(), 1);

        agent.clear_failure(AgentOp::FinSessionHandle);
        assert_eq!(engine.retry_pending_cleanup(), 0);
        assert_eq!(engine.pending_cleanup_count(), 0);
    }

    #[test]
    fn test_close_retries_parked_cleanup() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let first = engine.open_session().unwrap();
        let second = engine.open_session().unwrap();

        agent.fail(AgentOp::FinSessionHandle, AgentError::failure("busy"));
        assert!(engine.close_session(&first).is_err());
        agent.clear_failure(AgentOp::FinSessionHandle);

        engine.close_session(&second).unwrap();
        assert_eq!(engine.pending_cleanup_count(), 0);
    }

    #[test]
    fn test_check_key_exist() {
        let agent = Arc::new(MockAgent::new());
        agent.set_key_exists(true);
        let engine = engine_with(&agent);

        assert!(engine.check_key_exist(&pssh_init_data()).unwrap());
        let seen = agent.last_key_id().unwrap();
        assert_eq!(&seen.data[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_check_key_exist_rejects_bad_input() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);

        assert_eq!(
            engine.check_key_exist(&[]).unwrap_err().status(),
            Status::IllegalArgument
        );
        assert_eq!(
            engine
                .check_key_exist(&[0x01, 0, 0, 0, 9, 1])
                .unwrap_err()
                .status(),
            Status::IllegalArgument
        );
        // Agent never consulted for malformed input.
        assert_eq!(agent.count(AgentOp::CheckKeyExist), 0);
    }

    #[test]
    fn test_generate_key_request() {
        let agent = Arc::new(MockAgent::new());
        agent.set_challenge(CdmBuffer::from(b"challenge".to_vec()));
        let engine = engine_with(&agent);
        let id = engine.open_session().unwrap();

        let request = engine
            .generate_key_request(&id, &challenge_init_data())
            .unwrap();
        assert_eq!(request.as_slice(), b"challenge");

        let params = agent.last_challenge().unwrap();
        assert_eq!(&params.server_uri[..], b"uri");
        assert_eq!(&params.key_id_info.data[..], &[0x42]);
    }

    #[test]
    fn test_generate_key_request_checks_session_before_decoding() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);

        let err = engine
            .generate_key_request(&SessionId::from("9"), &[0xFF])
            .unwrap_err();
        assert!(matches!(err, CdmError::SessionNotOpened(_)));
    }

    #[test]
    fn test_generate_key_request_failure_releases_request() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let id = engine.open_session().unwrap();
        agent.fail(AgentOp::CreateChallengeRequest, AgentError::InvalidActionId);

        let err = engine
            .generate_key_request(&id, &challenge_init_data())
            .unwrap_err();
        assert_eq!(err.status(), Status::InvalidActionId);
        assert_eq!(agent.count(AgentOp::ReleaseRequest), 1);
    }

    #[test]
    fn test_add_key_releases_pending_request_first() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let id = engine.open_session().unwrap();

        let exchange = engine
            .add_key(&id, &CdmBuffer::from(b"response".to_vec()), None)
            .unwrap();
        assert!(exchange.is_done());

        let calls = agent.calls();
        let release_at = calls.iter().position(|c| *c == AgentOp::ReleaseRequest);
        let process_at = calls.iter().position(|c| *c == AgentOp::ProcessResponse);
        assert!(release_at.unwrap() < process_at.unwrap());
        assert!(agent.last_response_had_params() == Some(false));
    }

    #[test]
    fn test_add_key_multi_step() {
        let agent = Arc::new(MockAgent::new());
        agent.set_rounds(2);
        let engine = engine_with(&agent);
        let id = engine.open_session().unwrap();
        let response = CdmBuffer::from(b"response".to_vec());
        let init = challenge_init_data();

        let first = engine.add_key(&id, &response, Some(&init)).unwrap();
        assert!(!first.is_done());
        assert!(first.next_request().is_some());
        assert_eq!(agent.last_response_had_params(), Some(true));

        let second = engine.add_key(&id, &response, None).unwrap();
        assert!(second.is_done());
    }

    #[test]
    fn test_add_key_bad_init_data() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let id = engine.open_session().unwrap();

        let err = engine
            .add_key(&id, &CdmBuffer::from(b"r".to_vec()), Some(&[0x01, 0x02]))
            .unwrap_err();
        assert_eq!(err.status(), Status::IllegalArgument);
        assert_eq!(agent.count(AgentOp::ProcessResponse), 0);
    }

    #[test]
    fn test_add_key_invalid_response_passes_through() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let id = engine.open_session().unwrap();
        agent.fail(AgentOp::ProcessResponse, AgentError::InvalidResponseMessage);

        let err = engine
            .add_key(&id, &CdmBuffer::from(b"garbage".to_vec()), None)
            .unwrap_err();
        assert_eq!(err.status(), Status::InvalidResponseMessage);
        // Once before processing, once after the failure.
        assert_eq!(agent.count(AgentOp::ReleaseRequest), 2);
    }

    #[test]
    fn test_cancel_key_request() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let id = engine.open_session().unwrap();

        engine.cancel_key_request(&id).unwrap();
        assert_eq!(agent.count(AgentOp::ReleaseRequest), 1);
        assert_eq!(agent.count(AgentOp::CancelKeyRequest), 1);

        agent.fail(AgentOp::ReleaseRequest, AgentError::failure("x"));
        assert_eq!(
            engine.cancel_key_request(&id).unwrap_err().status(),
            Status::Unknown
        );
        // Cancel is not attempted when the release fails.
        assert_eq!(agent.count(AgentOp::CancelKeyRequest), 1);
    }

    #[test]
    fn test_session_ops_on_unknown_id() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let ghost = SessionId::from("404");
        let response = CdmBuffer::from(b"r".to_vec());

        assert!(matches!(
            engine.generate_key_request(&ghost, &challenge_init_data()),
            Err(CdmError::SessionNotOpened(_))
        ));
        assert!(matches!(
            engine.add_key(&ghost, &response, None),
            Err(CdmError::SessionNotOpened(_))
        ));
        assert!(matches!(
            engine.cancel_key_request(&ghost),
            Err(CdmError::SessionNotOpened(_))
        ));
    }

    #[test]
    fn test_decrypt() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        let src = CdmBuffer::from(vec![1u8, 2, 3]);

        let out = engine.decrypt(&pssh_init_data(), &src).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn test_decrypt_argument_validation() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);

        assert_eq!(
            engine
                .decrypt(&[], &CdmBuffer::from(vec![1u8]))
                .unwrap_err()
                .status(),
            Status::IllegalArgument
        );
        assert_eq!(
            engine
                .decrypt(&pssh_init_data(), &CdmBuffer::empty())
                .unwrap_err()
                .status(),
            Status::IllegalArgument
        );
    }

    #[test]
    fn test_decrypt_too_small() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        agent.fail(
            AgentOp::Decrypt,
            AgentError::DestinationTooSmall {
                required: 64,
                available: 16,
            },
        );

        let err = engine
            .decrypt(&pssh_init_data(), &CdmBuffer::from(vec![0u8; 64]))
            .unwrap_err();
        assert_eq!(err.status(), Status::TooSmallBuffer);
    }

    #[test]
    fn test_key_release_forwarding() {
        let agent = Arc::new(MockAgent::new());
        agent.queue_key_release(KeyRelease::new(SessionId::from("3"), b"bye".to_vec()));
        let engine = engine_with(&agent);

        let releases = engine.key_releases().unwrap();
        assert_eq!(releases.len(), 1);
        engine.commit_key_release(&releases[0]).unwrap();
        engine.free_key_releases(releases).unwrap();

        assert_eq!(agent.count(AgentOp::CommitKeyRelease), 1);
        assert_eq!(agent.count(AgentOp::FreeKeyReleases), 1);
    }

    #[test]
    fn test_commit_key_release_requires_session_id() {
        let engine = Engine::builder().build().unwrap();
        let release = KeyRelease::new(SessionId::from(""), b"x".to_vec());
        assert_eq!(
            engine.commit_key_release(&release).unwrap_err().status(),
            Status::IllegalArgument
        );
    }

    #[test]
    fn test_drop_finalizes_sessions_and_agent() {
        let agent = Arc::new(MockAgent::new());
        let engine = engine_with(&agent);
        engine.open_session().unwrap();
        engine.open_session().unwrap();

        drop(engine);
        assert_eq!(agent.count(AgentOp::FinSessionHandle), 2);
        assert_eq!(agent.count(AgentOp::FinAgent), 1);
    }

    #[test]
    fn test_drop_without_session_finalization() {
        let agent = Arc::new(MockAgent::new());
        let engine = Engine::builder()
            .agent(agent.clone() as Arc<dyn Agent>)
            .finalize_sessions_on_drop(false)
            .build()
            .unwrap();
        engine.open_session().unwrap();

        drop(engine);
        assert_eq!(agent.count(AgentOp::FinSessionHandle), 0);
        assert_eq!(agent.count(AgentOp::FinAgent), 1);
    }
}
