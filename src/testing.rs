//! Scriptable agent for testing engines and hosts.
//!
//! [`MockAgent`] records every call it receives and can be told to fail any
//! single operation with a chosen [`AgentError`]. Handles and the reference
//! count behave like a real agent's.
//!
//! Compiled for this crate's tests and, for downstream crates, behind the
//! `test-utils` feature.
//!
//! ```
//! use std::sync::Arc;
//! use marlin_cdm::testing::{AgentOp, MockAgent};
//! use marlin_cdm::{AgentError, Engine, Status};
//!
//! let agent = Arc::new(MockAgent::new());
//! let engine = Engine::builder().agent(agent.clone()).build().unwrap();
//!
//! agent.fail(AgentOp::InitSessionHandle, AgentError::InvalidRequestType);
//! let err = engine.open_session().unwrap_err();
//! assert_eq!(err.status(), Status::InvalidRequestType);
//! assert_eq!(agent.count(AgentOp::InitSessionHandle), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::agent::{
    Agent, AgentError, AgentHandle, AgentResult, KeyExchange, KeyRelease, SessionHandle,
};
use crate::buffer::CdmBuffer;
use crate::protocol::{ChallengeParameters, KeyIdInfo};
use crate::session::SessionId;

/// Agent operation, used to inspect and script a [`MockAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentOp {
    InitAgent,
    FinAgent,
    IncreaseRefCount,
    DecreaseRefCount,
    CheckKeyExist,
    InitSessionHandle,
    FinSessionHandle,
    CreateChallengeRequest,
    ProcessResponse,
    ReleaseRequest,
    CancelKeyRequest,
    Decrypt,
    KeyReleases,
    CommitKeyRelease,
    FreeKeyReleases,
}

#[derive(Debug, Default)]
struct Script {
    failures: HashMap<AgentOp, AgentError>,
    key_exists: bool,
    challenge: CdmBuffer,
    /// Responses left until the exchange completes.
    rounds_left: u32,
    releases: Vec<KeyRelease>,
}

#[derive(Debug, Default)]
struct Observed {
    calls: Vec<AgentOp>,
    last_key_id: Option<KeyIdInfo>,
    last_challenge: Option<ChallengeParameters>,
    last_response_had_params: Option<bool>,
}

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Hooks {
    on_session_init: Option<Hook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_session_init", &self.on_session_init.is_some())
            .finish()
    }
}

/// Recording agent with per-operation failure injection.
#[derive(Debug)]
pub struct MockAgent {
    ref_count: AtomicU32,
    last_handle: AtomicU64,
    script: Mutex<Script>,
    observed: Mutex<Observed>,
    hooks: Mutex<Hooks>,
}

impl MockAgent {
    /// Agent where every call succeeds and key exchanges finish in one round.
    pub fn new() -> Self {
        Self {
            ref_count: AtomicU32::new(0),
            last_handle: AtomicU64::new(0),
            script: Mutex::new(Script {
                rounds_left: 1,
                ..Script::default()
            }),
            observed: Mutex::new(Observed::default()),
            hooks: Mutex::new(Hooks::default()),
        }
    }

    /// Make `op` fail with `err` until [`clear_failure`](Self::clear_failure).
    pub fn fail(&self, op: AgentOp, err: AgentError) {
        self.script.lock().failures.insert(op, err);
    }

    pub fn clear_failure(&self, op: AgentOp) {
        self.script.lock().failures.remove(&op);
    }

    /// Answer for `check_key_exist`.
    pub fn set_key_exists(&self, exists: bool) {
        self.script.lock().key_exists = exists;
    }

    /// Buffer returned by `create_challenge_request`.
    pub fn set_challenge(&self, challenge: CdmBuffer) {
        self.script.lock().challenge = challenge;
    }

    /// Number of `process_response` calls before the exchange is done.
    pub fn set_rounds(&self, rounds: u32) {
        self.script.lock().rounds_left = rounds;
    }

    /// Queue a message for `key_releases`.
    pub fn queue_key_release(&self, release: KeyRelease) {
        self.script.lock().releases.push(release);
    }

    /// Run `hook` inside the next `init_session_handle`, before it returns.
    pub fn on_next_session_init(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().on_session_init = Some(Box::new(hook));
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<AgentOp> {
        self.observed.lock().calls.clone()
    }

    pub fn count(&self, op: AgentOp) -> usize {
        self.observed.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Key id from the latest `check_key_exist`.
    pub fn last_key_id(&self) -> Option<KeyIdInfo> {
        self.observed.lock().last_key_id.clone()
    }

    /// Parameters from the latest `create_challenge_request`.
    pub fn last_challenge(&self) -> Option<ChallengeParameters> {
        self.observed.lock().last_challenge.clone()
    }

    /// Whether the latest `process_response` carried parameters.
    pub fn last_response_had_params(&self) -> Option<bool> {
        self.observed.lock().last_response_had_params
    }

    /// Record `op`, then return its scripted failure if any.
    fn enter(&self, op: AgentOp) -> AgentResult<()> {
        self.observed.lock().calls.push(op);
        match self.script.lock().failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn next_handle(&self) -> u64 {
        self.last_handle.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for MockAgent {
    fn init_agent(&self) -> AgentResult<AgentHandle> {
        self.enter(AgentOp::InitAgent)?;
        Ok(AgentHandle::new(self.next_handle()))
    }

    fn fin_agent(&self, _handle: AgentHandle) -> AgentResult<()> {
        self.enter(AgentOp::FinAgent)
    }

    fn increase_ref_count(&self) -> AgentResult<()> {
        self.enter(AgentOp::IncreaseRefCount)?;
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn decrease_ref_count(&self) -> AgentResult<()> {
        self.enter(AgentOp::DecreaseRefCount)?;
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| AgentError::failure("reference count is already zero"))
    }

    fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    fn check_key_exist(&self, key_id: &KeyIdInfo) -> AgentResult<bool> {
        self.enter(AgentOp::CheckKeyExist)?;
        self.observed.lock().last_key_id = Some(key_id.clone());
        Ok(self.script.lock().key_exists)
    }

    fn init_session_handle(
        &self,
        _agent: AgentHandle,
        _session_id: &SessionId,
    ) -> AgentResult<SessionHandle> {
        self.enter(AgentOp::InitSessionHandle)?;
        let handle = SessionHandle::new(self.next_handle());

        let hook = self.hooks.lock().on_session_init.take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(handle)
    }

    fn fin_session_handle(&self, _handle: SessionHandle) -> AgentResult<()> {
        self.enter(AgentOp::FinSessionHandle)
    }

    fn create_challenge_request(
        &self,
        _handle: SessionHandle,
        params: &ChallengeParameters,
    ) -> AgentResult<CdmBuffer> {
        self.enter(AgentOp::CreateChallengeRequest)?;
        self.observed.lock().last_challenge = Some(params.clone());
        Ok(self.script.lock().challenge.clone())
    }

    fn process_response(
        &self,
        _handle: SessionHandle,
        _response: &CdmBuffer,
        params: Option<&ChallengeParameters>,
    ) -> AgentResult<KeyExchange> {
        self.enter(AgentOp::ProcessResponse)?;
        self.observed.lock().last_response_had_params = Some(params.is_some());

        let mut script = self.script.lock();
        script.rounds_left = script.rounds_left.saturating_sub(1);
        if script.rounds_left == 0 {
            Ok(KeyExchange::Done)
        } else {
            Ok(KeyExchange::Continue(script.challenge.clone()))
        }
    }

    fn release_request(&self, _handle: SessionHandle) -> AgentResult<()> {
        self.enter(AgentOp::ReleaseRequest)
    }

    fn cancel_key_request(&self, _handle: SessionHandle) -> AgentResult<()> {
        self.enter(AgentOp::CancelKeyRequest)
    }

    fn decrypt(&self, _key_id: &KeyIdInfo, src: &CdmBuffer) -> AgentResult<CdmBuffer> {
        self.enter(AgentOp::Decrypt)?;
        Ok(src.clone())
    }

    fn key_releases(&self) -> AgentResult<Vec<KeyRelease>> {
        self.enter(AgentOp::KeyReleases)?;
        Ok(self.script.lock().releases.clone())
    }

    fn commit_key_release(&self, release: &KeyRelease) -> AgentResult<()> {
        self.enter(AgentOp::CommitKeyRelease)?;
        self.script
            .lock()
            .releases
            .retain(|queued| queued.session_id != release.session_id);
        Ok(())
    }

    fn free_key_releases(&self, _releases: Vec<KeyRelease>) -> AgentResult<()> {
        self.enter(AgentOp::FreeKeyReleases)
    }
}
