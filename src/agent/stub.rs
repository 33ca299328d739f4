//! Pass-through agent stub.
//!
//! Stands in for the vendor agent when none is linked. Every call succeeds:
//! handles are fresh counters, challenge requests are empty, a key response
//! completes the exchange in one step and decrypt echoes its input. The
//! reference count is tracked for real so engine lifetime behaves as it
//! would against a vendor agent.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::{
    Agent, AgentError, AgentHandle, AgentResult, KeyExchange, KeyRelease, SessionHandle,
};
use crate::buffer::CdmBuffer;
use crate::protocol::{ChallengeParameters, KeyIdInfo};
use crate::session::SessionId;

/// Agent stub with no DRM behavior.
#[derive(Debug, Default)]
pub struct StubAgent {
    /// Engine users.
    ref_count: AtomicU32,
    /// Last handle issued (agent and session handles share the sequence).
    last_handle: AtomicU64,
}

impl StubAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&self) -> u64 {
        self.last_handle.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Agent for StubAgent {
    fn init_agent(&self) -> AgentResult<AgentHandle> {
        Ok(AgentHandle::new(self.next_handle()))
    }

    fn fin_agent(&self, _handle: AgentHandle) -> AgentResult<()> {
        Ok(())
    }

    fn increase_ref_count(&self) -> AgentResult<()> {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn decrease_ref_count(&self) -> AgentResult<()> {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| AgentError::failure("reference count is already zero"))
    }

    fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    fn check_key_exist(&self, _key_id: &KeyIdInfo) -> AgentResult<bool> {
        Ok(false)
    }

    fn init_session_handle(
        &self,
        _agent: AgentHandle,
        _session_id: &SessionId,
    ) -> AgentResult<SessionHandle> {
        Ok(SessionHandle::new(self.next_handle()))
    }

    fn fin_session_handle(&self, _handle: SessionHandle) -> AgentResult<()> {
        Ok(())
    }

    fn create_challenge_request(
        &self,
        _handle: SessionHandle,
        _params: &ChallengeParameters,
    ) -> AgentResult<CdmBuffer> {
        Ok(CdmBuffer::empty())
    }

    fn process_response(
        &self,
        _handle: SessionHandle,
        _response: &CdmBuffer,
        _params: Option<&ChallengeParameters>,
    ) -> AgentResult<KeyExchange> {
        Ok(KeyExchange::Done)
    }

    fn release_request(&self, _handle: SessionHandle) -> AgentResult<()> {
        Ok(())
    }

    fn cancel_key_request(&self, _handle: SessionHandle) -> AgentResult<()> {
        Ok(())
    }

    fn decrypt(&self, _key_id: &KeyIdInfo, src: &CdmBuffer) -> AgentResult<CdmBuffer> {
        Ok(src.clone())
    }

    fn key_releases(&self) -> AgentResult<Vec<KeyRelease>> {
        Ok(Vec::new())
    }

    fn commit_key_release(&self, _release: &KeyRelease) -> AgentResult<()> {
        Ok(())
    }

    fn free_key_releases(&self, _releases: Vec<KeyRelease>) -> AgentResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_count_tracks_increments() {
        let agent = StubAgent::new();
        agent.increase_ref_count().unwrap();
        agent.increase_ref_count().unwrap();
        assert_eq!(agent.ref_count(), 2);

        agent.decrease_ref_count().unwrap();
        assert_eq!(agent.ref_count(), 1);
    }

    #[test]
    fn test_ref_count_never_underflows() {
        let agent = StubAgent::new();
        assert!(agent.decrease_ref_count().is_err());
        assert_eq!(agent.ref_count(), 0);
    }

    #[test]
    fn test_handles_are_unique() {
        let agent = StubAgent::new();
        let agent_handle = agent.init_agent().unwrap();
        let a = agent
            .init_session_handle(agent_handle, &SessionId::from("1"))
            .unwrap();
        let b = agent
            .init_session_handle(agent_handle, &SessionId::from("2"))
            .unwrap();
        assert_ne!(a, b);
        assert_ne!(a.raw(), agent_handle.raw());
    }

    #[test]
    fn test_decrypt_echoes_input() {
        let agent = StubAgent::new();
        let src = CdmBuffer::from(vec![1u8, 2, 3]);
        let out = agent.decrypt(&KeyIdInfo::none(), &src).unwrap();
        assert_eq!(out, src);
    }
}
