//! Per-user facade over a shared engine.
//!
//! Each [`CdmInterface`] holds one reference on its [`EngineHost`] for as
//! long as it lives. Call [`release`](CdmInterface::release) to observe the
//! outcome; dropping the interface releases too, logging any failure.

use std::sync::Arc;

use crate::agent::{KeyExchange, KeyRelease};
use crate::buffer::CdmBuffer;
use crate::engine::Engine;
use crate::error::Result;
use crate::host::EngineHost;
use crate::session::SessionId;

/// Handle a single caller uses to drive the shared engine.
#[derive(Debug)]
pub struct CdmInterface {
    host: Arc<EngineHost>,
    engine: Arc<Engine>,
    released: bool,
}

impl CdmInterface {
    /// Acquire the host's engine for a new user.
    pub fn acquire(host: &Arc<EngineHost>) -> Result<Self> {
        let engine = host.acquire()?;
        Ok(Self {
            host: Arc::clone(host),
            engine,
            released: false,
        })
    }

    /// Give this user's reference back to the host.
    ///
    /// Returns `true` if this was the last user, in which case the engine
    /// is already shut down when this returns.
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.host.release()
    }

    /// The shared engine.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// See [`Engine::check_key_exist`].
    pub fn check_key_exist(&self, init_data: &[u8]) -> Result<bool> {
        self.engine.check_key_exist(init_data)
    }

    /// See [`Engine::open_session`].
    pub fn open_session(&self) -> Result<SessionId> {
        self.engine.open_session()
    }

    /// See [`Engine::close_session`].
    pub fn close_session(&self, session_id: &SessionId) -> Result<()> {
        self.engine.close_session(session_id)
    }

    /// See [`Engine::generate_key_request`].
    pub fn generate_key_request(
        &self,
        session_id: &SessionId,
        init_data: &[u8],
    ) -> Result<CdmBuffer> {
        self.engine.generate_key_request(session_id, init_data)
    }

    /// See [`Engine::add_key`].
    pub fn add_key(
        &self,
        session_id: &SessionId,
        key_response: &CdmBuffer,
        init_data: Option<&[u8]>,
    ) -> Result<KeyExchange> {
        self.engine.add_key(session_id, key_response, init_data)
    }

    /// See [`Engine::cancel_key_request`].
    pub fn cancel_key_request(&self, session_id: &SessionId) -> Result<()> {
        self.engine.cancel_key_request(session_id)
    }

    /// See [`Engine::decrypt`].
    pub fn decrypt(&self, init_data: &[u8], src: &CdmBuffer) -> Result<CdmBuffer> {
        self.engine.decrypt(init_data, src)
    }

    /// See [`Engine::key_releases`].
    pub fn key_releases(&self) -> Result<Vec<KeyRelease>> {
        self.engine.key_releases()
    }

    /// See [`Engine::commit_key_release`].
    pub fn commit_key_release(&self, release: &KeyRelease) -> Result<()> {
        self.engine.commit_key_release(release)
    }

    /// See [`Engine::free_key_releases`].
    pub fn free_key_releases(&self, releases: Vec<KeyRelease>) -> Result<()> {
        self.engine.free_key_releases(releases)
    }
}

impl Drop for CdmInterface {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.host.release() {
            tracing::warn!(error = %e, "Failed to release engine on drop");
        }
    }
}
