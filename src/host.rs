//! Shared engine lifetime.
//!
//! An [`EngineHost`] owns at most one [`Engine`] at a time. The first
//! [`acquire`](EngineHost::acquire) creates it, every acquire bumps the
//! agent's reference count, and the [`release`](EngineHost::release) that
//! brings the count to zero shuts the engine down before the host lock is
//! released. `Arc<Engine>` values still held after that point refer to a
//! shut-down engine that rejects every operation. Hosts are plain values;
//! share one between users with an `Arc`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::agent::{Agent, StubAgent};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{CdmError, Result};

/// Reference-counted owner of a single engine.
pub struct EngineHost {
    agent: Arc<dyn Agent>,
    config: EngineConfig,
    slot: Mutex<Option<Arc<Engine>>>,
}

impl EngineHost {
    /// Host that builds engines over `agent` with `config`.
    pub fn new(agent: Arc<dyn Agent>, config: EngineConfig) -> Self {
        Self {
            agent,
            config,
            slot: Mutex::new(None),
        }
    }

    /// Host backed by a [`StubAgent`] with default configuration.
    pub fn with_stub_agent() -> Self {
        Self::new(Arc::new(StubAgent::new()), EngineConfig::default())
    }

    /// Get the engine, creating it if no user holds it.
    ///
    /// Each successful call must be paired with one [`release`](Self::release).
    pub fn acquire(&self) -> Result<Arc<Engine>> {
        let mut slot = self.slot.lock();

        let (engine, created) = match slot.as_ref() {
            Some(engine) => (Arc::clone(engine), false),
            None => {
                let engine = Arc::new(Engine::new(Arc::clone(&self.agent), self.config.clone())?);
                *slot = Some(Arc::clone(&engine));
                tracing::info!("Engine created");
                (engine, true)
            }
        };

        if let Err(e) = self.agent.increase_ref_count() {
            tracing::error!(error = %e, "Failed to increase agent reference count");
            if created {
                *slot = None;
                engine.shutdown();
            }
            return Err(e.into());
        }

        tracing::debug!(ref_count = self.agent.ref_count(), "Engine acquired");
        Ok(engine)
    }

    /// Give back one reference.
    ///
    /// Returns `true` when this was the last user; the engine has then been
    /// shut down and the agent finalized.
    pub fn release(&self) -> Result<bool> {
        let mut slot = self.slot.lock();

        if slot.is_none() {
            return Err(CdmError::unknown("No engine to release"));
        }

        if let Err(e) = self.agent.decrease_ref_count() {
            tracing::error!(error = %e, "Failed to decrease agent reference count");
            return Err(e.into());
        }

        let remaining = self.agent.ref_count();
        tracing::debug!(ref_count = remaining, "Engine released");
        if remaining > 0 {
            return Ok(false);
        }

        if let Some(engine) = slot.take() {
            engine.shutdown();
        }
        tracing::info!("Engine destroyed");
        Ok(true)
    }

    /// Whether the host currently holds an engine.
    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// The held engine, without touching the reference count.
    pub fn current(&self) -> Option<Arc<Engine>> {
        self.slot.lock().clone()
    }
}

impl fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHost")
            .field("config", &self.config)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Default for EngineHost {
    fn default() -> Self {
        Self::with_stub_agent()
    }
}
