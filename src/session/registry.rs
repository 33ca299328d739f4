//! Session id registry.
//!
//! Ids are assigned sequentially starting from 1. When the counter reaches
//! `i64::MAX` it wraps back to 1; the engine's session map rejects an id that
//! is still live.
//!
//! # Example
//!
//! ```
//! use marlin_cdm::session::SessionRegistry;
//!
//! let registry = SessionRegistry::new();
//! assert_eq!(registry.next_id().unwrap().as_str(), "1");
//! assert_eq!(registry.next_id().unwrap().as_str(), "2");
//! ```

use parking_lot::Mutex;

use super::SessionId;
use crate::error::{CdmError, Result};

/// First id handed out, and the value the counter wraps back to.
pub const INITIAL_SESSION_ID: i64 = 1;

/// Issues process-unique session ids under concurrent callers.
#[derive(Debug)]
pub struct SessionRegistry {
    /// Next id to hand out.
    next_id: Mutex<i64>,
}

impl SessionRegistry {
    /// Create a registry starting at [`INITIAL_SESSION_ID`].
    pub fn new() -> Self {
        Self::starting_at(INITIAL_SESSION_ID)
    }

    /// Create a registry whose first id is `start`.
    ///
    /// A negative `start` leaves the registry unusable: every call to
    /// [`next_id`](Self::next_id) fails.
    pub fn starting_at(start: i64) -> Self {
        Self {
            next_id: Mutex::new(start),
        }
    }

    /// Issue the next session id.
    ///
    /// # Errors
    ///
    /// `Unknown` if the counter is negative.
    pub fn next_id(&self) -> Result<SessionId> {
        let mut next = self.next_id.lock();

        if *next < 0 {
            tracing::error!(counter = *next, "Session id counter is negative");
            return Err(CdmError::unknown(format!(
                "Session id counter is negative ({})",
                *next
            )));
        }

        if *next == i64::MAX {
            tracing::warn!("Session id counter wrapped around");
            *next = INITIAL_SESSION_ID;
        }

        let id = SessionId::new(next.to_string());
        *next += 1;
        tracing::trace!(session_id = %id, "Issued session id");
        Ok(id)
    }

    /// Value the next call to `next_id` will start from.
    pub fn peek(&self) -> i64 {
        *self.next_id.lock()
    }

    #[cfg(test)]
    pub(crate) fn rewind(&self, next: i64) {
        *self.next_id.lock() = next;
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_id_assignment_sequential() {
        let registry = SessionRegistry::new();

        assert_eq!(registry.next_id().unwrap().as_str(), "1");
        assert_eq!(registry.next_id().unwrap().as_str(), "2");
        assert_eq!(registry.next_id().unwrap().as_str(), "3");
        assert_eq!(registry.peek(), 4);
    }

    #[test]
    fn test_custom_start() {
        let registry = SessionRegistry::starting_at(1000);
        assert_eq!(registry.next_id().unwrap().counter(), Some(1000));
    }

    #[test]
    fn test_wraps_at_max() {
        let registry = SessionRegistry::starting_at(i64::MAX - 1);

        assert_eq!(
            registry.next_id().unwrap().as_str(),
            (i64::MAX - 1).to_string()
        );
        // Counter now sits at i64::MAX and resets instead of overflowing.
        assert_eq!(registry.next_id().unwrap().as_str(), "1");
        assert_eq!(registry.next_id().unwrap().as_str(), "2");
    }

    #[test]
    fn test_negative_counter_rejected() {
        let registry = SessionRegistry::starting_at(-5);
        let err = registry.next_id().unwrap_err();
        assert!(matches!(err, CdmError::Unknown(_)));
        // Still rejected; the counter is not advanced.
        assert!(registry.next_id().is_err());
        assert_eq!(registry.peek(), -5);
    }

    #[test]
    fn test_concurrent_ids_are_distinct() {
        let registry = Arc::new(SessionRegistry::new());
        let threads = 8;
        let per_thread = 250;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let mut ids = Vec::with_capacity(per_thread);
                    for _ in 0..per_thread {
                        ids.push(registry.next_id().unwrap().counter().unwrap());
                    }
                    ids
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            // Each thread observes a strictly increasing sequence.
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }

        assert_eq!(all.len(), threads * per_thread);
        assert_eq!(*all.iter().min().unwrap(), 1);
        assert_eq!(*all.iter().max().unwrap(), (threads * per_thread) as i64);
    }
}
