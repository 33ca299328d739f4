//! Session id to agent handle mapping.
//!
//! Not internally synchronized: the engine mutates it only while holding its
//! state lock.

use std::collections::HashMap;

use super::SessionId;
use crate::agent::SessionHandle;
use crate::error::{CdmError, Result};

/// Maps open session ids to their agent-side handles.
#[derive(Debug, Default)]
pub struct SessionMap {
    sessions: HashMap<SessionId, SessionHandle>,
}

impl SessionMap {
    /// Create a new empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `id` with `handle`.
    ///
    /// # Errors
    ///
    /// `Unknown` if `id` is already present (registry collision).
    pub fn insert(&mut self, id: SessionId, handle: SessionHandle) -> Result<()> {
        if self.sessions.contains_key(&id) {
            return Err(CdmError::unknown(format!(
                "Session id {} is already in use",
                id
            )));
        }
        self.sessions.insert(id, handle);
        Ok(())
    }

    /// Look up the handle for `id`.
    pub fn lookup(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).copied()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Remove `id`, returning its handle. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.remove(id)
    }

    /// Remove every session, returning the drained entries.
    pub fn drain(&mut self) -> Vec<(SessionId, SessionHandle)> {
        self.sessions.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut map = SessionMap::new();
        map.insert(SessionId::from("1"), SessionHandle::new(10)).unwrap();

        assert_eq!(map.lookup(&SessionId::from("1")), Some(SessionHandle::new(10)));
        assert!(map.contains(&SessionId::from("1")));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut map = SessionMap::new();
        map.insert(SessionId::from("1"), SessionHandle::new(10)).unwrap();

        let err = map
            .insert(SessionId::from("1"), SessionHandle::new(11))
            .unwrap_err();
        assert!(matches!(err, CdmError::Unknown(_)));
        // Original mapping untouched.
        assert_eq!(map.lookup(&SessionId::from("1")), Some(SessionHandle::new(10)));
    }

    #[test]
    fn test_lookup_missing() {
        let map = SessionMap::new();
        assert!(map.lookup(&SessionId::from("99")).is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut map = SessionMap::new();
        map.insert(SessionId::from("1"), SessionHandle::new(10)).unwrap();

        assert_eq!(map.remove(&SessionId::from("1")), Some(SessionHandle::new(10)));
        assert_eq!(map.remove(&SessionId::from("1")), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_drain_empties_map() {
        let mut map = SessionMap::new();
        map.insert(SessionId::from("1"), SessionHandle::new(1)).unwrap();
        map.insert(SessionId::from("2"), SessionHandle::new(2)).unwrap();

        let mut drained = map.drain();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0.as_str(), "1");
        assert!(map.is_empty());
    }
}
