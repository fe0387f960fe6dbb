//! Live session registry.
//!
//! A mutex-guarded map of `(target_id, owner_id)` to session info, used
//! for introspection only: relay correctness never depends on what is in
//! here. Keys are unique per pair by construction of how sessions are
//! opened, so insert and delete are plain map operations.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub target_id: i64,
    pub owner_id: i64,
    pub target_name: String,
    pub host: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<(i64, i64), SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, target_id: i64, owner_id: i64, target_name: &str, host: &str) {
        let info = SessionInfo {
            target_id,
            owner_id,
            target_name: target_name.to_string(),
            host: host.to_string(),
            started_at: Utc::now(),
        };
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .insert((target_id, owner_id), info);
    }

    pub fn remove(&self, target_id: i64, owner_id: i64) -> Option<SessionInfo> {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .remove(&(target_id, owner_id))
    }

    /// Snapshot of active sessions, oldest first.
    pub fn active(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .lock()
            .expect("session registry poisoned")
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove_are_keyed_by_pair() {
        let registry = SessionRegistry::new();
        registry.register(1, 10, "alpha", "10.0.0.1:22");
        registry.register(2, 10, "beta", "10.0.0.2:22");
        assert_eq!(registry.len(), 2);

        let removed = registry.remove(1, 10).unwrap();
        assert_eq!(removed.target_name, "alpha");
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(1, 10).is_none());
    }

    #[test]
    fn active_lists_oldest_first() {
        let registry = SessionRegistry::new();
        registry.register(1, 10, "alpha", "h1");
        registry.register(2, 11, "beta", "h2");
        let names: Vec<String> = registry.active().into_iter().map(|s| s.target_name).collect();
        assert_eq!(names, ["alpha", "beta"]);
    }
}
