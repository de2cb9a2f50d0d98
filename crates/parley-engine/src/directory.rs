//! Cached session list and the active-session pointer

use std::collections::HashSet;

use parley_api::Session;

/// The user's sessions, newest first, plus which one is active.
///
/// `active == None` is the pending state: a new conversation that gets its
/// id from the server once the first exchange completes.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    sessions: Vec<Session>,
    active: Option<String>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> HashSet<String> {
        self.sessions.iter().map(|s| s.id.clone()).collect()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_deref().and_then(|id| self.get(id))
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.as_deref() == Some(id)
    }

    pub fn set_active(&mut self, id: Option<String>) {
        self.active = id;
    }

    /// Replace the cache with a fresh listing, ordered by recency
    pub fn replace(&mut self, mut sessions: Vec<Session>) {
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.sessions = sessions;
    }

    pub fn most_recent(&self) -> Option<&Session> {
        self.sessions.first()
    }

    /// Newest session whose id is not in `known`
    pub fn newest_unknown(&self, known: &HashSet<String>) -> Option<&Session> {
        self.sessions.iter().find(|s| !known.contains(&s.id))
    }

    /// Rename in the cache. Returns `false` for unknown ids.
    pub fn rename(&mut self, id: &str, name: &str) -> bool {
        match self.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                session.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove from the cache. The active pointer is left to the caller, which
    /// must move it off a removed id.
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(index))
    }
}
