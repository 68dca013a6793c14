use std::collections::HashMap;

use system::{ConnectionId, SessionCode, SessionState};
use thiserror::Error;

use crate::scheduler::InactivityScheduler;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("session '{0}' not found")]
    NotFound(SessionCode),
}

/// Sessions owned by one shard, keyed by code.
///
/// A session exists from the first join on its code until its last member
/// leaves. Leaving as the last member destroys the state and cancels its
/// inactivity timer in the same step.
pub struct SessionRegistry {
    sessions: HashMap<SessionCode, Session>,
    scheduler: InactivityScheduler,
    history_limit: usize,
}

impl SessionRegistry {
    pub fn new(history_limit: usize, scheduler: InactivityScheduler) -> Self {
        Self {
            sessions: HashMap::new(),
            scheduler,
            history_limit,
        }
    }

    pub fn join(&mut self, session_code: &str, member: ConnectionId) -> &SessionState {
        self.scheduler.schedule(session_code);

        let history_limit = self.history_limit;
        let session = self
            .sessions
            .entry(session_code.to_owned())
            .or_insert_with(|| {
                log::info!("Session {} created", session_code);
                Session::new(history_limit)
            });
        if !session.connections.contains(&member) {
            session.connections.push(member);
            log::info!("Connection {} joined session {}", member, session_code);
        }
        &session.state
    }

    /// Returns whether the session was destroyed.
    pub fn leave(&mut self, session_code: &str, member: ConnectionId) -> Result<bool, RegistryError> {
        let session = self
            .sessions
            .get_mut(session_code)
            .ok_or_else(|| RegistryError::NotFound(session_code.to_owned()))?;
        session.connections.retain(|c| *c != member);
        log::info!("Connection {} left session {}", member, session_code);

        if session.connections.is_empty() {
            self.sessions.remove(session_code);
            self.scheduler.cancel(session_code);
            log::info!("Session {} destroyed", session_code);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn get(&self, session_code: &str) -> Result<&Session, RegistryError> {
        self.sessions
            .get(session_code)
            .ok_or_else(|| RegistryError::NotFound(session_code.to_owned()))
    }

    pub fn get_mut(&mut self, session_code: &str) -> Result<&mut Session, RegistryError> {
        self.sessions
            .get_mut(session_code)
            .ok_or_else(|| RegistryError::NotFound(session_code.to_owned()))
    }

    pub fn members(&self, session_code: &str) -> Result<&[ConnectionId], RegistryError> {
        self.get(session_code).map(|s| s.connections.as_slice())
    }

    pub fn rearm(&mut self, session_code: &str) {
        if self.sessions.contains_key(session_code) {
            self.scheduler.schedule(session_code);
        }
    }

    /// Resolves an elapsed inactivity timer back to its session, if both the
    /// timer and the session are still current.
    pub fn take_elapsed(&mut self, session_code: &str, generation: u64) -> Option<&mut Session> {
        if !self.scheduler.fire(session_code, generation) {
            return None;
        }
        self.sessions.get_mut(session_code)
    }

    pub fn has_pending_timer(&self, session_code: &str) -> bool {
        self.scheduler.is_pending(session_code)
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
    use crate::server::ServerCommand;
    use serde_json::json;
    use std::time::Duration;
    use system::apply_full_replace;
    use tokio::sync::mpsc;

    fn registry(srv_tx: &mpsc::Sender<ServerCommand>) -> SessionRegistry {
        let scheduler = InactivityScheduler::new(Duration::from_secs(5400), srv_tx.downgrade());
        SessionRegistry::new(100, scheduler)
    }

    #[tokio::test]
    async fn it_remove_session_when_all_connections_disconnect() {
        let (srv_tx, _srv_rx) = mpsc::channel(8);
        let mut registry = registry(&srv_tx);

        registry.join("ABC123", 1);
        registry.join("ABC123", 2);
        assert_eq!(registry.leave("ABC123", 1), Ok(false));
        assert!(registry.has_pending_timer("ABC123"));

        assert_eq!(registry.leave("ABC123", 2), Ok(true));
        assert!(registry.is_empty());
        assert!(!registry.has_pending_timer("ABC123"));
    }

    #[tokio::test]
    async fn join_is_idempotent_per_member() {
        let (srv_tx, _srv_rx) = mpsc::channel(8);
        let mut registry = registry(&srv_tx);

        let state = registry.join("ABC123", 1);
        assert_eq!(state, &SessionState::new(100));
        registry.join("ABC123", 1);

        assert_eq!(registry.members("ABC123").expect(""), &[1]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn rejoin_after_destruction_starts_from_defaults() {
        let (srv_tx, _srv_rx) = mpsc::channel(8);
        let mut registry = registry(&srv_tx);

        registry.join("ABC123", 1);
        let session = registry.get_mut("ABC123").expect("");
        apply_full_replace(&mut session.state, vec![json!("strokeX")]);
        session.state.background_image = "grid.png".into();
        session.state.is_student_locked = true;
        registry.leave("ABC123", 1).expect("");

        let state = registry.join("ABC123", 2);
        assert_eq!(state.background_image, "");
        assert!(state.paths.is_empty());
        assert!(!state.is_student_locked);
        assert_eq!(state.history().undo_len(), 0);
    }

    #[tokio::test]
    async fn codes_are_case_sensitive_and_independent() {
        let (srv_tx, _srv_rx) = mpsc::channel(8);
        let mut registry = registry(&srv_tx);

        registry.join("abc", 1);
        registry.join("ABC", 2);
        registry.get_mut("abc").expect("").state.is_quiz = true;

        assert!(!registry.get("ABC").expect("").state.is_quiz);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let (srv_tx, _srv_rx) = mpsc::channel(8);
        let mut registry = registry(&srv_tx);

        let missing = RegistryError::NotFound("nope".into());
        assert_eq!(registry.get("nope").err(), Some(missing.clone()));
        assert_eq!(registry.leave("nope", 1), Err(missing));
        registry.rearm("nope");
        assert!(!registry.has_pending_timer("nope"));
    }

    #[tokio::test]
    async fn stale_timer_does_not_resolve_session() {
        let (srv_tx, _srv_rx) = mpsc::channel(8);
        let mut registry = registry(&srv_tx);

        registry.join("ABC123", 1);
        registry.rearm("ABC123");
        assert!(registry.take_elapsed("ABC123", 1).is_none());
        assert!(registry.take_elapsed("ABC123", 2).is_some());
        assert!(registry.take_elapsed("ABC123", 2).is_none());
    }
}
