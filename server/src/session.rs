use system::{ConnectionId, SessionState};

pub struct Session {
    pub connections: Vec<ConnectionId>,
    pub state: SessionState,
}

impl Session {
    pub fn new(history_limit: usize) -> Self {
        Self {
            connections: Vec::new(),
            state: SessionState::new(history_limit),
        }
    }
}
