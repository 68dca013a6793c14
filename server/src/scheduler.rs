use std::collections::HashMap;
use std::time::Duration;

use system::SessionCode;
use tokio::task::JoinHandle;

use crate::server::{ServerCommand, WeakServerTx};

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// One single-shot inactivity timer per session.
///
/// A timer knows its session only by code. When it elapses it posts
/// `ServerCommand::InactivityElapsed` back to the owning shard, which asks
/// `fire` whether that timer is still the current one before acting.
pub struct InactivityScheduler {
    timeout: Duration,
    srv_tx: WeakServerTx,
    pending: HashMap<SessionCode, PendingTimer>,
    next_generation: u64,
}

impl InactivityScheduler {
    pub fn new(timeout: Duration, srv_tx: WeakServerTx) -> Self {
        Self {
            timeout,
            srv_tx,
            pending: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arms the timer for `session_code`, replacing any pending one.
    pub fn schedule(&mut self, session_code: &str) {
        self.cancel(session_code);

        self.next_generation = self.next_generation.wrapping_add(1);
        let generation = self.next_generation;
        let timeout = self.timeout;
        let srv_tx = self.srv_tx.clone();
        let command = ServerCommand::InactivityElapsed {
            session_code: session_code.to_owned(),
            generation,
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let delivered = match srv_tx.upgrade() {
                Some(srv_tx) => srv_tx.send(command).await.is_ok(),
                None => false,
            };
            if !delivered {
                log::warn!("inactivity timer {} elapsed after its shard stopped", generation);
            }
        });

        self.pending.insert(
            session_code.to_owned(),
            PendingTimer { generation, handle },
        );
    }

    pub fn cancel(&mut self, session_code: &str) {
        if let Some(timer) = self.pending.remove(session_code) {
            timer.handle.abort();
        }
    }

    /// Consumes the pending timer if `generation` is still current.
    pub fn fire(&mut self, session_code: &str, generation: u64) -> bool {
        match self.pending.get(session_code) {
            Some(timer) if timer.generation == generation => {
                self.pending.remove(session_code);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, session_code: &str) -> bool {
        self.pending.contains_key(session_code)
    }
}

impl Drop for InactivityScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.pending.drain() {
            timer.handle.abort();
        }
    }
}
