use std::collections::HashMap;
use std::sync::Arc;

use system::{ConnectionId, ServerEvent};
use tokio::sync::mpsc::error::TrySendError;

use crate::registry::SessionRegistry;

pub type ConnectionTx = tokio::sync::mpsc::Sender<Arc<ServerEvent>>;

/// Outbound channels of the connections whose sessions live on this shard.
///
/// Delivery never blocks the shard. A connection whose buffer is full is
/// evicted: its channel is dropped so the connection closes and the client
/// comes back through a fresh join.
pub struct RoomBroadcaster {
    connection_txs: HashMap<ConnectionId, ConnectionTx>,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self {
            connection_txs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, connection_id: ConnectionId, tx: ConnectionTx) {
        self.connection_txs.insert(connection_id, tx);
    }

    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<ConnectionTx> {
        self.connection_txs.remove(connection_id)
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connection_txs.contains_key(connection_id)
    }

    pub fn send_to_one(&mut self, to: ConnectionId, event: ServerEvent) {
        self.deliver(to, Arc::new(event));
    }

    pub fn broadcast_all(&mut self, registry: &SessionRegistry, session_code: &str, event: ServerEvent) {
        self.fanout(registry, session_code, event, None);
    }

    pub fn broadcast_except_sender(
        &mut self,
        registry: &SessionRegistry,
        session_code: &str,
        event: ServerEvent,
        sender: ConnectionId,
    ) {
        self.fanout(registry, session_code, event, Some(sender));
    }

    fn fanout(
        &mut self,
        registry: &SessionRegistry,
        session_code: &str,
        event: ServerEvent,
        without: Option<ConnectionId>,
    ) {
        let members = match registry.members(session_code) {
            Ok(members) => members,
            Err(err) => {
                log::debug!("Dropping {}: {}", event.name(), err);
                return;
            }
        };
        let event = Arc::new(event);
        for &member in members {
            if without != Some(member) {
                self.deliver(member, event.clone());
            }
        }
    }

    fn deliver(&mut self, to: ConnectionId, event: Arc<ServerEvent>) {
        let tx = match self.connection_txs.get(&to) {
            Some(tx) => tx,
            None => {
                log::debug!("Connection {} has no outbound channel, skipping {}", to, event.name());
                return;
            }
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("Connection {} fell behind at {}, evicting", to, event.name());
                self.connection_txs.remove(&to);
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Connection {} already closed", to);
                self.connection_txs.remove(&to);
            }
        }
    }
}

impl Default for RoomBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::InactivityScheduler;
    use crate::server::ServerCommand;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn quiz(is_quiz: bool) -> ServerEvent {
        ServerEvent::QuizStatus { is_quiz }
    }

    struct Room {
        registry: SessionRegistry,
        broadcaster: RoomBroadcaster,
        receivers: Vec<mpsc::Receiver<Arc<ServerEvent>>>,
        _srv_tx: mpsc::Sender<ServerCommand>,
    }

    fn room(members: u32, buffer: usize) -> Room {
        let (srv_tx, _) = mpsc::channel(8);
        let scheduler = InactivityScheduler::new(Duration::from_secs(5400), srv_tx.downgrade());
        let mut registry = SessionRegistry::new(100, scheduler);
        let mut broadcaster = RoomBroadcaster::new();
        let mut receivers = Vec::new();
        for member in 0..members {
            let (tx, rx) = mpsc::channel(buffer);
            registry.join("ABC123", member);
            broadcaster.insert(member, tx);
            receivers.push(rx);
        }
        Room {
            registry,
            broadcaster,
            receivers,
            _srv_tx: srv_tx,
        }
    }

    #[tokio::test]
    async fn broadcast_all_reaches_every_member() {
        let mut room = room(3, 8);
        room.broadcaster
            .broadcast_all(&room.registry, "ABC123", quiz(true));

        for rx in room.receivers.iter_mut() {
            assert_eq!(*rx.try_recv().expect(""), quiz(true));
        }
    }

    #[tokio::test]
    async fn broadcast_except_sender_skips_only_the_sender() {
        let mut room = room(3, 8);
        room.broadcaster
            .broadcast_except_sender(&room.registry, "ABC123", quiz(true), 1);

        assert!(room.receivers[0].try_recv().is_ok());
        assert!(room.receivers[1].try_recv().is_err());
        assert!(room.receivers[2].try_recv().is_ok());
    }

    #[tokio::test]
    async fn unknown_session_is_dropped_quietly() {
        let mut room = room(1, 8);
        room.broadcaster.broadcast_all(&room.registry, "other", quiz(true));
        assert!(room.receivers[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn full_buffer_evicts_connection() {
        let mut room = room(2, 1);
        room.broadcaster
            .broadcast_all(&room.registry, "ABC123", quiz(true));
        let _ = room.receivers[1].try_recv();
        room.broadcaster
            .broadcast_all(&room.registry, "ABC123", quiz(false));

        assert!(!room.broadcaster.contains(&0));
        assert!(room.broadcaster.contains(&1));

        let evicted = &mut room.receivers[0];
        assert_eq!(*evicted.recv().await.expect(""), quiz(true));
        assert!(evicted.recv().await.is_none());
    }
}
