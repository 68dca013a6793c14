use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use system::{
    apply_full_replace, apply_text_patch, clear_paths, ClientEvent, ConnectionId, MessageError,
    PatchError, PathsProtocol, PathsUpdate, ServerEvent, SessionCode, SessionState, UpdatePaths,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{channel, Sender, WeakSender};

use crate::broadcaster::{ConnectionTx, RoomBroadcaster};
use crate::config::Config;
use crate::connection::ConnectionCommand;
use crate::registry::SessionRegistry;
use crate::scheduler::InactivityScheduler;

pub type ServerTx = Sender<ServerCommand>;
pub type WeakServerTx = WeakSender<ServerCommand>;

const SHARD_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum ServerCommand {
    Connection(ConnectionCommand),
    InactivityElapsed {
        session_code: SessionCode,
        generation: u64,
    },
}

/// Entry point to the shards. Every code is owned by exactly one shard, so
/// commands for one session are handled one at a time and in arrival order.
#[derive(Clone)]
pub struct Hub {
    shards: Arc<[ServerTx]>,
    connection_id_source: Arc<AtomicU32>,
    paths_protocol: PathsProtocol,
    outbound_buffer: usize,
}

impl Hub {
    pub fn shard_for(&self, session_code: &str) -> &ServerTx {
        let mut hasher = DefaultHasher::new();
        session_code.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    pub fn new_connection_id(&self) -> ConnectionId {
        self.connection_id_source.fetch_add(1, Ordering::Relaxed)
    }

    pub fn paths_protocol(&self) -> PathsProtocol {
        self.paths_protocol
    }

    pub fn outbound_buffer(&self) -> usize {
        self.outbound_buffer
    }
}

enum Delivery {
    All(ServerEvent),
    ExceptSender(ServerEvent),
    Sender(ServerEvent),
}

/// What handling one client event produced.
struct Outcome {
    deliveries: Vec<Delivery>,
    mutated: bool,
}

impl Outcome {
    fn mutation(delivery: Delivery) -> Self {
        Self {
            deliveries: vec![delivery],
            mutated: true,
        }
    }

    fn query(delivery: Delivery) -> Self {
        Self {
            deliveries: vec![delivery],
            mutated: false,
        }
    }

    fn resync(state: &SessionState, notice: ServerEvent) -> Self {
        Self {
            deliveries: vec![
                Delivery::Sender(notice),
                Delivery::Sender(ServerEvent::SessionData(state.clone())),
            ],
            mutated: false,
        }
    }

    fn nothing() -> Self {
        Self {
            deliveries: Vec::new(),
            mutated: false,
        }
    }
}

struct Server {
    registry: SessionRegistry,
    broadcaster: RoomBroadcaster,
    paths_protocol: PathsProtocol,
}

impl Server {
    fn new(config: &Config, srv_tx: WeakServerTx) -> Self {
        let scheduler = InactivityScheduler::new(config.inactivity_timeout, srv_tx);
        Self {
            registry: SessionRegistry::new(config.history_limit, scheduler),
            broadcaster: RoomBroadcaster::new(),
            paths_protocol: config.paths_protocol,
        }
    }

    fn handle_server_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::Connection(command) => self.handle_connection_command(command),
            ServerCommand::InactivityElapsed {
                session_code,
                generation,
            } => self.handle_inactivity(&session_code, generation),
        }
    }

    fn handle_connection_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect {
                from,
                session_code,
                tx,
            } => self.connect(from, &session_code, tx),
            ConnectionCommand::Disconnect { from, session_code } => {
                self.disconnect(from, &session_code)
            }
            ConnectionCommand::ClientEvent { from, event } => self.handle_client_event(from, event),
        }
    }

    fn connect(&mut self, from: ConnectionId, session_code: &str, tx: ConnectionTx) {
        self.broadcaster.insert(from, tx);
        let snapshot = self.registry.join(session_code, from).clone();
        self.broadcaster
            .send_to_one(from, ServerEvent::SessionData(snapshot));
    }

    fn disconnect(&mut self, from: ConnectionId, session_code: &str) {
        self.broadcaster.remove(&from);
        if let Err(err) = self.registry.leave(session_code, from) {
            log::warn!("Connection {} disconnected: {}", from, err);
        }
    }

    fn handle_client_event(&mut self, from: ConnectionId, event: ClientEvent) {
        let session_code = event.session_code().to_owned();
        let name = event.name();
        let session = match self.registry.get_mut(&session_code) {
            Ok(session) => session,
            Err(err) => {
                log::debug!("Ignoring {} from connection {}: {}", name, from, err);
                return;
            }
        };

        log::debug!("Handling {} from connection {} in {}", name, from, session_code);
        let outcome = apply_event(&mut session.state, event, self.paths_protocol);
        if outcome.mutated {
            self.registry.rearm(&session_code);
        }

        for delivery in outcome.deliveries {
            match delivery {
                Delivery::All(event) => {
                    self.broadcaster
                        .broadcast_all(&self.registry, &session_code, event)
                }
                Delivery::ExceptSender(event) => self.broadcaster.broadcast_except_sender(
                    &self.registry,
                    &session_code,
                    event,
                    from,
                ),
                Delivery::Sender(event) => self.broadcaster.send_to_one(from, event),
            }
        }
    }

    fn handle_inactivity(&mut self, session_code: &str, generation: u64) {
        let session = match self.registry.take_elapsed(session_code, generation) {
            Some(session) => session,
            None => {
                log::debug!("Stale inactivity timer {} for {}", generation, session_code);
                return;
            }
        };
        session.state.is_student_locked = false;
        log::info!("Session {} went idle, releasing student lock", session_code);

        self.broadcaster.broadcast_all(
            &self.registry,
            session_code,
            ServerEvent::StudentUnlocked {
                is_student_locked: false,
            },
        );
    }
}

fn apply_event(state: &mut SessionState, event: ClientEvent, protocol: PathsProtocol) -> Outcome {
    match event {
        ClientEvent::UpdateBackground {
            background_image, ..
        } => {
            state.background_image = background_image.clone();
            Outcome::mutation(Delivery::ExceptSender(ServerEvent::BackgroundUpdate {
                background_image,
            }))
        }
        ClientEvent::ClearBackground { .. } => {
            state.background_image.clear();
            Outcome::mutation(Delivery::All(ServerEvent::BackgroundCleared {
                background_image: String::new(),
            }))
        }
        ClientEvent::UpdatePaths(UpdatePaths { update, .. }) => update_paths(state, update, protocol),
        ClientEvent::ClearPaths { .. } => {
            clear_paths(state);
            Outcome::mutation(Delivery::All(ServerEvent::PathsCleared { paths: Vec::new() }))
        }
        ClientEvent::SetStudentLock { is_locked, .. } => {
            state.is_student_locked = is_locked;
            Outcome::mutation(Delivery::All(ServerEvent::StudentLockStatus {
                is_student_locked: is_locked,
            }))
        }
        ClientEvent::SetQuizStatus { is_quiz, .. } => {
            state.is_quiz = is_quiz;
            Outcome::mutation(Delivery::All(ServerEvent::QuizStatusUpdated { is_quiz }))
        }
        ClientEvent::GetQuizStatus { .. } => Outcome::query(Delivery::All(ServerEvent::QuizStatus {
            is_quiz: state.is_quiz,
        })),
        ClientEvent::AddCode { code, .. } => {
            state.codes.push(code.clone());
            Outcome::mutation(Delivery::All(ServerEvent::CodeAdded { new_code: code }))
        }
        ClientEvent::GetAllCodes { .. } => Outcome::query(Delivery::All(ServerEvent::AllCodes {
            codes: state.codes.clone(),
        })),
        ClientEvent::UndoRequest { .. } => match state.undo() {
            Ok(paths) => Outcome::mutation(Delivery::All(ServerEvent::Undo {
                paths: paths.to_vec(),
            })),
            Err(err) => {
                log::debug!("undo_request ignored: {}", err);
                Outcome::nothing()
            }
        },
        ClientEvent::RedoRequest { .. } => match state.redo() {
            Ok(paths) => Outcome::mutation(Delivery::All(ServerEvent::Redo {
                paths: paths.to_vec(),
            })),
            Err(err) => {
                log::debug!("redo_request ignored: {}", err);
                Outcome::nothing()
            }
        },
    }
}

fn update_paths(state: &mut SessionState, update: PathsUpdate, protocol: PathsProtocol) -> Outcome {
    if update.protocol() != protocol {
        let err = MessageError::ProtocolMismatch {
            expected: protocol,
            got: update.protocol(),
        };
        log::warn!("Rejecting update_paths: {}", err);
        return Outcome::query(Delivery::Sender(ServerEvent::InvalidMessage {
            reason: err.to_string(),
        }));
    }

    match update {
        PathsUpdate::Replace { paths } => {
            apply_full_replace(state, paths.clone());
            Outcome::mutation(Delivery::ExceptSender(ServerEvent::PathsUpdate(
                PathsUpdate::Replace { paths },
            )))
        }
        PathsUpdate::Patch { path_patch } => match apply_text_patch(state, &path_patch) {
            Ok(()) => Outcome::mutation(Delivery::ExceptSender(ServerEvent::PathsUpdate(
                PathsUpdate::Patch { path_patch },
            ))),
            Err(PatchError::Conflict { unapplied_hunks }) => {
                log::warn!("Patch conflict on hunks {:?}, resyncing sender", unapplied_hunks);
                Outcome::resync(state, ServerEvent::PatchConflict { unapplied_hunks })
            }
            Err(err) => {
                log::warn!("Rejecting path_patch: {}", err);
                Outcome::resync(
                    state,
                    ServerEvent::InvalidMessage {
                        reason: err.to_string(),
                    },
                )
            }
        },
    }
}

fn spawn_shard(index: usize, config: &Config, runtime: &Handle) -> ServerTx {
    let (srv_tx, mut srv_rx) = channel::<ServerCommand>(SHARD_QUEUE_CAPACITY);
    let weak_tx = srv_tx.downgrade();
    let config = config.clone();

    runtime.spawn(async move {
        let mut server = Server::new(&config, weak_tx);
        log::info!("shard {} - started", index);

        while let Some(command) = srv_rx.recv().await {
            server.handle_server_command(command);
        }
        log::info!("shard {} - terminated", index);
    });

    srv_tx
}

/// Starts the shard workers on `runtime`. They stop once every clone of the
/// returned hub is dropped.
pub fn spawn_server(config: &Config, runtime: &Handle) -> Hub {
    let shards = (0..config.shards.max(1))
        .map(|index| spawn_shard(index, config, runtime))
        .collect::<Vec<_>>();

    Hub {
        shards: shards.into(),
        connection_id_source: Arc::new(AtomicU32::new(1)),
        paths_protocol: config.paths_protocol,
        outbound_buffer: config.outbound_buffer,
    }
}
