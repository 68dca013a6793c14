use std::sync::Arc;

use actix::{fut, Actor, ActorContext, ActorFutureExt, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web::{error, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use actix_web_actors::ws::{CloseCode, CloseReason};
use serde::Deserialize;

use system::{ClientEvent, ConnectionId, MessageError, PathsProtocol, ServerEvent, SessionCode};

use crate::broadcaster::ConnectionTx;
use crate::server::{Hub, ServerCommand};

#[derive(Debug)]
pub enum ConnectionCommand {
    Connect {
        from: ConnectionId,
        session_code: SessionCode,
        tx: ConnectionTx,
    },
    Disconnect {
        from: ConnectionId,
        session_code: SessionCode,
    },
    ClientEvent {
        from: ConnectionId,
        event: ClientEvent,
    },
}

#[derive(Message)]
#[rtype(result = "()")]
enum ConnectionActorMessage {
    Event(Arc<ServerEvent>),
    /// The shard dropped our outbound channel.
    Evicted,
}

struct ConnectionActor {
    connection_id: ConnectionId,
    session_code: SessionCode,
    hub: Hub,
}

impl ConnectionActor {
    /// Hands `command` to the owning shard. The actor reads no further frames
    /// until the shard has accepted it.
    fn forward(&self, ctx: &mut ws::WebsocketContext<Self>, command: ConnectionCommand) {
        let srv_tx = self.hub.shard_for(&self.session_code).clone();
        let send = async move { srv_tx.send(ServerCommand::Connection(command)).await.is_ok() };

        ctx.wait(
            fut::wrap_future::<_, Self>(send).map(|delivered, act, ctx| {
                if !delivered {
                    log::error!("Connection {}: server shard is gone", act.connection_id);
                    ctx.stop();
                }
            }),
        );
    }

    fn reply(&self, ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match event.to_json() {
            Ok(text) => ctx.text(text),
            Err(err) => log::error!("Cannot serialize {}: {}", event.name(), err),
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match parse_client_event(text, &self.session_code) {
            Ok(event) => {
                log::debug!("Ingress {} from connection {}", event.name(), self.connection_id);
                self.forward(
                    ctx,
                    ConnectionCommand::ClientEvent {
                        from: self.connection_id,
                        event,
                    },
                );
            }
            Err(err) => {
                log::warn!("Rejecting message from connection {}: {}", self.connection_id, err);
                self.reply(
                    ctx,
                    &ServerEvent::InvalidMessage {
                        reason: err.to_string(),
                    },
                );
            }
        }
    }
}

/// Decodes a text frame, accepting only events for the joined session.
fn parse_client_event(text: &str, joined: &str) -> Result<ClientEvent, MessageError> {
    let event = ClientEvent::from_json(text)?;
    if event.session_code() != joined {
        return Err(MessageError::ForeignSession {
            expected: joined.to_owned(),
            got: event.session_code().to_owned(),
        });
    }
    Ok(event)
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Arc<ServerEvent>>(self.hub.outbound_buffer());
        self.forward(
            ctx,
            ConnectionCommand::Connect {
                from: self.connection_id,
                session_code: self.session_code.clone(),
                tx,
            },
        );

        let addr = ctx.address();
        let connection_id = self.connection_id;

        tokio::spawn(async move {
            log::debug!("connection {} green thread - started", connection_id);
            while let Some(event) = rx.recv().await {
                if addr.send(ConnectionActorMessage::Event(event)).await.is_err() {
                    break;
                }
            }
            addr.do_send(ConnectionActorMessage::Evicted);
            log::debug!("connection {} green thread - terminated", connection_id);
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        let srv_tx = self.hub.shard_for(&self.session_code).clone();
        let command = ServerCommand::Connection(ConnectionCommand::Disconnect {
            from: self.connection_id,
            session_code: self.session_code.clone(),
        });
        let connection_id = self.connection_id;

        tokio::spawn(async move {
            if srv_tx.send(command).await.is_err() {
                log::warn!("Connection {} stopped after its shard", connection_id);
            }
        });

        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Text(text)) => self.handle_text(&text, ctx),
            Ok(ws::Message::Binary(bin)) => {
                log::warn!(
                    "Connection {} sent {} binary bytes, expecting JSON text",
                    self.connection_id,
                    bin.len()
                );
                self.reply(
                    ctx,
                    &ServerEvent::InvalidMessage {
                        reason: "binary frames are not supported".into(),
                    },
                );
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(err) => {
                log::warn!("Connection {} protocol error: {}", self.connection_id, err);
                ctx.stop();
            }
            _ => (),
        }
    }
}

/// Egress
impl Handler<ConnectionActorMessage> for ConnectionActor {
    type Result = ();

    fn handle(&mut self, msg: ConnectionActorMessage, ctx: &mut ws::WebsocketContext<Self>) -> Self::Result {
        match msg {
            ConnectionActorMessage::Event(event) => {
                log::debug!("Egress {} to connection {}", event.name(), self.connection_id);
                self.reply(ctx, &event);
            }
            ConnectionActorMessage::Evicted => {
                log::warn!("Closing connection {}: outbound queue overflowed", self.connection_id);
                ctx.close(Some(CloseReason {
                    code: CloseCode::Again,
                    description: Some("fell behind, reconnect to resync".into()),
                }));
                ctx.stop();
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    session_code: SessionCode,
    paths_protocol: Option<PathsProtocol>,
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    params: web::Query<ConnectParams>,
    hub: web::Data<Hub>,
) -> Result<HttpResponse, Error> {
    let params = params.into_inner();
    if params.session_code.is_empty() {
        return Err(error::ErrorBadRequest("session_code must not be empty"));
    }
    if let Some(requested) = params.paths_protocol {
        if requested != hub.paths_protocol() {
            log::warn!(
                "Refusing client speaking paths protocol '{}', server speaks '{}'",
                requested,
                hub.paths_protocol()
            );
            return Ok(HttpResponse::Conflict().body(format!(
                "this server speaks paths protocol '{}'",
                hub.paths_protocol()
            )));
        }
    }

    let actor = ConnectionActor {
        connection_id: hub.new_connection_id(),
        session_code: params.session_code,
        hub: hub.get_ref().clone(),
    };
    ws::start(actor, &req, stream)
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use tokio::runtime::Handle;

    use super::*;
    use crate::config::Config;
    use crate::handlers::root;
    use crate::server::spawn_server;

    #[::std::prelude::v1::test]
    fn it_accepts_events_for_the_joined_session() {
        let text = r#"{"event":"clear_paths","data":{"session_code":"ABC123"}}"#;
        let event = parse_client_event(text, "ABC123").expect("");
        assert_eq!(event.session_code(), "ABC123");
    }

    #[::std::prelude::v1::test]
    fn it_rejects_events_for_another_session() {
        let text = r#"{"event":"clear_paths","data":{"session_code":"XYZ789"}}"#;
        match parse_client_event(text, "ABC123") {
            Err(MessageError::ForeignSession { expected, got }) => {
                assert_eq!(expected, "ABC123");
                assert_eq!(got, "XYZ789");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[::std::prelude::v1::test]
    fn it_rejects_malformed_frames() {
        assert!(matches!(
            parse_client_event("not json", "ABC123"),
            Err(MessageError::Malformed(_))
        ));
    }

    async fn status_of(uri: &str) -> StatusCode {
        let hub = spawn_server(&Config::default(), &Handle::current());
        let app = test::init_service(App::new().app_data(web::Data::new(hub)).configure(root)).await;
        let req = test::TestRequest::get().uri(uri).to_request();
        test::call_service(&app, req).await.status()
    }

    #[actix_web::test]
    async fn it_refuses_an_empty_session_code() {
        assert_eq!(status_of("/ws?session_code=").await, StatusCode::BAD_REQUEST);
        assert_eq!(status_of("/ws").await, StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn it_refuses_the_other_paths_protocol() {
        assert_eq!(
            status_of("/ws?session_code=ABC123&paths_protocol=patch").await,
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of("/ws?session_code=ABC123&paths_protocol=diff").await,
            StatusCode::BAD_REQUEST
        );
    }
}
