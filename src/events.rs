//! Maps inbound message types to handlers.
//!
//! The handler table is built once at startup and handed to the socket
//! loop. A failing handler never escapes: its error is reported to the
//! originating connection as an `error` event named after the message type.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::gif::GifError;
use crate::handlers;
use crate::lobby::LobbyError;
use crate::rooms::ConnId;
use crate::server::Server;
use crate::types::ServerMsg;

/// Raised by the socket loop when a connection closes; never accepted from
/// clients.
pub const DISCONNECT_PLAYER: &str = "DisconnectPlayer";

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid message data: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Invalid Lobby Code: {0}")]
    InvalidCode(String),
    #[error("You are banned from lobby {0}")]
    Banned(String),
    #[error("Only the lobby owner can {0}")]
    NotOwner(&'static str),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Lobby(#[from] LobbyError),
    #[error(transparent)]
    Gif(#[from] GifError),
}

impl HandlerError {
    pub fn is_ban(&self) -> bool {
        matches!(self, Self::Banned(_))
    }
}

pub type HandlerResult = Result<(), HandlerError>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
pub type Handler = Arc<dyn Fn(Arc<Server>, ConnId, Value) -> HandlerFuture + Send + Sync>;

/// Decodes a handler payload.
pub fn payload<T: DeserializeOwned>(data: Value) -> Result<T, HandlerError> {
    Ok(serde_json::from_value(data)?)
}

fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<Server>, ConnId, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |server, conn, data| Box::pin(f(server, conn, data)))
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full OpenGarlic event set.
    pub fn standard() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register("CreateLobby", handler(handlers::lobby::create_lobby));
        dispatcher.register("JoinLobby", handler(handlers::lobby::join_lobby));
        dispatcher.register("ReJoinLobby", handler(handlers::lobby::rejoin_lobby));
        dispatcher.register("KickLobby", handler(handlers::lobby::kick_lobby));
        dispatcher.register("BanLobby", handler(handlers::lobby::ban_lobby));
        dispatcher.register("QuitLobby", handler(handlers::lobby::quit_lobby));
        dispatcher.register("StartGame", handler(handlers::game::start_game));
        dispatcher.register("DonePlayer", handler(handlers::game::done_player));
        dispatcher.register("NextScreen", handler(handlers::game::next_screen));
        dispatcher.register("EndGame", handler(handlers::game::end_game));
        dispatcher.register("EndGameRound", handler(handlers::game::end_game_round));
        dispatcher.register("CreateGIF", handler(handlers::export::create_gif));
        dispatcher.register(DISCONNECT_PLAYER, handler(handlers::disconnect::disconnect_player));
        dispatcher
    }

    pub fn register(&mut self, name: &'static str, handler: Handler) {
        self.handlers.insert(name, handler);
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Runs the handler for `kind`. Returns false if no handler is registered.
    pub async fn dispatch(&self, server: &Arc<Server>, conn: ConnId, kind: &str, data: Value) -> bool {
        let Some(handler) = self.handlers.get(kind) else {
            tracing::warn!("Unknown event type: {}", kind);
            return false;
        };

        if let Err(e) = handler(server.clone(), conn, data).await {
            tracing::warn!("{} failed for {}: {}", kind, conn, e);
            server.rooms.emit(
                conn,
                ServerMsg::Error {
                    kind: kind.to_string(),
                    message: e.to_string(),
                    banned: e.is_ban().then_some(true),
                },
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn standard_table_covers_every_message_type() {
        let names = Dispatcher::standard().event_names();
        for expected in [
            "BanLobby",
            "CreateGIF",
            "CreateLobby",
            "DisconnectPlayer",
            "DonePlayer",
            "EndGame",
            "EndGameRound",
            "JoinLobby",
            "KickLobby",
            "NextScreen",
            "QuitLobby",
            "ReJoinLobby",
            "StartGame",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert_eq!(names.len(), 13);
    }

    #[tokio::test]
    async fn handler_errors_become_error_events() {
        let server = Server::new(ServerConfig::default(), Arc::new(MemoryStore::new()));
        let conn = uuid::Uuid::new_v4();
        let mut rx = server.rooms.register(conn, IpAddr::V4(Ipv4Addr::LOCALHOST));

        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            "Explode",
            handler(|_, _, _| async { Err(HandlerError::Rejected("boom".into())) }),
        );

        assert!(dispatcher.dispatch(&server, conn, "Explode", json!({})).await);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMsg::Error {
                kind: "Explode".into(),
                message: "boom".into(),
                banned: None,
            }
        );

        assert!(!dispatcher.dispatch(&server, conn, "Nope", json!({})).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_payload_is_reported() {
        let server = Server::new(ServerConfig::default(), Arc::new(MemoryStore::new()));
        let conn = uuid::Uuid::new_v4();
        let mut rx = server.rooms.register(conn, IpAddr::V4(Ipv4Addr::LOCALHOST));

        let dispatcher = Dispatcher::standard();
        dispatcher
            .dispatch(&server, conn, "StartGame", json!({ "lobbyCode": 7 }))
            .await;
        match rx.try_recv().unwrap() {
            ServerMsg::Error { kind, message, .. } => {
                assert_eq!(kind, "StartGame");
                assert!(message.starts_with("Invalid message data"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
