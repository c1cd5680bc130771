//! Socket event handlers, grouped by concern.
//!
//! Every handler has the same shape: it receives the shared [`Server`], the
//! connection that sent the event and the raw `data` payload.

use crate::events::HandlerError;
use crate::lobby::{CODE_LEN, LobbyError};
use crate::rooms::{ConnId, Session};
use crate::server::Server;
use crate::types::{Lobby, LobbyStatus, ServerMsg};

pub mod disconnect;
pub mod export;
pub mod game;
pub mod lobby;

/// Rejects codes that cannot name a lobby before touching the store.
fn require_code(code: &str) -> Result<&str, HandlerError> {
    let code = code.trim();
    if code.len() != CODE_LEN || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(HandlerError::InvalidCode(code.to_string()));
    }
    Ok(code)
}

/// The sender must be the owner of `lobby` according to its own session.
fn require_owner(
    server: &Server,
    conn: ConnId,
    lobby: &Lobby,
    action: &'static str,
) -> Result<(), HandlerError> {
    let session = server.rooms.session(conn);
    if session.lobby_code != lobby.code || !lobby.is_owner(&session.player_name) {
        return Err(HandlerError::NotOwner(action));
    }
    Ok(())
}

/// Tells the room about a changed lobby. Once every connected player is
/// done the first room member is asked to advance instead.
async fn announce(server: &Server, lobby: &Lobby) -> Result<(), LobbyError> {
    if lobby.status == LobbyStatus::Started && lobby.all_done() {
        let lobby_data = server
            .lobbies
            .get_lobby_data(&lobby.code)
            .await?
            .unwrap_or_default();
        if let Some(first) = server.rooms.members(&lobby.code).first() {
            server.rooms.emit(
                *first,
                ServerMsg::PlayersDone {
                    lobby: lobby.clone(),
                    lobby_data,
                },
            );
        }
        return Ok(());
    }

    if lobby.status != LobbyStatus::Ended {
        server
            .rooms
            .broadcast(&lobby.code, ServerMsg::LobbyUpdated(lobby.clone()));
    }
    Ok(())
}

/// Follow-up after someone left the roster: an empty lobby is destroyed and
/// an ownerless one gets the first connected player as owner.
async fn settle(server: &Server, lobby: Lobby) -> Result<(), LobbyError> {
    if lobby.players.is_empty() {
        server.lobbies.destroy(&lobby.code).await?;
        return Ok(());
    }

    let lobby = if lobby.owner.is_none() {
        match server.lobbies.set_owner(None, &lobby.code).await {
            Ok(promoted) => promoted,
            Err(LobbyError::NoEligibleOwner(code)) => {
                tracing::warn!("Lobby {} has no connected player to own it", code);
                lobby
            }
            Err(e) => return Err(e),
        }
    } else {
        lobby
    };

    announce(server, &lobby).await
}

/// Removes the connection's player from its lobby, if it is in one.
async fn leave_current(server: &Server, conn: ConnId) -> Result<(), LobbyError> {
    let session = server.rooms.session(conn);
    if session.is_empty() {
        return Ok(());
    }
    let Session {
        player_name,
        lobby_code,
    } = session;

    server.rooms.leave(&lobby_code, conn);
    server.rooms.clear_session(conn);
    server.grace.cancel(&lobby_code, &player_name);

    match server.lobbies.leave(&player_name, &lobby_code).await {
        Ok(lobby) => settle(server, lobby).await,
        Err(LobbyError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
