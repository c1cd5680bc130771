use std::sync::Arc;

use serde_json::Value;

use super::{announce, leave_current, require_code, require_owner};
use crate::events::{HandlerError, HandlerResult, payload};
use crate::lobby::{LobbyError, sanitize_name};
use crate::rooms::ConnId;
use crate::server::Server;
use crate::types::{CreateLobbyReq, Lobby, PlayerLobbyReq, ServerMsg};

pub async fn create_lobby(server: Arc<Server>, conn: ConnId, data: Value) -> HandlerResult {
    let req: CreateLobbyReq = payload(data)?;
    let name = sanitize_name(&req.player_name)?;
    tracing::info!("Create lobby: {}", name);

    leave_current(&server, conn).await?;
    let lobby = server.lobbies.create(&name, &req.app_screen).await?;

    server.rooms.join(&lobby.code, conn);
    server.rooms.set_session(conn, &name, &lobby.code);
    server.rooms.emit(conn, ServerMsg::LobbyCreated(lobby));
    Ok(())
}

pub async fn join_lobby(server: Arc<Server>, conn: ConnId, data: Value) -> HandlerResult {
    let req: PlayerLobbyReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;
    let name = sanitize_name(&req.player_name)?;
    tracing::info!("Join lobby: {} {}", name, code);

    check_ban(&server, conn, code).await?;
    let lobby = server.lobbies.join(&name, code).await?;
    enter(&server, conn, &name, lobby).await
}

pub async fn rejoin_lobby(server: Arc<Server>, conn: ConnId, data: Value) -> HandlerResult {
    let req: PlayerLobbyReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;
    let name = sanitize_name(&req.player_name)?;
    tracing::info!("Rejoin lobby: {} {}", name, code);

    check_ban(&server, conn, code).await?;
    let lobby = server.lobbies.rejoin(&name, code).await?;
    enter(&server, conn, &name, lobby).await
}

pub async fn kick_lobby(server: Arc<Server>, conn: ConnId, data: Value) -> HandlerResult {
    let req: PlayerLobbyReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;
    let lobby = existing(&server, code).await?;
    require_owner(&server, conn, &lobby, "kick players")?;
    tracing::info!("Kick lobby: {} {}", req.player_name, code);

    let target = remove_member(&server, lobby, &req.player_name).await?;
    if let Some(target) = target {
        server.rooms.emit(target, ServerMsg::KickedFromLobby);
    }
    Ok(())
}

pub async fn ban_lobby(server: Arc<Server>, conn: ConnId, data: Value) -> HandlerResult {
    let req: PlayerLobbyReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;
    let lobby = existing(&server, code).await?;
    require_owner(&server, conn, &lobby, "ban players")?;
    tracing::info!("Ban lobby: {} {}", req.player_name, code);

    let target = remove_member(&server, lobby, &req.player_name).await?;
    match target.and_then(|target| server.rooms.addr(target).map(|addr| (target, addr))) {
        Some((target, addr)) => {
            server.lobbies.ban_player(code, &addr.to_string()).await?;
            server.rooms.emit(target, ServerMsg::BannedFromLobby);
        }
        None => tracing::warn!(
            "No connection for {} in {}, address not banned",
            req.player_name,
            code
        ),
    }
    Ok(())
}

pub async fn quit_lobby(server: Arc<Server>, conn: ConnId, _data: Value) -> HandlerResult {
    let session = server.rooms.session(conn);
    tracing::info!("Quit lobby: {} {}", session.player_name, session.lobby_code);
    leave_current(&server, conn).await?;
    Ok(())
}

async fn existing(server: &Server, code: &str) -> Result<Lobby, HandlerError> {
    server
        .lobbies
        .get(code)
        .await?
        .ok_or_else(|| LobbyError::NotFound(code.to_string()).into())
}

async fn check_ban(server: &Server, conn: ConnId, code: &str) -> HandlerResult {
    let Some(addr) = server.rooms.addr(conn) else {
        return Ok(());
    };
    let addr = addr.to_string();
    if server.lobbies.get_bans(code).await?.contains(&addr) {
        tracing::info!("Banned address {} tried to enter {}", addr, code);
        return Err(HandlerError::Banned(code.to_string()));
    }
    Ok(())
}

/// Subscribes the connection to a lobby it was just admitted to and brings
/// it and the rest of the room up to date.
async fn enter(server: &Server, conn: ConnId, name: &str, lobby: Lobby) -> HandlerResult {
    let previous = server.rooms.session(conn);
    if !previous.is_empty()
        && (previous.lobby_code != lobby.code
            || previous.player_name.to_lowercase() != name.to_lowercase())
    {
        leave_current(server, conn).await?;
    }

    server.grace.cancel(&lobby.code, name);
    server.rooms.join(&lobby.code, conn);
    server.rooms.set_session(conn, name, &lobby.code);

    let lobby_data = server
        .lobbies
        .get_lobby_data(&lobby.code)
        .await?
        .unwrap_or_default();
    server.rooms.emit(conn, ServerMsg::LobbyDataUpdate(lobby_data));
    server.rooms.emit(conn, ServerMsg::LobbyJoined(lobby.clone()));
    let code = lobby.code.clone();
    server.rooms.broadcast(&code, ServerMsg::LobbyUpdated(lobby));
    Ok(())
}

/// Takes `name` off the roster on the owner's behalf. Returns the
/// connection that was playing as `name`, if it is still around.
async fn remove_member(
    server: &Server,
    lobby: Lobby,
    name: &str,
) -> Result<Option<ConnId>, HandlerError> {
    if lobby.is_owner(name) {
        return Err(HandlerError::Rejected(
            "The lobby owner cannot be removed".to_string(),
        ));
    }
    if lobby.player(name).is_none() {
        return Err(LobbyError::PlayerNotFound {
            name: name.to_string(),
            code: lobby.code.clone(),
        }
        .into());
    }

    let target = server.rooms.find_member(&lobby.code, name);
    if let Some(target) = target {
        server.rooms.leave(&lobby.code, target);
        server.rooms.clear_session(target);
    }
    server.grace.cancel(&lobby.code, name);

    let lobby = server.lobbies.leave(name, &lobby.code).await?;
    announce(server, &lobby).await?;
    Ok(target)
}
