use std::sync::Arc;

use serde_json::Value;

use super::{require_code, require_owner};
use crate::events::{HandlerResult, payload};
use crate::lobby::LobbyError;
use crate::rooms::ConnId;
use crate::server::Server;
use crate::types::{DonePlayerReq, LobbyReq, LobbyStatus, NextScreenReq, ServerMsg, StartGameReq};

pub async fn start_game(server: Arc<Server>, conn: ConnId, data: Value) -> HandlerResult {
    let req: StartGameReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;
    let lobby = server
        .lobbies
        .get(code)
        .await?
        .ok_or_else(|| LobbyError::NotFound(code.to_string()))?;
    require_owner(&server, conn, &lobby, "start the game")?;

    let lobby = server
        .lobbies
        .start(code, &req.mode, &req.app_screen, req.settings)
        .await?;
    server
        .rooms
        .broadcast(code, ServerMsg::LobbyUpdated(lobby));
    Ok(())
}

/// A player finished the current screen. The player that completes the
/// screen is asked to advance it; everyone else just sees progress.
pub async fn done_player(server: Arc<Server>, conn: ConnId, data: Value) -> HandlerResult {
    let req: DonePlayerReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;

    let lobby = server.lobbies.done(&req.player_name, code).await?;
    server.lobbies.set_lobby_data(code, req.player_data).await?;
    let lobby_data = server.lobbies.get_lobby_data(code).await?.unwrap_or_default();

    if lobby.status == LobbyStatus::Started && lobby.all_done() {
        tracing::info!("All players done in {} screen {}", code, lobby.game_screen);
        server
            .rooms
            .emit(conn, ServerMsg::PlayersDone { lobby, lobby_data });
    } else {
        server
            .rooms
            .broadcast(code, ServerMsg::LobbyDataUpdate(lobby_data));
        server
            .rooms
            .broadcast(code, ServerMsg::LobbyUpdated(lobby));
    }
    Ok(())
}

pub async fn next_screen(server: Arc<Server>, _conn: ConnId, data: Value) -> HandlerResult {
    let req: NextScreenReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;

    let lobby = server.lobbies.next_screen(code).await?;
    server.lobbies.set_lobby_data(code, req.lobby_data).await?;
    let lobby_data = server.lobbies.get_lobby_data(code).await?.unwrap_or_default();

    server.rooms.broadcast(code, ServerMsg::NextScreen);
    server
        .rooms
        .broadcast(code, ServerMsg::LobbyDataUpdate(lobby_data));
    server
        .rooms
        .broadcast(code, ServerMsg::LobbyUpdated(lobby.clone()));

    if lobby.is_final_screen() {
        tracing::info!("Final screen reached in {}", code);
        let ended = server.lobbies.end_game(code).await?;
        server
            .rooms
            .broadcast(code, ServerMsg::LobbyUpdated(ended));
    }
    Ok(())
}

pub async fn end_game(server: Arc<Server>, _conn: ConnId, data: Value) -> HandlerResult {
    let req: LobbyReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;

    let lobby = server.lobbies.end_game(code).await?;
    server
        .rooms
        .broadcast(code, ServerMsg::LobbyUpdated(lobby));
    Ok(())
}

pub async fn end_game_round(server: Arc<Server>, _conn: ConnId, data: Value) -> HandlerResult {
    let req: LobbyReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;

    let lobby = server.lobbies.next_round(code).await?;
    server
        .rooms
        .broadcast(code, ServerMsg::GameRoundEnded(lobby));
    Ok(())
}
