//! Connection loss and the grace window that follows it.
//!
//! A dropped player stays on the roster, marked disconnected, long enough
//! to reconnect. Owners get a longer window than everyone else. When the
//! window closes without a reconnect the player is removed, and a lobby
//! left with nobody connected to run it is torn down.

use std::sync::Arc;

use serde_json::Value;

use super::{announce, settle};
use crate::events::HandlerResult;
use crate::lobby::LobbyError;
use crate::rooms::{ConnId, Session};
use crate::server::Server;
use crate::types::ConnectionStatus;

pub async fn disconnect_player(server: Arc<Server>, conn: ConnId, data: Value) -> HandlerResult {
    let reason = data
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("transport close");
    let session = server.rooms.session(conn);
    tracing::info!(
        "Client disconnect: {} {} {}",
        reason,
        session.lobby_code,
        session.player_name
    );
    if session.is_empty() {
        return Ok(());
    }
    let Session {
        player_name,
        lobby_code,
    } = session;

    server.rooms.leave(&lobby_code, conn);
    server.rooms.clear_session(conn);

    let lobby = match server
        .lobbies
        .mark_connection(&player_name, &lobby_code, ConnectionStatus::Disconnected)
        .await
    {
        Ok(lobby) => lobby,
        Err(LobbyError::NotFound(_) | LobbyError::PlayerNotFound { .. }) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    announce(&server, &lobby).await?;

    let owner = lobby.is_owner(&player_name);
    let delay = if owner {
        server.config.owner_grace
    } else {
        server.config.player_grace
    };
    let expiry = expire(Arc::clone(&server), lobby_code.clone(), player_name.clone(), owner);
    server.grace.schedule(&lobby_code, &player_name, delay, expiry);
    Ok(())
}

async fn expire(server: Arc<Server>, code: String, name: String, owner: bool) {
    if let Err(e) = evict(&server, &code, &name, owner).await {
        tracing::error!("Grace expiry for {} in {} failed: {}", name, code, e);
    }
}

async fn evict(server: &Server, code: &str, name: &str, owner: bool) -> Result<(), LobbyError> {
    let Some(lobby) = server.lobbies.get(code).await? else {
        return Ok(());
    };
    match lobby.player(name) {
        None => return Ok(()),
        Some(player) if player.is_connected() => {
            tracing::debug!("{} is back in {}", name, code);
            return Ok(());
        }
        Some(_) => {}
    }

    tracing::info!("{} did not reconnect to {}", name, code);
    let lobby = server.lobbies.leave(name, code).await?;

    if owner && lobby.connected_players().next().is_none() {
        tracing::info!("Owner of {} gone with nobody connected, closing lobby", code);
        server.lobbies.destroy(code).await?;
        return Ok(());
    }
    settle(server, lobby).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::events::DISCONNECT_PLAYER;
    use crate::handlers::testing::{Client, Harness};
    use crate::types::{ConnectionStatus, ServerMsg};

    async fn drop_connection(harness: &Harness, client: &Client) {
        harness
            .send(client, DISCONNECT_PLAYER, json!({ "reason": "transport close" }))
            .await;
        harness.server.rooms.unregister(client.id);
    }

    #[tokio::test(start_paused = true)]
    async fn owner_is_replaced_after_grace_window() {
        let harness = Harness::new();
        let mut alice = harness.connect(1);
        let mut bob = harness.connect(2);
        let code = harness.create(&mut alice, "Alice").await;
        harness.join(&mut bob, "Bob", &code).await;
        bob.drain();

        drop_connection(&harness, &alice).await;

        let update = bob.last_update().unwrap();
        let alice_entry = update.player("Alice").unwrap();
        assert_eq!(alice_entry.connected, ConnectionStatus::Disconnected);
        assert_eq!(update.owner.as_deref(), Some("Alice"));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(harness.server.grace.is_pending(&code, "Alice"));
        assert!(bob.drain().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let update = bob.last_update().unwrap();
        assert_eq!(update.owner.as_deref(), Some("Bob"));
        assert!(update.player("Bob").unwrap().owner);
        assert!(update.player("Alice").is_none());
        assert!(!harness.server.grace.is_pending(&code, "Alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_window_keeps_player() {
        let harness = Harness::new();
        let mut alice = harness.connect(1);
        let mut bob = harness.connect(2);
        let code = harness.create(&mut alice, "Alice").await;
        harness.join(&mut bob, "Bob", &code).await;

        drop_connection(&harness, &bob).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut bob_again = harness.connect(2);
        harness
            .send(&bob_again, "ReJoinLobby", json!({ "playerName": "Bob", "lobbyCode": code }))
            .await;
        assert!(matches!(bob_again.drain()[1], ServerMsg::LobbyJoined(_)));
        assert!(!harness.server.grace.is_pending(&code, "Bob"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        let lobby = harness.server.lobbies.get(&code).await.unwrap().unwrap();
        assert!(lobby.player("Bob").unwrap().is_connected());
        assert_eq!(lobby.players.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn player_is_removed_after_short_window() {
        let harness = Harness::new();
        let mut alice = harness.connect(1);
        let mut bob = harness.connect(2);
        let code = harness.create(&mut alice, "Alice").await;
        harness.join(&mut bob, "Bob", &code).await;

        drop_connection(&harness, &bob).await;
        alice.drain();

        tokio::time::sleep(Duration::from_secs(4)).await;
        let update = alice.last_update().unwrap();
        assert_eq!(update.players.len(), 1);
        assert_eq!(update.owner.as_deref(), Some("Alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn lobby_closes_when_owner_leaves_nobody_connected() {
        let harness = Harness::new();
        let mut alice = harness.connect(1);
        let mut bob = harness.connect(2);
        let code = harness.create(&mut alice, "Alice").await;
        harness.join(&mut bob, "Bob", &code).await;

        drop_connection(&harness, &bob).await;
        drop_connection(&harness, &alice).await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(harness.server.lobbies.get(&code).await.unwrap().is_none());
        assert!(harness.server.lobbies.get_lobby_data(&code).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_last_active_player_completes_the_screen() {
        let harness = Harness::new();
        let mut alice = harness.connect(1);
        let mut bob = harness.connect(2);
        let mut cara = harness.connect(3);
        let code = harness.create(&mut alice, "Alice").await;
        harness.join(&mut bob, "Bob", &code).await;
        harness.join(&mut cara, "Cara", &code).await;
        harness
            .send(&alice, "StartGame", json!({ "lobbyCode": code, "mode": "Standard" }))
            .await;
        for (client, name) in [(&alice, "Alice"), (&bob, "Bob")] {
            harness
                .send(
                    client,
                    "DonePlayer",
                    json!({ "playerName": name, "lobbyCode": code, "playerData": {} }),
                )
                .await;
        }
        alice.drain();
        bob.drain();

        drop_connection(&harness, &cara).await;
        match alice.drain().as_slice() {
            [ServerMsg::PlayersDone { lobby, .. }] => {
                assert!(!lobby.player("Cara").unwrap().is_connected())
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(bob.drain().is_empty());

        tokio::time::sleep(Duration::from_secs(4)).await;
        match alice.drain().as_slice() {
            [ServerMsg::PlayersDone { lobby, .. }] => {
                assert_eq!(lobby.players.len(), 2);
                assert!(lobby.player("Cara").is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn disconnect_without_session_is_ignored() {
        let harness = Harness::new();
        let mut stranger = harness.connect(7);
        harness.send(&stranger, DISCONNECT_PLAYER, json!(null)).await;
        assert!(stranger.drain().is_empty());
    }
}
