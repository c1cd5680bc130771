use std::sync::Arc;

use serde_json::Value;

use super::require_code;
use crate::events::{HandlerResult, payload};
use crate::lobby::{LobbyError, sanitize_name};
use crate::rooms::ConnId;
use crate::server::Server;
use crate::types::{PlayerLobbyReq, ServerMsg};

/// Renders `playerName`'s chain as a GIF and sends it back to the requester.
pub async fn create_gif(server: Arc<Server>, conn: ConnId, data: Value) -> HandlerResult {
    let req: PlayerLobbyReq = payload(data)?;
    let code = require_code(&req.lobby_code)?;
    let player = sanitize_name(&req.player_name)?;
    tracing::info!("Create GIF: {} {}", player, code);

    let lobby = server
        .lobbies
        .get(code)
        .await?
        .ok_or_else(|| LobbyError::NotFound(code.to_string()))?;
    let lobby_data = server.lobbies.get_lobby_data(code).await?.unwrap_or_default();

    let export = server.gifs.export(&lobby, &player, &lobby_data).await?;
    server.rooms.emit(
        conn,
        ServerMsg::GifCreated {
            data_url: export.data_url,
            file_name: export.file_name,
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::config::ServerConfig;
    use crate::handlers::testing::Harness;
    use crate::types::ServerMsg;

    #[tokio::test]
    async fn unsupported_mode_is_reported() {
        let harness = Harness::new();
        let mut alice = harness.connect(1);
        let code = harness.create(&mut alice, "Alice").await;
        harness
            .send(
                &alice,
                "StartGame",
                json!({ "lobbyCode": code, "mode": "Slice3" }),
            )
            .await;
        alice.drain();

        harness
            .send(&alice, "CreateGIF", json!({ "playerName": "Alice", "lobbyCode": code }))
            .await;
        match alice.drain().as_slice() {
            [ServerMsg::Error { kind, message, .. }] => {
                assert_eq!(kind, "CreateGIF");
                assert_eq!(message, "Invalid GIF Maker Slice3");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cached_gif_is_sent_to_requester_only() {
        let root = std::env::temp_dir().join(format!("opengarlic-export-{}", uuid::Uuid::new_v4()));
        let harness = Harness::with_config(ServerConfig {
            gif_save_path: root.to_string_lossy().into_owned(),
            gif_encoder_path: "/nonexistent/encoder".into(),
            ..ServerConfig::default()
        });
        let mut alice = harness.connect(1);
        let mut bob = harness.connect(2);
        let code = harness.create(&mut alice, "Alice").await;
        harness.join(&mut bob, "Bob", &code).await;
        harness
            .send(&alice, "StartGame", json!({ "lobbyCode": code, "mode": "Standard" }))
            .await;
        alice.drain();
        bob.drain();

        let path = harness.server.gifs.gif_path(&code, "Bob");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"GIF89a").unwrap();

        harness
            .send(&alice, "CreateGIF", json!({ "playerName": "Bob", "lobbyCode": code }))
            .await;
        match alice.drain().as_slice() {
            [ServerMsg::GifCreated { data_url, file_name }] => {
                assert_eq!(file_name, "Bob.gif");
                assert!(data_url.starts_with("data:image/gif;base64,"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(bob.drain().is_empty());

        std::fs::remove_dir_all(root).unwrap();
    }
}
