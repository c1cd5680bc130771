use std::sync::Arc;

use crate::config::ServerConfig;
use crate::gif::GifExporter;
use crate::grace::GraceTimers;
use crate::lobby::Lobbies;
use crate::rooms::Rooms;
use crate::store::DocumentStore;

/// Everything a handler can reach.
pub struct Server {
    pub config: ServerConfig,
    pub lobbies: Lobbies,
    pub rooms: Rooms,
    pub grace: GraceTimers,
    pub gifs: GifExporter,
}

impl Server {
    pub fn new(config: ServerConfig, store: Arc<dyn DocumentStore>) -> Arc<Self> {
        let lobbies = Lobbies::new(store, config.lobby_ttl, config.max_players);
        let gifs = GifExporter::new(
            &config.gif_save_path,
            &config.gif_encoder_path,
            config.gif_timeout,
            config.gif_fps,
        );
        Arc::new(Self {
            config,
            lobbies,
            rooms: Rooms::new(),
            grace: GraceTimers::new(),
            gifs,
        })
    }

    /// Cancels pending timers and closes the store.
    pub async fn shutdown(&self) {
        self.grace.cancel_all();
        if let Err(e) = self.lobbies.store().close().await {
            tracing::error!("Failed to close store: {}", e);
        }
    }
}
