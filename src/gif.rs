//! GIF export of a player's turn chain.
//!
//! Frames are produced by a [`FrameRenderer`] chosen by game mode and
//! assembled by an external encoder binary (gifski-compatible command line).
//! Finished GIFs are cached on disk per lobby and player.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::process::Command;

use crate::types::{Lobby, LobbyData, TurnEntry, turn_entries};

#[derive(Debug, thiserror::Error)]
pub enum GifError {
    #[error("Invalid GIF Maker {0}")]
    UnsupportedMode(String),
    #[error("No frames to render for {0}")]
    NoFrames(String),
    #[error("Turn {0} does not hold valid image data")]
    BadImage(usize),
    #[error("GIF encoder failed: {0}")]
    Encoder(String),
    #[error("GIF encoder timed out after {0:?}")]
    Timeout(Duration),
    #[error("GIF file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GifExport {
    pub data_url: String,
    pub file_name: String,
}

#[async_trait]
pub trait FrameRenderer: Send + Sync {
    /// Writes frames for `chain` into `dir` and returns their file names in
    /// playback order.
    async fn render(&self, player: &str, chain: &[TurnEntry], dir: &Path)
    -> Result<Vec<String>, GifError>;
}

/// Renderer for the Standard mode: image turns become frames as-is.
pub struct StandardFrames;

#[async_trait]
impl FrameRenderer for StandardFrames {
    async fn render(
        &self,
        player: &str,
        chain: &[TurnEntry],
        dir: &Path,
    ) -> Result<Vec<String>, GifError> {
        let mut frames = Vec::new();
        for (index, entry) in chain.iter().enumerate() {
            if !entry.is_image() {
                tracing::debug!("skipping text turn {} for {}", index, player);
                continue;
            }
            let bytes = decode_data_url(&entry.value).ok_or(GifError::BadImage(index))?;
            let file = format!("{player}.frame.{index:03}.png");
            tokio::fs::write(dir.join(&file), bytes).await?;
            frames.push(file);
        }
        Ok(frames)
    }
}

/// Decodes a base64 `data:` URL into its bytes.
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let (header, payload) = url.strip_prefix("data:")?.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    STANDARD.decode(payload.trim()).ok()
}

fn gif_data_url(bytes: &[u8]) -> String {
    format!("data:image/gif;base64,{}", STANDARD.encode(bytes))
}

pub struct GifExporter {
    save_path: PathBuf,
    encoder: PathBuf,
    timeout: Duration,
    fps: u32,
    renderers: HashMap<String, Arc<dyn FrameRenderer>>,
}

impl GifExporter {
    pub fn new(
        save_path: impl Into<PathBuf>,
        encoder: impl Into<PathBuf>,
        timeout: Duration,
        fps: u32,
    ) -> Self {
        Self {
            save_path: save_path.into(),
            encoder: encoder.into(),
            timeout,
            fps,
            renderers: HashMap::new(),
        }
        .with_renderer("Standard", Arc::new(StandardFrames))
    }

    pub fn with_renderer(mut self, mode: &str, renderer: Arc<dyn FrameRenderer>) -> Self {
        self.renderers.insert(mode.to_string(), renderer);
        self
    }

    pub fn gif_path(&self, code: &str, player: &str) -> PathBuf {
        self.save_path.join(code).join(format!("{player}.gif"))
    }

    /// Builds (or reuses) the GIF of `player`'s chain in `lobby`.
    pub async fn export(
        &self,
        lobby: &Lobby,
        player: &str,
        data: &LobbyData,
    ) -> Result<GifExport, GifError> {
        let renderer = self
            .renderers
            .get(&lobby.mode)
            .ok_or_else(|| GifError::UnsupportedMode(lobby.mode.clone()))?;

        let dir = self.save_path.join(&lobby.code);
        let file_name = format!("{player}.gif");
        let path = dir.join(&file_name);

        if tokio::fs::try_exists(&path).await? {
            tracing::info!("GIF cache hit: {}", path.display());
            let bytes = tokio::fs::read(&path).await?;
            return Ok(GifExport {
                data_url: gif_data_url(&bytes),
                file_name,
            });
        }

        tokio::fs::create_dir_all(&dir).await?;

        let chain = turn_entries(data, player);
        let frames = renderer.render(player, &chain, &dir).await?;
        if frames.is_empty() {
            return Err(GifError::NoFrames(player.to_string()));
        }

        self.encode(&dir, &file_name, &frames).await?;

        let bytes = tokio::fs::read(&path).await?;
        tracing::info!("GIF created: {} ({} frames)", path.display(), frames.len());
        Ok(GifExport {
            data_url: gif_data_url(&bytes),
            file_name,
        })
    }

    async fn encode(&self, dir: &Path, file_name: &str, frames: &[String]) -> Result<(), GifError> {
        let run = Command::new(&self.encoder)
            .arg("--fps")
            .arg(self.fps.to_string())
            .arg("-o")
            .arg(file_name)
            .args(frames)
            .current_dir(dir)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| GifError::Timeout(self.timeout))?
            .map_err(|e| GifError::Encoder(format!("{}: {}", self.encoder.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!("GIF encoder exited with {}: {}", output.status, stderr.trim());
            return Err(GifError::Encoder(format!("exit status {}", output.status)));
        }
        Ok(())
    }
}
