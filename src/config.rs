use std::time::Duration;

/// Server configuration, read from the environment (and `.env` if present).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    /// Shared expiry of the lobby, turn data and ban documents.
    pub lobby_ttl: Duration,
    /// Roster capacity when a lobby's settings do not set `maxPlayers`.
    pub max_players: usize,
    pub owner_grace: Duration,
    pub player_grace: Duration,
    pub gif_save_path: String,
    pub gif_encoder_path: String,
    pub gif_timeout: Duration,
    pub gif_fps: u32,
    /// Connections allowed per address per `rate_limit_window`.
    pub rate_limit_points: u32,
    pub rate_limit_window: Duration,
    /// Allowed CORS origins; `["*"]` allows any.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a number, got {value:?}")]
    NotANumber { key: &'static str, value: String },
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            lobby_ttl: Duration::from_secs(21600),
            max_players: 15,
            owner_grace: Duration::from_secs(30),
            player_grace: Duration::from_secs(3),
            gif_save_path: "gifs".to_string(),
            gif_encoder_path: "gifski".to_string(),
            gif_timeout: Duration::from_secs(10),
            gif_fps: 1,
            rate_limit_points: 10,
            rate_limit_window: Duration::from_secs(1),
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from any key lookup; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |key: &'static str, default: Duration| {
            number::<u64>(&lookup, key, default.as_secs()).map(Duration::from_secs)
        };

        Ok(Self {
            port: number(&lookup, "PORT", defaults.port)?,
            lobby_ttl: secs("LOBBY_EXPIRE_TIMEOUT", defaults.lobby_ttl)?,
            max_players: number(&lookup, "MAX_PLAYERS", defaults.max_players)?,
            owner_grace: secs("OWNER_GRACE_SECS", defaults.owner_grace)?,
            player_grace: secs("PLAYER_GRACE_SECS", defaults.player_grace)?,
            gif_save_path: text(&lookup, "GIF_SAVE_PATH", defaults.gif_save_path),
            gif_encoder_path: text(&lookup, "GIFSKI_PATH", defaults.gif_encoder_path),
            gif_timeout: secs("GIF_TIMEOUT_SECS", defaults.gif_timeout)?,
            gif_fps: number(&lookup, "GIF_FPS", defaults.gif_fps)?,
            rate_limit_points: number(&lookup, "MEM_LIMIT_POINTS", defaults.rate_limit_points)?,
            rate_limit_window: secs("MEM_LIMIT_DURATION", defaults.rate_limit_window)?,
            cors_origins: lookup("CORS")
                .map(|raw| parse_origins(&raw))
                .filter(|origins| !origins.is_empty())
                .unwrap_or(defaults.cors_origins),
        })
    }
}

fn text(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: String) -> String {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::NotANumber { key, value }),
        None => Ok(default),
    }
}

/// Splits a comma separated origin list, tolerating surrounding quotes.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_matches('"')
        .split(',')
        .map(|origin| origin.trim().to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}
