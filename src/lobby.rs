//! Lobby repository.
//!
//! Sole reader and writer of the three per-lobby documents (`lobby:<code>`,
//! `lobby:<code>:data`, `lobby:<code>:bans`). Every mutation is a
//! read-modify-write against the store, serialized per lobby code by an
//! async mutex so concurrent handlers cannot lose each other's updates.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::merge::merge_deep;
use crate::store::{bans_key, data_key, lobby_key, DocumentStore, StoreError};
use crate::types::*;

const CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
pub const CODE_LEN: usize = 6;
pub const MAX_NAME_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("Invalid Lobby {0}")]
    NotFound(String),
    #[error("Lobby {0} has ended.")]
    Ended(String),
    #[error("Lobby {0} has started. No new players allowed")]
    Started(String),
    #[error("Lobby {0} has not started")]
    NotStarted(String),
    #[error("Lobby {0} is full.")]
    Full(String),
    #[error("Player {name} already exists in lobby {code}")]
    DuplicateName { name: String, code: String },
    #[error("Player {name} is not in lobby {code}")]
    PlayerNotFound { name: String, code: String },
    #[error("Invalid player name")]
    InvalidName,
    #[error("No player available to become owner of lobby {0}")]
    NoEligibleOwner(String),
    #[error("Lobby {code} cannot go from {from} to {to}")]
    InvalidTransition {
        code: String,
        from: LobbyStatus,
        to: LobbyStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn create_lobby_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Strips everything but ASCII alphanumerics, space, `-` and `_` from a
/// submitted player name. The result is safe as a roster key and as a
/// file name component.
pub fn sanitize_name(raw: &str) -> Result<String, LobbyError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let name: String = cleaned.trim().chars().take(MAX_NAME_LEN).collect();
    let name = name.trim_end();
    if name.is_empty() {
        return Err(LobbyError::InvalidName);
    }
    Ok(name.to_string())
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })
}

fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })
}

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Held for the duration of one lobby mutation. On release the per-code
/// mutex is dropped from the map unless another task still holds or awaits
/// it, so the map only tracks codes with work in flight.
struct CodeLock<'a> {
    locks: &'a LockMap,
    code: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CodeLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.code, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct Lobbies {
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
    default_max_players: usize,
    locks: LockMap,
}

impl Lobbies {
    pub fn new(store: Arc<dyn DocumentStore>, ttl: Duration, default_max_players: usize) -> Self {
        Self {
            store,
            ttl,
            default_max_players,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    async fn lock(&self, code: &str) -> CodeLock<'_> {
        let lock = Arc::clone(&self.locks.entry(code.to_string()).or_default());
        let guard = lock.lock_owned().await;
        CodeLock {
            locks: &self.locks,
            code: code.to_string(),
            guard: Some(guard),
        }
    }

    /// Writes a document, giving it the lobby expiry if it did not exist.
    async fn put(&self, key: &str, value: Value, fresh: bool) -> Result<(), StoreError> {
        self.store.set(key, value).await?;
        if fresh {
            self.store.expire(key, self.ttl).await?;
        }
        Ok(())
    }

    async fn save(&self, lobby: &Lobby) -> Result<(), LobbyError> {
        let key = lobby_key(&lobby.code);
        let value = encode(&key, lobby)?;
        self.store.set(&key, value).await?;
        Ok(())
    }

    async fn require(&self, code: &str) -> Result<Lobby, LobbyError> {
        self.get(code)
            .await?
            .ok_or_else(|| LobbyError::NotFound(code.to_string()))
    }

    pub async fn get(&self, code: &str) -> Result<Option<Lobby>, LobbyError> {
        let key = lobby_key(code);
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(decode(&key, value)?)),
            None => Ok(None),
        }
    }

    /// Creates a lobby owned by `owner`, along with its empty turn data and
    /// ban list. All three documents share one expiry.
    pub async fn create(&self, owner: &str, app_screen: &str) -> Result<Lobby, LobbyError> {
        let mut code = create_lobby_code();
        while self.store.get(&lobby_key(&code)).await?.is_some() {
            code = create_lobby_code();
        }

        let lobby = Lobby {
            code: code.clone(),
            owner: Some(owner.to_string()),
            status: LobbyStatus::Open,
            app_screen: app_screen.to_string(),
            game_screen: 0,
            round: 1,
            mode: String::new(),
            settings: Map::new(),
            players: vec![Player::new(owner, true)],
        };

        let key = lobby_key(&code);
        self.put(&key, encode(&key, &lobby)?, true).await?;
        self.put(&data_key(&code), Value::Object(Map::new()), true).await?;
        self.put(&bans_key(&code), Value::Array(Vec::new()), true).await?;

        tracing::info!("Lobby created: {} owner: {}", code, owner);
        Ok(lobby)
    }

    /// Adds a player, or marks a returning player connected again.
    pub async fn join(&self, name: &str, code: &str) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby join: {} {}", name, code);
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;

        match lobby.player_index(name) {
            Some(index) => {
                let player = &mut lobby.players[index];
                if player.is_connected() {
                    return Err(LobbyError::DuplicateName {
                        name: name.to_string(),
                        code: code.to_string(),
                    });
                }
                player.connected = ConnectionStatus::Connected;
            }
            None => {
                match lobby.status {
                    LobbyStatus::Ended => return Err(LobbyError::Ended(code.to_string())),
                    LobbyStatus::Started => return Err(LobbyError::Started(code.to_string())),
                    LobbyStatus::Open => {}
                }
                if lobby.players.len() >= lobby.max_players(self.default_max_players) {
                    return Err(LobbyError::Full(code.to_string()));
                }
                lobby.players.push(Player::new(name, false));
            }
        }

        self.save(&lobby).await?;
        Ok(lobby)
    }

    /// Reconnects a disconnected member. Unlike `join` this never adds
    /// anyone and works in any lobby status. A member who is still connected
    /// cannot be taken over.
    pub async fn rejoin(&self, name: &str, code: &str) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby rejoin: {} {}", name, code);
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;

        let player = lobby
            .players
            .iter_mut()
            .find(|p| p.is_named(name))
            .ok_or_else(|| LobbyError::PlayerNotFound {
                name: name.to_string(),
                code: code.to_string(),
            })?;
        if player.is_connected() {
            return Err(LobbyError::DuplicateName {
                name: name.to_string(),
                code: code.to_string(),
            });
        }
        player.connected = ConnectionStatus::Connected;

        self.save(&lobby).await?;
        Ok(lobby)
    }

    pub async fn leave(&self, name: &str, code: &str) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby leave: {} {}", name, code);
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;

        lobby.players.retain(|p| !p.is_named(name));
        if lobby.is_owner(name) {
            lobby.owner = None;
        }

        self.save(&lobby).await?;
        Ok(lobby)
    }

    pub async fn start(
        &self,
        code: &str,
        mode: &str,
        app_screen: &str,
        settings: Map<String, Value>,
    ) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby start: {} {}", code, mode);
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;

        if !lobby.status.can_transition(LobbyStatus::Started) {
            return Err(LobbyError::InvalidTransition {
                code: code.to_string(),
                from: lobby.status,
                to: LobbyStatus::Started,
            });
        }

        lobby.status = LobbyStatus::Started;
        lobby.mode = mode.to_string();
        lobby.app_screen = app_screen.to_string();
        lobby.game_screen = 0;
        lobby.round = 1;
        lobby.settings = settings;

        self.save(&lobby).await?;
        Ok(lobby)
    }

    /// Marks one player done with the current screen.
    pub async fn done(&self, name: &str, code: &str) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby done: {} {}", name, code);
        self.update_player(code, name, |player| player.status = PlayerStatus::Done)
            .await
    }

    /// Advances the screen counter and puts every connected player back to
    /// active. Disconnected players keep their status.
    pub async fn next_screen(&self, code: &str) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby next screen: {}", code);
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;

        if lobby.status != LobbyStatus::Started {
            return Err(LobbyError::NotStarted(code.to_string()));
        }

        for player in lobby.players.iter_mut().filter(|p| p.is_connected()) {
            player.status = PlayerStatus::Active;
        }
        lobby.game_screen += 1;

        self.save(&lobby).await?;
        Ok(lobby)
    }

    pub async fn next_round(&self, code: &str) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby next round: {}", code);
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;
        lobby.round += 1;
        self.save(&lobby).await?;
        Ok(lobby)
    }

    /// Ends the game. Ending an already ended lobby is a no-op.
    pub async fn end_game(&self, code: &str) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby end game: {}", code);
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;

        if lobby.status == LobbyStatus::Ended {
            return Ok(lobby);
        }
        if !lobby.status.can_transition(LobbyStatus::Ended) {
            return Err(LobbyError::InvalidTransition {
                code: code.to_string(),
                from: lobby.status,
                to: LobbyStatus::Ended,
            });
        }

        lobby.status = LobbyStatus::Ended;
        self.save(&lobby).await?;
        Ok(lobby)
    }

    /// Hands ownership to `name`, or to the first connected player when
    /// `name` is `None`. The new owner keeps its roster position.
    pub async fn set_owner(&self, name: Option<&str>, code: &str) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby set owner: {:?} {}", name, code);
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;

        let index = match name {
            None => lobby
                .players
                .iter()
                .position(|p| p.is_connected())
                .ok_or_else(|| LobbyError::NoEligibleOwner(code.to_string()))?,
            Some(name) => lobby
                .player_index(name)
                .ok_or_else(|| LobbyError::PlayerNotFound {
                    name: name.to_string(),
                    code: code.to_string(),
                })?,
        };

        for (i, player) in lobby.players.iter_mut().enumerate() {
            player.owner = i == index;
        }
        lobby.owner = Some(lobby.players[index].name.clone());

        self.save(&lobby).await?;
        Ok(lobby)
    }

    pub async fn get_owner(&self, code: &str) -> Result<Option<String>, LobbyError> {
        Ok(self.require(code).await?.owner)
    }

    pub async fn get_players(&self, code: &str) -> Result<Vec<Player>, LobbyError> {
        Ok(self.require(code).await?.players)
    }

    pub async fn get_player(&self, name: &str, code: &str) -> Result<Option<Player>, LobbyError> {
        Ok(self.require(code).await?.player(name).cloned())
    }

    async fn update_player(
        &self,
        code: &str,
        name: &str,
        update: impl FnOnce(&mut Player),
    ) -> Result<Lobby, LobbyError> {
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;

        let player = lobby
            .players
            .iter_mut()
            .find(|p| p.is_named(name))
            .ok_or_else(|| LobbyError::PlayerNotFound {
                name: name.to_string(),
                code: code.to_string(),
            })?;
        update(player);

        self.save(&lobby).await?;
        Ok(lobby)
    }

    /// Replaces the roster entry named `name` with `player`.
    pub async fn set_player(&self, code: &str, name: &str, player: Player) -> Result<Lobby, LobbyError> {
        self.update_player(code, name, |existing| *existing = player).await
    }

    pub async fn set_players(&self, code: &str, players: Vec<Player>) -> Result<Lobby, LobbyError> {
        let _guard = self.lock(code).await;
        let mut lobby = self.require(code).await?;
        lobby.players = players;
        self.save(&lobby).await?;
        Ok(lobby)
    }

    /// Flips a player's connection flag without touching anything else.
    pub async fn mark_connection(
        &self,
        name: &str,
        code: &str,
        connected: ConnectionStatus,
    ) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby connection: {} {} {:?}", name, code, connected);
        self.update_player(code, name, |player| player.connected = connected)
            .await
    }

    pub async fn get_lobby_data(&self, code: &str) -> Result<Option<LobbyData>, LobbyError> {
        let key = data_key(code);
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(decode(&key, value)?)),
            None => Ok(None),
        }
    }

    /// Deep-merges `partial` into the lobby's turn data.
    pub async fn set_lobby_data(&self, code: &str, partial: LobbyData) -> Result<(), LobbyError> {
        let _guard = self.lock(code).await;
        self.require(code).await?;

        let key = data_key(code);
        let existing = self.store.get(&key).await?;
        let fresh = existing.is_none();
        let mut data = existing.unwrap_or_else(|| Value::Object(Map::new()));
        merge_deep(&mut data, Value::Object(partial));

        self.put(&key, data, fresh).await?;
        Ok(())
    }

    /// Addresses banned from the lobby. A lobby without a ban list has no bans.
    pub async fn get_bans(&self, code: &str) -> Result<Vec<String>, LobbyError> {
        let key = bans_key(code);
        match self.store.get(&key).await? {
            Some(value) => Ok(decode(&key, value)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn ban_player(&self, code: &str, address: &str) -> Result<Lobby, LobbyError> {
        tracing::info!("Lobby ban: {} {}", code, address);
        let _guard = self.lock(code).await;
        let lobby = self.require(code).await?;

        let key = bans_key(code);
        let existing = self.store.get(&key).await?;
        let fresh = existing.is_none();
        let mut bans: Vec<String> = match existing {
            Some(value) => decode(&key, value)?,
            None => Vec::new(),
        };
        if !bans.iter().any(|banned| banned == address) {
            bans.push(address.to_string());
        }

        self.put(&key, encode(&key, &bans)?, fresh).await?;
        Ok(lobby)
    }

    /// Deletes every document belonging to the lobby.
    pub async fn destroy(&self, code: &str) -> Result<bool, LobbyError> {
        tracing::info!("Lobby destroy: {}", code);
        let _guard = self.lock(code).await;
        let removed = self.store.delete(&lobby_key(code)).await?;
        self.store.delete(&data_key(code)).await?;
        self.store.delete(&bans_key(code)).await?;
        Ok(removed)
    }
}
