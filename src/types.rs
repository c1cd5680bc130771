use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Turn data for a lobby: player name -> chain of turn entries.
pub type LobbyData = Map<String, Value>;

/// Where a lobby sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyStatus {
    #[default]
    Open,
    Started,
    Ended,
}

impl LobbyStatus {
    /// OPEN -> STARTED -> ENDED, nothing else.
    pub fn can_transition(self, to: LobbyStatus) -> bool {
        matches!(
            (self, to),
            (Self::Open, Self::Started) | (Self::Started, Self::Ended)
        )
    }
}

impl std::fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Started => write!(f, "started"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Progress of a player on the current screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    #[default]
    Active,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Connected,
    Disconnected,
}

/// A player on a lobby roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub status: PlayerStatus,
    #[serde(default)]
    pub connected: ConnectionStatus,
}

impl Player {
    pub fn new(name: impl Into<String>, owner: bool) -> Self {
        Self {
            name: name.into(),
            owner,
            status: PlayerStatus::Active,
            connected: ConnectionStatus::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected == ConnectionStatus::Connected
    }

    /// Case-insensitive name comparison used for every roster lookup.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// One game session, stored as `lobby:<code>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    pub code: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub status: LobbyStatus,
    #[serde(default)]
    pub app_screen: String,
    #[serde(default)]
    pub game_screen: u32,
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub players: Vec<Player>,
}

impl Lobby {
    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.is_named(name))
    }

    pub fn player_index(&self, name: &str) -> Option<usize> {
        self.players.iter().position(|p| p.is_named(name))
    }

    pub fn connected_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_connected())
    }

    pub fn is_owner(&self, name: &str) -> bool {
        self.owner
            .as_deref()
            .is_some_and(|owner| owner.to_lowercase() == name.to_lowercase())
    }

    /// True when at least one player is connected and every connected
    /// player has finished the current screen.
    pub fn all_done(&self) -> bool {
        let mut connected = self.connected_players().peekable();
        connected.peek().is_some() && connected.all(|p| p.status == PlayerStatus::Done)
    }

    /// Roster capacity: `settings.maxPlayers` (number or numeric string),
    /// falling back to `default`.
    pub fn max_players(&self, default: usize) -> usize {
        match self.settings.get("maxPlayers") {
            Some(Value::Number(n)) => n.as_u64().map(|n| n as usize).unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// The player whose chain `name` works on during the current screen.
    pub fn target_player(&self, name: &str) -> Option<&Player> {
        let count = self.players.len();
        let index = self.player_index(name)?;
        self.players.get((index + self.game_screen as usize) % count)
    }

    /// Single player games show a prompt and a drawing; otherwise the game
    /// ends once every chain has passed through every player.
    pub fn is_final_screen(&self) -> bool {
        match self.players.len() {
            0 => false,
            1 => self.game_screen == 2,
            n => self.game_screen as usize == n,
        }
    }
}

/// One hand-off in a chain: who submitted it and what they submitted
/// (free text or an image data URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl TurnEntry {
    pub fn is_image(&self) -> bool {
        self.value.starts_with("data:image/")
    }
}

/// Reads the chain stored for `player`, skipping malformed entries.
pub fn turn_entries(data: &LobbyData, player: &str) -> Vec<TurnEntry> {
    match data.get(player) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Inbound frame: `{ "type": "...", "data": { ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Messages sent from server to clients via WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMsg {
    LobbyCreated(Lobby),
    LobbyJoined(Lobby),
    LobbyUpdated(Lobby),
    LobbyDataUpdate(LobbyData),
    KickedFromLobby,
    BannedFromLobby,
    #[serde(rename_all = "camelCase")]
    PlayersDone {
        lobby: Lobby,
        lobby_data: LobbyData,
    },
    NextScreen,
    GameRoundEnded(Lobby),
    #[serde(rename = "GIFCreated", rename_all = "camelCase")]
    GifCreated {
        data_url: String,
        file_name: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "type")]
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        banned: Option<bool>,
    },
}

// ─── Client payloads ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbyReq {
    pub player_name: String,
    #[serde(default)]
    pub app_screen: String,
}

/// Shared by JoinLobby, ReJoinLobby, KickLobby, BanLobby and CreateGIF.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLobbyReq {
    #[serde(default)]
    pub player_name: String,
    #[serde(default)]
    pub lobby_code: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyReq {
    #[serde(default)]
    pub lobby_code: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameReq {
    pub lobby_code: String,
    pub mode: String,
    #[serde(default)]
    pub app_screen: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonePlayerReq {
    pub player_name: String,
    pub lobby_code: String,
    #[serde(default)]
    pub player_data: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextScreenReq {
    pub lobby_code: String,
    #[serde(default)]
    pub lobby_data: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lobby_with(names: &[&str]) -> Lobby {
        Lobby {
            code: "ABC123".into(),
            owner: names.first().map(|n| n.to_string()),
            status: LobbyStatus::Started,
            app_screen: "GAME".into(),
            game_screen: 0,
            round: 1,
            mode: "Standard".into(),
            settings: Map::new(),
            players: names
                .iter()
                .enumerate()
                .map(|(i, n)| Player::new(*n, i == 0))
                .collect(),
        }
    }

    #[test]
    fn lobby_serializes_with_camel_case_fields() {
        let lobby = lobby_with(&["Alice"]);
        let value = serde_json::to_value(&lobby).unwrap();
        assert_eq!(value["appScreen"], "GAME");
        assert_eq!(value["gameScreen"], 0);
        assert_eq!(value["status"], "started");
        assert_eq!(value["players"][0]["connected"], "connected");
        assert_eq!(value["players"][0]["status"], "active");
    }

    #[test]
    fn status_transitions_are_linear() {
        assert!(LobbyStatus::Open.can_transition(LobbyStatus::Started));
        assert!(LobbyStatus::Started.can_transition(LobbyStatus::Ended));
        assert!(!LobbyStatus::Open.can_transition(LobbyStatus::Ended));
        assert!(!LobbyStatus::Ended.can_transition(LobbyStatus::Open));
        assert!(!LobbyStatus::Started.can_transition(LobbyStatus::Open));
    }

    #[test]
    fn target_player_rotates_by_game_screen() {
        let mut lobby = lobby_with(&["Alice", "Bob", "Cara"]);
        assert_eq!(lobby.target_player("alice").unwrap().name, "Alice");
        lobby.game_screen = 1;
        assert_eq!(lobby.target_player("Alice").unwrap().name, "Bob");
        assert_eq!(lobby.target_player("Cara").unwrap().name, "Alice");
        lobby.game_screen = 5;
        assert_eq!(lobby.target_player("Bob").unwrap().name, "Alice");
        assert!(lobby.target_player("Nobody").is_none());
    }

    #[test]
    fn final_screen_depends_on_roster_size() {
        let mut solo = lobby_with(&["Alice"]);
        solo.game_screen = 1;
        assert!(!solo.is_final_screen());
        solo.game_screen = 2;
        assert!(solo.is_final_screen());

        let mut trio = lobby_with(&["Alice", "Bob", "Cara"]);
        trio.game_screen = 2;
        assert!(!trio.is_final_screen());
        trio.game_screen = 3;
        assert!(trio.is_final_screen());
    }

    #[test]
    fn all_done_ignores_disconnected_players() {
        let mut lobby = lobby_with(&["Alice", "Bob"]);
        assert!(!lobby.all_done());
        lobby.players[0].status = PlayerStatus::Done;
        assert!(!lobby.all_done());
        lobby.players[1].connected = ConnectionStatus::Disconnected;
        assert!(lobby.all_done());
        lobby.players[0].connected = ConnectionStatus::Disconnected;
        assert!(!lobby.all_done());
    }

    #[test]
    fn max_players_reads_numbers_and_strings() {
        let mut lobby = lobby_with(&["Alice"]);
        assert_eq!(lobby.max_players(15), 15);
        lobby.settings.insert("maxPlayers".into(), json!(4));
        assert_eq!(lobby.max_players(15), 4);
        lobby.settings.insert("maxPlayers".into(), json!("6"));
        assert_eq!(lobby.max_players(15), 6);
        lobby.settings.insert("maxPlayers".into(), json!("lots"));
        assert_eq!(lobby.max_players(15), 15);
    }

    #[test]
    fn server_messages_use_type_and_data() {
        let msg = ServerMsg::Error {
            kind: "JoinLobby".into(),
            message: "Invalid Lobby XYZ".into(),
            banned: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["type"], "JoinLobby");
        assert!(value["data"].get("banned").is_none());

        let value = serde_json::to_value(ServerMsg::NextScreen).unwrap();
        assert_eq!(value, json!({ "type": "NextScreen" }));

        let value = serde_json::to_value(ServerMsg::GifCreated {
            data_url: "data:image/gif;base64,AA==".into(),
            file_name: "Bob.gif".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "GIFCreated");
        assert_eq!(value["data"]["fileName"], "Bob.gif");
    }

    #[test]
    fn turn_entries_skip_malformed_items() {
        let data: LobbyData = serde_json::from_value(json!({
            "Bob": [{ "name": "Bob", "value": "a cat" }, 7, { "name": "Cara", "value": "data:image/png;base64,AA==" }]
        }))
        .unwrap();
        let chain = turn_entries(&data, "Bob");
        assert_eq!(chain.len(), 2);
        assert!(!chain[0].is_image());
        assert!(chain[1].is_image());
        assert!(turn_entries(&data, "Nobody").is_empty());
    }
}
