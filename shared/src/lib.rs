use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_MAX_GAUGE: u32 = 100;
pub const MIN_MAX_GAUGE: u32 = 10;
pub const LATENCY_WINDOW_MS: u64 = 1000;
pub const BROADCAST_INTERVAL_MS: u64 = 33;
pub const BOT_TICK_MS: u64 = 500;
pub const BOT_CLICK_PROBABILITY: f64 = 0.7;
pub const DEFAULT_PORT: u16 = 7777;

/// Milliseconds since the UNIX epoch, the timestamp unit used on the wire.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

impl Team {
    pub fn other(&self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::A => write!(f, "A"),
            Team::B => write!(f, "B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lobby,
    Playing,
    Victory,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Lobby => write!(f, "lobby"),
            Phase::Playing => write!(f, "playing"),
            Phase::Victory => write!(f, "victory"),
        }
    }
}

/// Roster entry as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub team: Team,
    pub score: u32,
    pub is_bot: bool,
}

/// Match-wide click accounting. Every counted click lands in exactly one of
/// the two outcome buckets, so `total == validated + rejected` at all times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickStats {
    pub total: u64,
    pub validated: u64,
    pub rejected: u64,
}

impl ClickStats {
    pub fn is_consistent(&self) -> bool {
        self.total == self.validated + self.rejected
    }
}

/// Commands clients send to the server.
///
/// The wire format is JSON with a snake_case `type` tag and camelCase payload
/// fields, e.g. `{"type":"player_join","playerId":"p1","name":"Alice"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    PlayerJoin { player_id: String, name: String },
    #[serde(rename_all = "camelCase")]
    Click { player_id: String },
    StartGame,
    ResetGame,
    AddBot {
        name: Option<String>,
        team: Option<Team>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveBot { bot_id: String },
    #[serde(rename_all = "camelCase")]
    UpdateConfig { max_gauge: u32 },
}

/// Events the server broadcasts to clients, tagged the same way as commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full snapshot of gauges, roster, and phase. Rate-limited under load.
    #[serde(rename_all = "camelCase")]
    StateUpdate {
        team_a_gauge: u32,
        team_b_gauge: u32,
        max_gauge: u32,
        players: Vec<PlayerInfo>,
        phase: Phase,
        timestamp: u64,
    },
    /// Roster and config changes outside the click hot path. Never throttled.
    #[serde(rename_all = "camelCase")]
    LobbyUpdate {
        players: Vec<PlayerInfo>,
        phase: Phase,
        max_gauge: u32,
        timestamp: u64,
    },
    /// Sent exactly once per match, the moment a gauge fills.
    #[serde(rename_all = "camelCase")]
    Victory {
        winner: Team,
        final_scores: Vec<PlayerInfo>,
        click_stats: ClickStats,
        latency_window_ms: u64,
        timestamp: u64,
    },
    /// Informational notice that a disconnect removed a player.
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        player_id: String,
        player_name: String,
        timestamp: u64,
    },
}
