use serde::{Deserialize, Serialize};

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Request to authenticate with an opaque token
    AuthRequest { token: String, client_version: String },
    /// Request to join the matchmaking queue
    QueueJoin,
    /// Input intent for the current client tick
    Input(InputCommand),
    /// Liveness ping with the client clock
    Heartbeat { session_id: String, client_time_ms: u64 },
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Authentication outcome; `session_id` is empty on failure
    AuthResponse {
        success: bool,
        session_id: String,
        reason: String,
    },
    /// Periodic lobby status while waiting in the queue
    QueueStatusUpdate {
        /// 1-based position in the queue
        position: u32,
        players_in_queue: u32,
        /// Players still missing for a full match, clamped to 0
        needed_for_match: u32,
        /// Seconds until the next bot-fill threshold, 0 if passed
        lobby_countdown: f32,
        /// Bots that would fill the match at full timeout
        projected_bot_fill: u32,
        /// 0 = queued, 1 = forming (match selected, start pending)
        lobby_state: u8,
    },
    /// Match formed; `my_entity_id` is authoritative for this client
    MatchStart {
        match_id: String,
        tick_rate: u32,
        seed: u32,
        /// Human participants; the bot-filled total is the tank count of the
        /// baseline snapshot
        initial_player_count: u32,
        disable_bot_fire: bool,
        my_entity_id: u32,
    },
    /// Self-contained world state for one tick
    Snapshot(StateSnapshot),
    /// Changes since the last full snapshot baseline
    Delta(DeltaSnapshot),
    /// A shell penetrated a tank
    DamageEvent {
        victim: u32,
        attacker: u32,
        amount: u16,
        remaining_hp: u16,
    },
    /// All tank destructions of one tick, batched
    KillFeedUpdate { events: Vec<KillEvent> },
    /// Terminal message; winner 0 on draw or timeout
    MatchEnd { winner_entity_id: u32, server_tick: u64 },
    /// Response to a heartbeat ping
    HeartbeatResponse {
        client_time_ms: u64,
        server_time_ms: u64,
        delta_ms: i64,
    },
}

/// Player input state for one client tick
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputCommand {
    pub session_id: String,
    /// Client tick counter; stale commands are dropped
    pub client_tick: u32,
    /// Forward drive in [-1, 1]
    pub move_dir: f32,
    /// Hull turn in [-1, 1]
    pub turn_dir: f32,
    /// Turret rotation command in [-1, 1]
    pub turret_turn: f32,
    pub fire: bool,
    pub brake: bool,
}

/// One tank destruction for the kill feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillEvent {
    pub victim: u32,
    /// 0 when the destruction had no attacker (disconnect, timeout)
    pub attacker: u32,
    pub server_tick: u64,
}

/// Tank state on the wire. Angles are degrees; the simulation keeps radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankSnapshot {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub hull_angle_deg: f32,
    pub turret_angle_deg: f32,
    pub hp: u16,
    pub ammo: u16,
}

/// Shell state on the wire; motion is client-predicted between deltas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrateSnapshot {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub angle_deg: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmmoBoxSnapshot {
    pub id: u32,
    pub x: f32,
    pub y: f32,
}

/// Full world state for one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub server_tick: u64,
    pub tanks: Vec<TankSnapshot>,
    pub projectiles: Vec<ProjectileSnapshot>,
    /// Active ammo boxes only; pickup is inferred by absence here
    pub ammo_boxes: Vec<AmmoBoxSnapshot>,
    pub crates: Vec<CrateSnapshot>,
    pub map_w: f32,
    pub map_h: f32,
}

/// Changes since `base_tick` (the last full snapshot)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaSnapshot {
    pub server_tick: u64,
    pub base_tick: u64,
    /// Tanks that changed beyond the rebroadcast thresholds
    pub tanks: Vec<TankSnapshot>,
    /// Newly spawned shells only
    pub projectiles: Vec<ProjectileSnapshot>,
    pub removed_tanks: Vec<u32>,
    pub removed_projectiles: Vec<u32>,
    pub crates: Vec<CrateSnapshot>,
    pub removed_crates: Vec<u32>,
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers (stable wire layout for clients)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
