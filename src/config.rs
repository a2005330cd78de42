use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

/// Authentication backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Accept any token, mint a fresh session id
    Disabled,
    /// Accept any non-empty token; session id derived from a token digest
    Stub,
    /// External OAuth provider (must be wired in by the embedder)
    Oauth,
}

/// Server configuration, loaded from a YAML file. Every field has a default;
/// unknown keys in the file are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Matchmaking
    pub max_players_per_match: usize,
    pub max_parallel_matches: usize,
    pub queue_soft_limit: usize,
    pub fill_timeout_seconds: f32,
    pub matchmaker_poll_ms: u64,

    // Simulation
    pub tick_rate: u32,
    pub snapshot_interval_ticks: u64,
    pub full_snapshot_interval_ticks: u64,
    pub movement_speed: f32,
    pub projectile_speed: f32,
    pub projectile_damage: u16,
    pub projectile_density: f32,
    pub projectile_max_lifetime_sec: f32,
    pub fire_cooldown_sec: f32,
    pub reload_interval_sec: f32,
    pub hull_density: f32,
    pub turret_density: f32,
    /// Fraction of a shell's initial speed it must retain into the contact
    /// normal for the hit to penetrate
    pub penetration_factor: f32,
    pub map_width: f32,
    pub map_height: f32,
    pub max_match_seconds: f32,
    pub crate_count: usize,
    pub ammo_box_count: usize,
    pub ammo_box_respawn_sec: f32,
    /// Fixed RNG seed for reproducible matches; random per match when unset
    pub fixed_seed: Option<u32>,
    /// Spawn tanks on a line instead of seeded-random positions
    pub force_line_spawn: bool,

    // Bots
    pub bot_fire_interval_ticks: u64,
    pub disable_bot_fire: bool,
    pub disable_bot_ai: bool,

    // Networking
    pub listen_address: IpAddr,
    pub listen_port: u16,
    pub heartbeat_timeout_seconds: f32,

    // Auth
    pub auth_mode: AuthMode,
    pub auth_stub_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_players_per_match: 4,
            max_parallel_matches: 32,
            queue_soft_limit: 256,
            fill_timeout_seconds: 15.0,
            matchmaker_poll_ms: 250,
            tick_rate: 30,
            snapshot_interval_ticks: 5,
            full_snapshot_interval_ticks: 30,
            movement_speed: 6.0,
            projectile_speed: 25.0,
            projectile_damage: 34,
            projectile_density: 2.0,
            projectile_max_lifetime_sec: 4.0,
            fire_cooldown_sec: 0.8,
            reload_interval_sec: 3.0,
            hull_density: 1.0,
            turret_density: 0.5,
            penetration_factor: 0.60,
            map_width: 96.0,
            map_height: 64.0,
            max_match_seconds: 600.0,
            crate_count: 8,
            ammo_box_count: 4,
            ammo_box_respawn_sec: 12.0,
            fixed_seed: None,
            force_line_spawn: false,
            bot_fire_interval_ticks: 45,
            disable_bot_fire: false,
            disable_bot_ai: false,
            listen_address: IpAddr::from([0, 0, 0, 0]),
            listen_port: 4433,
            heartbeat_timeout_seconds: 10.0,
            auth_mode: AuthMode::Stub,
            auth_stub_prefix: "tk".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_players_per_match == 0 {
            return Err(ConfigError::Invalid("max_players_per_match must be >= 1"));
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be >= 1"));
        }
        if self.snapshot_interval_ticks == 0 || self.full_snapshot_interval_ticks == 0 {
            return Err(ConfigError::Invalid("snapshot intervals must be >= 1"));
        }
        if self.fill_timeout_seconds <= 0.0 {
            return Err(ConfigError::Invalid("fill_timeout_seconds must be > 0"));
        }
        if self.heartbeat_timeout_seconds <= 0.0 {
            return Err(ConfigError::Invalid("heartbeat_timeout_seconds must be > 0"));
        }
        if self.matchmaker_poll_ms == 0 {
            return Err(ConfigError::Invalid("matchmaker_poll_ms must be >= 1"));
        }
        if self.map_width <= 0.0 || self.map_height <= 0.0 {
            return Err(ConfigError::Invalid("map dimensions must be > 0"));
        }
        if self.movement_speed <= 0.0 || self.projectile_speed <= 0.0 {
            return Err(ConfigError::Invalid("speeds must be > 0"));
        }
        if !(self.penetration_factor > 0.0 && self.penetration_factor <= 1.0) {
            return Err(ConfigError::Invalid("penetration_factor must be in (0, 1]"));
        }
        if self.auth_mode == AuthMode::Oauth {
            // The OAuth provider is an external collaborator; the stock binary
            // cannot satisfy this mode.
            return Err(ConfigError::Invalid(
                "auth_mode 'oauth' requires an externally wired provider",
            ));
        }
        Ok(())
    }

    pub fn tick_duration_secs(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    pub fn max_match_ticks(&self) -> u64 {
        (self.max_match_seconds * self.tick_rate as f32).ceil() as u64
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Read(String, #[source] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}
