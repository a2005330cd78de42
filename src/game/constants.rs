//! Fixed model constants. Gameplay tuning lives in `ServerConfig`; the values
//! here define the physical shape of the simulation and do not vary per match.

/// Network framing constants
pub mod net {
    /// Maximum accepted frame payload size (64 KiB). Larger declared lengths
    /// are a fatal frame error.
    pub const MAX_FRAME_SIZE: usize = 64 * 1024;
    /// Read buffer chunk size for the connection read loop
    pub const READ_CHUNK: usize = 4096;
    /// How long an idle write task parks before re-checking its outbound queue
    pub const OUTBOUND_PARK_MS: u64 = 50;
    /// Heartbeat monitor poll interval
    pub const HEARTBEAT_POLL_MS: u64 = 1000;
}

/// Tank hull and armament geometry
pub mod tank {
    /// Hit points at spawn
    pub const MAX_HP: u16 = 100;
    /// Shells carried at spawn (also the reload ceiling)
    pub const MAX_AMMO: u16 = 5;
    /// Hull collider half-length (drive axis)
    pub const HULL_HALF_LENGTH: f32 = 1.2;
    /// Hull collider half-width
    pub const HULL_HALF_WIDTH: f32 = 0.8;
    /// Turret collider radius (mounted on the hull body)
    pub const TURRET_RADIUS: f32 = 0.5;
    /// Lateral offset of each track from the hull center
    pub const TRACK_OFFSET: f32 = HULL_HALF_WIDTH;
    /// Barrel length from turret center
    pub const BARREL_LENGTH: f32 = 1.4;
    /// Extra clearance beyond the barrel tip when spawning a shell
    pub const MUZZLE_CLEARANCE: f32 = 0.3;
    /// Drive force per track per unit of configured movement speed. Sized so
    /// the damped hull tops out near the configured speed.
    pub const DRIVE_FORCE_SCALE: f32 = 6.0;
    /// Hull linear damping while rolling
    pub const LINEAR_DAMPING: f32 = 3.0;
    /// Hull linear damping while braking
    pub const BRAKE_DAMPING: f32 = 12.0;
    /// Hull angular damping
    pub const ANGULAR_DAMPING: f32 = 4.0;
}

/// Turret motor schedule. The turret tracks a commanded target angle; motor
/// speed is proportional to the angular error with a dead zone and two caps:
/// a fast slew tier for large errors and a precise tier close to the target.
pub mod turret {
    /// Target-angle rate at full stick deflection (rad/s)
    pub const COMMAND_RATE: f32 = 2.5;
    /// Errors below this produce no motor output (rad)
    pub const DEAD_ZONE: f32 = 0.01;
    /// Motor speed per radian of error (rad/s per rad)
    pub const GAIN: f32 = 8.0;
    /// Error above which the fast slew cap applies (rad)
    pub const FAST_ERROR: f32 = 0.35;
    /// Fast slew speed cap (rad/s)
    pub const SLEW_FAST: f32 = 3.5;
    /// Precise aim speed cap (rad/s)
    pub const SLEW_PRECISE: f32 = 1.2;
}

/// Shell geometry
pub mod projectile {
    /// Shell collider radius
    pub const RADIUS: f32 = 0.12;
}

/// Static world geometry
pub mod world {
    /// Boundary wall thickness
    pub const WALL_THICKNESS: f32 = 1.0;
    /// Minimum distance from walls for random spawns
    pub const SPAWN_MARGIN: f32 = 4.0;
    /// Crate collider half-extent
    pub const CRATE_HALF_EXTENT: f32 = 0.7;
    /// Crate collider density
    pub const CRATE_DENSITY: f32 = 0.8;
    /// Ammo box sensor half-extent
    pub const AMMO_BOX_HALF_EXTENT: f32 = 0.5;
}

/// Bot input synthesis
pub mod bot {
    /// Per-tick probability of picking a new wander heading
    pub const WANDER_TURN_PROBABILITY: f64 = 0.02;
    /// Aim errors below this produce no turret command (rad)
    pub const AIM_DEAD_ZONE: f32 = 0.02;
    /// Aim error mapped linearly onto [-1, 1]; full deflection at this error (rad)
    pub const AIM_SCALE: f32 = 0.5;
    /// Hull turn command per radian of heading error
    pub const TURN_GAIN: f32 = 1.0;
}

/// Delta change-detection thresholds
pub mod snapshot {
    /// Tank position change below this is not rebroadcast (world units)
    pub const POSITION_EPSILON: f32 = 0.01;
    /// Tank angle change below this is not rebroadcast (degrees)
    pub const ANGLE_EPSILON_DEG: f32 = 0.1;
    /// Crate position change threshold (world units)
    pub const CRATE_POSITION_EPSILON: f32 = 0.05;
    /// Crate rotation change threshold (degrees)
    pub const CRATE_ANGLE_EPSILON_DEG: f32 = 0.5;
}
