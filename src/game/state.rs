//! Match state definitions
//!
//! A match owns its tank records keyed by entity id; sessions hold only the
//! numeric id plus a weak `MatchTag`, so dropping a finished match dissolves
//! every association without an unlinking pass.

use std::sync::Arc;

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rapier2d::prelude::{ColliderHandle, RigidBodyHandle};
use smallvec::SmallVec;

use crate::config::ServerConfig;
use crate::game::constants::tank;
use crate::game::world::PhysicsWorld;
use crate::net::protocol::KillEvent;
use crate::net::registry::Session;
use crate::util::vec2::Vec2;

/// Non-owning handle to a running match; sessions hold `Weak` references to it
#[derive(Debug)]
pub struct MatchTag {
    pub match_id: String,
}

/// Gameplay tuning captured from config at match start; a config reload never
/// changes a match already in flight.
#[derive(Debug, Clone)]
pub struct MatchTuning {
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
    pub penetration_factor: f32,
    pub map_width: f32,
    pub map_height: f32,
    pub bot_fire_interval_ticks: u64,
    pub disable_bot_fire: bool,
    pub disable_bot_ai: bool,
    pub ammo_box_respawn_sec: f32,
    pub max_match_ticks: u64,
}

impl MatchTuning {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            snapshot_interval_ticks: config.snapshot_interval_ticks,
            full_snapshot_interval_ticks: config.full_snapshot_interval_ticks,
            movement_speed: config.movement_speed,
            projectile_speed: config.projectile_speed,
            projectile_damage: config.projectile_damage,
            projectile_density: config.projectile_density,
            projectile_max_lifetime_sec: config.projectile_max_lifetime_sec,
            fire_cooldown_sec: config.fire_cooldown_sec,
            reload_interval_sec: config.reload_interval_sec,
            hull_density: config.hull_density,
            turret_density: config.turret_density,
            penetration_factor: config.penetration_factor,
            map_width: config.map_width,
            map_height: config.map_height,
            bot_fire_interval_ticks: config.bot_fire_interval_ticks,
            disable_bot_fire: config.disable_bot_fire,
            disable_bot_ai: config.disable_bot_ai,
            ammo_box_respawn_sec: config.ammo_box_respawn_sec,
            max_match_ticks: config.max_match_ticks(),
        }
    }
}

/// One tank in a match
#[derive(Debug)]
pub struct TankState {
    pub entity_id: u32,
    pub owner_session_id: String,
    pub is_bot: bool,
    pub position: Vec2,
    /// Hull orientation, radians (degrees on the wire)
    pub hull_angle: f32,
    /// Turret orientation, radians, world-absolute
    pub turret_angle: f32,
    /// Angle the turret motor is driving toward
    pub turret_target_angle: f32,
    pub hp: u16,
    pub ammo: u16,
    /// Counts down to the next ammo replenish
    pub reload_timer: f32,
    /// Counts down to the next permitted shot
    pub fire_cooldown_timer: f32,
    pub destroyed: bool,
    pub body: RigidBodyHandle,
    /// Wander heading, bot-controlled tanks only
    pub bot_heading: f32,
}

impl TankState {
    pub fn new(
        entity_id: u32,
        owner_session_id: String,
        is_bot: bool,
        position: Vec2,
        angle: f32,
        body: RigidBodyHandle,
    ) -> Self {
        Self {
            entity_id,
            owner_session_id,
            is_bot,
            position,
            hull_angle: angle,
            turret_angle: angle,
            turret_target_angle: angle,
            hp: tank::MAX_HP,
            ammo: tank::MAX_AMMO,
            reload_timer: 0.0,
            fire_cooldown_timer: 0.0,
            destroyed: false,
            body,
            bot_heading: angle,
        }
    }

    pub fn alive(&self) -> bool {
        !self.destroyed
    }
}

/// One shell in flight
#[derive(Debug)]
pub struct ProjectileState {
    pub projectile_id: u32,
    /// Entity that fired the shell; may be destroyed while the shell flies
    pub owner_entity_id: u32,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Velocity captured before the physics step; the post-impulse value is
    /// useless for penetration because the solver has already deflected it
    pub pre_step_velocity: Vec2,
    pub spawn_tick: u64,
    pub initial_speed: f32,
    pub body: RigidBodyHandle,
}

#[derive(Debug)]
pub struct CrateState {
    pub crate_id: u32,
    pub position: Vec2,
    pub angle: f32,
    pub body: RigidBodyHandle,
}

#[derive(Debug)]
pub struct AmmoBoxState {
    pub box_id: u32,
    pub position: Vec2,
    pub active: bool,
    /// Counts down while inactive; the box reactivates at zero
    pub respawn_timer: f32,
    pub collider: ColliderHandle,
}

/// Damage applied this tick, pending broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRecord {
    pub victim: u32,
    pub attacker: u32,
    pub amount: u16,
    pub remaining_hp: u16,
}

/// Everything one match owns. Lives inside its match task; only snapshots and
/// events leave through session outbound queues.
pub struct MatchContext {
    pub match_id: String,
    pub seed: u32,
    pub tick_rate: u32,
    pub current_tick: u64,
    pub players: Vec<Arc<Session>>,
    pub tanks: HashMap<u32, TankState>,
    pub projectiles: HashMap<u32, ProjectileState>,
    pub crates: HashMap<u32, CrateState>,
    pub ammo_boxes: HashMap<u32, AmmoBoxState>,
    pub world: PhysicsWorld,
    pub tuning: MatchTuning,
    pub rng: StdRng,
    pub tag: Arc<MatchTag>,
    pub match_ended: bool,
    pub end_dispatched: bool,
    pub winner_entity_id: u32,
    /// Damage applied this tick, drained at snapshot emission
    pub damage_events: Vec<DamageRecord>,
    /// Destructions this tick, batched into one kill feed message
    pub kill_feed: SmallVec<[KillEvent; 4]>,
    next_entity_id: u32,
    next_projectile_id: u32,
}

impl MatchContext {
    pub fn new(match_id: String, seed: u32, tick_rate: u32, tuning: MatchTuning) -> Self {
        let mut world = PhysicsWorld::new(1.0 / tick_rate as f32);
        world.spawn_walls(tuning.map_width, tuning.map_height);
        Self {
            tag: Arc::new(MatchTag {
                match_id: match_id.clone(),
            }),
            match_id,
            seed,
            tick_rate,
            current_tick: 0,
            players: Vec::new(),
            tanks: HashMap::new(),
            projectiles: HashMap::new(),
            crates: HashMap::new(),
            ammo_boxes: HashMap::new(),
            world,
            tuning,
            rng: StdRng::seed_from_u64(seed as u64),
            match_ended: false,
            end_dispatched: false,
            winner_entity_id: 0,
            damage_events: Vec::new(),
            kill_feed: SmallVec::new(),
            next_entity_id: 0,
            next_projectile_id: 0,
        }
    }

    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Fresh entity id; ids start at 1 (0 means "no entity") and are never
    /// reused within a match
    pub fn alloc_entity_id(&mut self) -> u32 {
        self.next_entity_id += 1;
        self.next_entity_id
    }

    /// Fresh projectile id, same guarantees as entity ids
    pub fn alloc_projectile_id(&mut self) -> u32 {
        self.next_projectile_id += 1;
        self.next_projectile_id
    }

    pub fn alive_tank_count(&self) -> usize {
        self.tanks.values().filter(|t| t.alive()).count()
    }

    /// Sole surviving tank, if exactly one remains
    pub fn sole_survivor(&self) -> Option<u32> {
        let mut alive = self.tanks.values().filter(|t| t.alive());
        match (alive.next(), alive.next()) {
            (Some(tank), None) => Some(tank.entity_id),
            _ => None,
        }
    }
}
