//! Full and delta snapshot generation
//!
//! The builder keeps the per-match baselines: the last values actually
//! broadcast per tank and crate, the set of shells already announced, and the
//! tick of the last full snapshot. Deltas diff against `last_sent_tanks`, not
//! the live state, so a value that creeps below the threshold for several
//! ticks is still sent once the accumulated change crosses it.

use hashbrown::{HashMap, HashSet};

use crate::game::constants::snapshot as thresholds;
use crate::game::state::{MatchContext, MatchTuning};
use crate::net::protocol::{
    AmmoBoxSnapshot, CrateSnapshot, DeltaSnapshot, ProjectileSnapshot, ServerMessage,
    StateSnapshot, TankSnapshot,
};
use crate::util::vec2::rad_to_deg;

pub struct SnapshotBuilder {
    snapshot_interval: u64,
    full_interval: u64,
    last_full_tick: u64,
    last_sent_tanks: HashMap<u32, TankSnapshot>,
    last_sent_crates: HashMap<u32, CrateSnapshot>,
    announced_projectiles: HashSet<u32>,
}

impl SnapshotBuilder {
    pub fn from_tuning(tuning: &MatchTuning) -> Self {
        Self {
            snapshot_interval: tuning.snapshot_interval_ticks,
            full_interval: tuning.full_snapshot_interval_ticks,
            last_full_tick: 0,
            last_sent_tanks: HashMap::new(),
            last_sent_crates: HashMap::new(),
            announced_projectiles: HashSet::new(),
        }
    }

    /// The snapshot message due at the context's current tick, if any. Full
    /// snapshots win when both cadences coincide; deltas are emitted even
    /// when empty so clients observe tick progression.
    pub fn emit(&mut self, ctx: &MatchContext) -> Option<ServerMessage> {
        if ctx.current_tick % self.full_interval == 0 {
            Some(ServerMessage::Snapshot(self.build_full(ctx)))
        } else if ctx.current_tick % self.snapshot_interval == 0 {
            Some(ServerMessage::Delta(self.build_delta(ctx)))
        } else {
            None
        }
    }

    /// Self-contained world state; becomes the new baseline
    pub fn build_full(&mut self, ctx: &MatchContext) -> StateSnapshot {
        let tanks: Vec<TankSnapshot> = ctx
            .tanks
            .values()
            .filter(|t| t.alive())
            .map(tank_snapshot)
            .collect();
        let projectiles: Vec<ProjectileSnapshot> =
            ctx.projectiles.values().map(projectile_snapshot).collect();
        let crates: Vec<CrateSnapshot> = ctx.crates.values().map(crate_snapshot).collect();
        let ammo_boxes: Vec<AmmoBoxSnapshot> = ctx
            .ammo_boxes
            .values()
            .filter(|b| b.active)
            .map(|b| AmmoBoxSnapshot {
                id: b.box_id,
                x: b.position.x,
                y: b.position.y,
            })
            .collect();

        self.last_full_tick = ctx.current_tick;
        self.last_sent_tanks = tanks.iter().map(|t| (t.id, t.clone())).collect();
        self.last_sent_crates = crates.iter().map(|c| (c.id, c.clone())).collect();
        self.announced_projectiles = projectiles.iter().map(|p| p.id).collect();

        StateSnapshot {
            server_tick: ctx.current_tick,
            tanks,
            projectiles,
            ammo_boxes,
            crates,
            map_w: ctx.tuning.map_width,
            map_h: ctx.tuning.map_height,
        }
    }

    /// Changes since the baseline; updates `last_sent` entries for whatever
    /// is included
    pub fn build_delta(&mut self, ctx: &MatchContext) -> DeltaSnapshot {
        let mut tanks = Vec::new();
        for tank in ctx.tanks.values().filter(|t| t.alive()) {
            let current = tank_snapshot(tank);
            let changed = match self.last_sent_tanks.get(&current.id) {
                Some(sent) => tank_changed(sent, &current),
                None => true,
            };
            if changed {
                self.last_sent_tanks.insert(current.id, current.clone());
                tanks.push(current);
            }
        }

        let removed_tanks: Vec<u32> = self
            .last_sent_tanks
            .keys()
            .filter(|id| !ctx.tanks.get(*id).map(|t| t.alive()).unwrap_or(false))
            .copied()
            .collect();
        for id in &removed_tanks {
            self.last_sent_tanks.remove(id);
        }

        // New shells only; flight is client-predicted between deltas
        let mut projectiles = Vec::new();
        for projectile in ctx.projectiles.values() {
            if self.announced_projectiles.insert(projectile.projectile_id) {
                projectiles.push(projectile_snapshot(projectile));
            }
        }
        let removed_projectiles: Vec<u32> = self
            .announced_projectiles
            .iter()
            .filter(|id| !ctx.projectiles.contains_key(*id))
            .copied()
            .collect();
        for id in &removed_projectiles {
            self.announced_projectiles.remove(id);
        }

        let mut crates = Vec::new();
        for crate_state in ctx.crates.values() {
            let current = crate_snapshot(crate_state);
            let changed = match self.last_sent_crates.get(&current.id) {
                Some(sent) => crate_changed(sent, &current),
                None => true,
            };
            if changed {
                self.last_sent_crates.insert(current.id, current.clone());
                crates.push(current);
            }
        }
        let removed_crates: Vec<u32> = self
            .last_sent_crates
            .keys()
            .filter(|id| !ctx.crates.contains_key(*id))
            .copied()
            .collect();
        for id in &removed_crates {
            self.last_sent_crates.remove(id);
        }

        DeltaSnapshot {
            server_tick: ctx.current_tick,
            base_tick: self.last_full_tick,
            tanks,
            projectiles,
            removed_tanks,
            removed_projectiles,
            crates,
            removed_crates,
        }
    }
}

fn tank_snapshot(tank: &crate::game::state::TankState) -> TankSnapshot {
    TankSnapshot {
        id: tank.entity_id,
        x: tank.position.x,
        y: tank.position.y,
        hull_angle_deg: rad_to_deg(tank.hull_angle),
        turret_angle_deg: rad_to_deg(tank.turret_angle),
        hp: tank.hp,
        ammo: tank.ammo,
    }
}

fn projectile_snapshot(projectile: &crate::game::state::ProjectileState) -> ProjectileSnapshot {
    ProjectileSnapshot {
        id: projectile.projectile_id,
        x: projectile.position.x,
        y: projectile.position.y,
        vx: projectile.velocity.x,
        vy: projectile.velocity.y,
    }
}

fn crate_snapshot(crate_state: &crate::game::state::CrateState) -> CrateSnapshot {
    CrateSnapshot {
        id: crate_state.crate_id,
        x: crate_state.position.x,
        y: crate_state.position.y,
        angle_deg: rad_to_deg(crate_state.angle),
    }
}

fn tank_changed(sent: &TankSnapshot, current: &TankSnapshot) -> bool {
    (current.x - sent.x).abs() > thresholds::POSITION_EPSILON
        || (current.y - sent.y).abs() > thresholds::POSITION_EPSILON
        || (current.hull_angle_deg - sent.hull_angle_deg).abs() > thresholds::ANGLE_EPSILON_DEG
        || (current.turret_angle_deg - sent.turret_angle_deg).abs() > thresholds::ANGLE_EPSILON_DEG
        || current.hp != sent.hp
        || current.ammo != sent.ammo
}

fn crate_changed(sent: &CrateSnapshot, current: &CrateSnapshot) -> bool {
    (current.x - sent.x).abs() > thresholds::CRATE_POSITION_EPSILON
        || (current.y - sent.y).abs() > thresholds::CRATE_POSITION_EPSILON
        || (current.angle_deg - sent.angle_deg).abs() > thresholds::CRATE_ANGLE_EPSILON_DEG
}
