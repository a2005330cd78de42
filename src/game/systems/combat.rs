//! Combat resolution: shell contacts, the penetration rule, ammunition and
//! the per-tick kill feed.
//!
//! Penetration is judged against the velocity captured *before* the physics
//! step. The solver has already applied the collision impulse by the time
//! contacts are reported, so the post-step velocity points away from the
//! armor and would reject every legitimate hit.

use hashbrown::HashMap;
use rapier2d::prelude::{ColliderHandle, CollisionEvent};
use tracing::{debug, error};

use crate::game::state::{DamageRecord, MatchContext, ProjectileState};
use crate::game::world::BodyTag;
use crate::game::constants::tank;
use crate::net::protocol::KillEvent;
use crate::net::registry::InputState;
use crate::util::vec2::Vec2;

/// Record every live shell's velocity ahead of the physics step
pub fn capture_pre_step_velocities(ctx: &mut MatchContext) {
    for projectile in ctx.projectiles.values_mut() {
        if let Some(v) = ctx.world.body_velocity(projectile.body) {
            projectile.pre_step_velocity = v;
        }
    }
}

/// Process the collision events of one physics step
pub fn process_contacts(ctx: &mut MatchContext, events: Vec<CollisionEvent>) {
    for event in events {
        let CollisionEvent::Started(a, b, _) = event else {
            continue;
        };
        let (Some(tag_a), Some(tag_b)) = (ctx.world.tag_of(a), ctx.world.tag_of(b)) else {
            continue;
        };
        match (tag_a, tag_b) {
            (BodyTag::Projectile(pid), BodyTag::Tank(eid)) => {
                resolve_shell_hit(ctx, pid, eid, a, b);
            }
            (BodyTag::Tank(eid), BodyTag::Projectile(pid)) => {
                resolve_shell_hit(ctx, pid, eid, b, a);
            }
            (BodyTag::Tank(eid), BodyTag::AmmoBox(bid))
            | (BodyTag::AmmoBox(bid), BodyTag::Tank(eid)) => {
                resolve_ammo_pickup(ctx, eid, bid);
            }
            _ => {}
        }
    }
}

/// Apply the penetration rule to a shell-on-tank contact
fn resolve_shell_hit(
    ctx: &mut MatchContext,
    projectile_id: u32,
    victim_id: u32,
    shell_collider: ColliderHandle,
    tank_collider: ColliderHandle,
) {
    // The shell may already be consumed by an earlier contact this tick
    let Some(projectile) = ctx.projectiles.get(&projectile_id) else {
        return;
    };
    let Some(victim) = ctx.tanks.get(&victim_id) else {
        error!(
            "contact references missing tank {} in match {}",
            victim_id, ctx.match_id
        );
        return;
    };
    if victim.destroyed {
        return;
    }
    if projectile.owner_entity_id == victim_id {
        // A shell never hurts the tank that fired it
        return;
    }

    let toward_victim = victim.position - projectile.position;
    let normal = ctx
        .world
        .contact_normal(shell_collider, tank_collider)
        .unwrap_or_else(|| toward_victim.normalize());
    // Orient so positive means "moving into the target"
    let normal = if normal.dot(toward_victim) < 0.0 {
        -normal
    } else {
        normal
    };

    let into_speed = projectile.pre_step_velocity.dot(normal);
    let required = ctx.tuning.penetration_factor * projectile.initial_speed;
    let attacker = projectile.owner_entity_id;

    destroy_projectile(ctx, projectile_id);

    if into_speed < required {
        // Absorbed by the armor; no damage, no ricochet
        debug!(
            "shell {} absorbed by tank {} ({:.1} < {:.1})",
            projectile_id, victim_id, into_speed, required
        );
        return;
    }

    let amount = ctx.tuning.projectile_damage;
    let Some(victim) = ctx.tanks.get_mut(&victim_id) else {
        return;
    };
    victim.hp = victim.hp.saturating_sub(amount);
    let remaining_hp = victim.hp;
    ctx.damage_events.push(DamageRecord {
        victim: victim_id,
        attacker,
        amount,
        remaining_hp,
    });
    if remaining_hp == 0 {
        destroy_tank(ctx, victim_id, attacker);
    }
}

fn resolve_ammo_pickup(ctx: &mut MatchContext, entity_id: u32, box_id: u32) {
    let Some(ammo_box) = ctx.ammo_boxes.get_mut(&box_id) else {
        error!(
            "contact references missing ammo box {} in match {}",
            box_id, ctx.match_id
        );
        return;
    };
    if !ammo_box.active {
        return;
    }
    let Some(tank) = ctx.tanks.get_mut(&entity_id) else {
        return;
    };
    if tank.destroyed {
        return;
    }
    tank.ammo = tank::MAX_AMMO;
    ammo_box.active = false;
    ammo_box.respawn_timer = ctx.tuning.ammo_box_respawn_sec;
    debug!("tank {} picked up ammo box {}", entity_id, box_id);
}

/// Mark a tank destroyed, remove its body and feed the kill feed. This is the
/// single destruction path; disconnects and in-game kills both land here.
pub fn destroy_tank(ctx: &mut MatchContext, victim: u32, attacker: u32) {
    let Some(tank) = ctx.tanks.get_mut(&victim) else {
        return;
    };
    if tank.destroyed {
        return;
    }
    tank.destroyed = true;
    let body = tank.body;
    ctx.world.remove_body(body);
    ctx.kill_feed.push(KillEvent {
        victim,
        attacker,
        server_tick: ctx.current_tick,
    });
}

pub fn destroy_projectile(ctx: &mut MatchContext, projectile_id: u32) {
    if let Some(projectile) = ctx.projectiles.remove(&projectile_id) {
        ctx.world.remove_body(projectile.body);
    }
}

/// Expire shells past their lifetime or outside the map
pub fn expire_projectiles(ctx: &mut MatchContext) {
    let max_age_ticks =
        (ctx.tuning.projectile_max_lifetime_sec * ctx.tick_rate as f32).ceil() as u64;
    let (w, h) = (ctx.tuning.map_width, ctx.tuning.map_height);

    let expired: Vec<u32> = ctx
        .projectiles
        .values()
        .filter(|p| {
            ctx.current_tick.saturating_sub(p.spawn_tick) >= max_age_ticks
                || p.position.x < 0.0
                || p.position.y < 0.0
                || p.position.x > w
                || p.position.y > h
        })
        .map(|p| p.projectile_id)
        .collect();

    for id in expired {
        destroy_projectile(ctx, id);
    }
}

/// Advance cooldown/reload timers, fire pending shots, tick ammo boxes
pub fn advance_weapons(ctx: &mut MatchContext, inputs: &HashMap<u32, InputState>) {
    let dt = ctx.dt();
    let mut shots: Vec<u32> = Vec::new();

    for tank in ctx.tanks.values_mut() {
        if tank.destroyed {
            continue;
        }
        if tank.fire_cooldown_timer > 0.0 {
            tank.fire_cooldown_timer = (tank.fire_cooldown_timer - dt).max(0.0);
        }
        tank.reload_timer -= dt;
        if tank.reload_timer <= 0.0 {
            if tank.ammo < tank::MAX_AMMO {
                tank.ammo += 1;
            }
            tank.reload_timer = ctx.tuning.reload_interval_sec;
        }

        let wants_fire = inputs.get(&tank.entity_id).map(|i| i.fire).unwrap_or(false);
        if wants_fire && tank.fire_cooldown_timer <= 0.0 && tank.ammo > 0 {
            tank.ammo -= 1;
            tank.fire_cooldown_timer = ctx.tuning.fire_cooldown_sec;
            shots.push(tank.entity_id);
        }
    }

    for entity_id in shots {
        fire_shell(ctx, entity_id);
    }

    for ammo_box in ctx.ammo_boxes.values_mut() {
        if !ammo_box.active {
            ammo_box.respawn_timer -= dt;
            if ammo_box.respawn_timer <= 0.0 {
                ammo_box.active = true;
            }
        }
    }
}

/// Spawn a shell at the muzzle of a tank's turret
fn fire_shell(ctx: &mut MatchContext, owner_entity_id: u32) {
    let Some(tank) = ctx.tanks.get(&owner_entity_id) else {
        return;
    };
    let dir = Vec2::from_angle(tank.turret_angle);
    let muzzle = tank.position + dir * (tank::BARREL_LENGTH + tank::MUZZLE_CLEARANCE);
    let speed = ctx.tuning.projectile_speed;
    let velocity = dir * speed;
    let spawn_tick = ctx.current_tick;
    let density = ctx.tuning.projectile_density;

    let projectile_id = ctx.alloc_projectile_id();
    let body = ctx
        .world
        .spawn_projectile(projectile_id, muzzle, velocity, density);
    ctx.projectiles.insert(
        projectile_id,
        ProjectileState {
            projectile_id,
            owner_entity_id,
            position: muzzle,
            velocity,
            pre_step_velocity: velocity,
            spawn_tick,
            initial_speed: speed,
            body,
        },
    );
}
