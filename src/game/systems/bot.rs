//! Bot input synthesis
//!
//! Bots emit the same `InputState` a human connection would: wander headings
//! drive the hull, the turret is commanded toward the nearest live enemy by
//! shortest-angle error, and firing follows a fixed tick cadence. All
//! randomness comes from the match RNG, so a fixed seed reproduces bot play.

use std::f32::consts::PI;

use rand::Rng;

use crate::game::constants::bot;
use crate::game::state::MatchContext;
use crate::net::registry::InputState;
use crate::util::vec2::{angle_diff, Vec2};

/// Synthesize this tick's input for a bot-controlled tank
pub fn bot_input(ctx: &mut MatchContext, entity_id: u32) -> InputState {
    if ctx.tuning.disable_bot_ai {
        return InputState::default();
    }
    let Some(tank) = ctx.tanks.get(&entity_id) else {
        return InputState::default();
    };
    if tank.destroyed {
        return InputState::default();
    }

    let position = tank.position;
    let hull_angle = tank.hull_angle;
    let turret_angle = tank.turret_angle;
    let mut heading = tank.bot_heading;

    // Occasionally pick a new wander heading
    if ctx.rng.gen_bool(bot::WANDER_TURN_PROBABILITY) {
        heading = ctx.rng.gen_range(-PI..PI);
        if let Some(tank) = ctx.tanks.get_mut(&entity_id) {
            tank.bot_heading = heading;
        }
    }

    let turn_dir = (angle_diff(heading, hull_angle) * bot::TURN_GAIN).clamp(-1.0, 1.0);

    // Aim at the nearest live tank that is not us
    let target = nearest_enemy(ctx, entity_id, position);
    let turret_turn = match target {
        Some(target_pos) => {
            let desired = (target_pos - position).angle();
            let error = angle_diff(desired, turret_angle);
            if error.abs() < bot::AIM_DEAD_ZONE {
                0.0
            } else {
                (error / bot::AIM_SCALE).clamp(-1.0, 1.0)
            }
        }
        None => 0.0,
    };

    let fire = !ctx.tuning.disable_bot_fire
        && target.is_some()
        && ctx.tuning.bot_fire_interval_ticks > 0
        && (ctx.current_tick + entity_id as u64) % ctx.tuning.bot_fire_interval_ticks == 0;

    InputState {
        move_dir: 1.0,
        turn_dir,
        turret_turn,
        fire,
        brake: false,
        last_client_tick: 0,
    }
}

fn nearest_enemy(ctx: &MatchContext, entity_id: u32, position: Vec2) -> Option<Vec2> {
    ctx.tanks
        .values()
        .filter(|t| t.alive() && t.entity_id != entity_id)
        .min_by(|a, b| {
            a.position
                .distance_sq_to(position)
                .partial_cmp(&b.position.distance_sq_to(position))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|t| t.position)
}
