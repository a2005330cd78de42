//! Tracked drive and turret motor
//!
//! Hull motion comes from two track forces applied at the track offsets, so
//! opposing commands pivot the tank in place. The turret tracks a commanded
//! target angle with a motor whose speed is proportional to the angular
//! error, with a dead zone and a two-tier cap: fast slew across large errors,
//! a precise tier close to the target.

use rapier2d::prelude::*;

use crate::game::constants::{tank, turret};
use crate::game::state::{MatchTuning, TankState};
use crate::game::world::PhysicsWorld;
use crate::net::registry::InputState;
use crate::util::vec2::{angle_diff, wrap_angle, Vec2};

/// Apply this tick's drive forces to a tank hull
pub fn apply_drive_forces(
    world: &mut PhysicsWorld,
    tank: &TankState,
    input: &InputState,
    tuning: &MatchTuning,
) {
    let Some(body) = world.body_mut(tank.body) else {
        return;
    };

    body.reset_forces(true);

    let angle = body.rotation().angle();
    let forward = Vec2::from_angle(angle);
    // Left side of the hull in world space
    let left = Vec2::from_angle(angle + std::f32::consts::FRAC_PI_2);
    let center = Vec2::new(body.translation().x, body.translation().y);

    // Differential drive: the right track pushes harder on a positive turn
    let left_cmd = (input.move_dir - input.turn_dir).clamp(-1.0, 1.0);
    let right_cmd = (input.move_dir + input.turn_dir).clamp(-1.0, 1.0);
    let force = tuning.movement_speed * tank::DRIVE_FORCE_SCALE;

    let left_point = center + left * tank::TRACK_OFFSET;
    let right_point = center + (-left) * tank::TRACK_OFFSET;

    body.add_force_at_point(
        vector![forward.x * left_cmd * force, forward.y * left_cmd * force],
        point![left_point.x, left_point.y],
        true,
    );
    body.add_force_at_point(
        vector![forward.x * right_cmd * force, forward.y * right_cmd * force],
        point![right_point.x, right_point.y],
        true,
    );

    body.set_linear_damping(if input.brake {
        tank::BRAKE_DAMPING
    } else {
        tank::LINEAR_DAMPING
    });
}

/// Integrate the turret command and run the motor one step
pub fn update_turret(tank: &mut TankState, turret_turn: f32, dt: f32) {
    tank.turret_target_angle = wrap_angle(
        tank.turret_target_angle + turret_turn.clamp(-1.0, 1.0) * turret::COMMAND_RATE * dt,
    );

    let error = angle_diff(tank.turret_target_angle, tank.turret_angle);
    if error.abs() < turret::DEAD_ZONE {
        return;
    }

    let cap = if error.abs() > turret::FAST_ERROR {
        turret::SLEW_FAST
    } else {
        turret::SLEW_PRECISE
    };
    let speed = (error * turret::GAIN).clamp(-cap, cap);
    tank.turret_angle = wrap_angle(tank.turret_angle + speed * dt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    use crate::config::ServerConfig;
    use crate::game::state::MatchContext;

    fn test_tank(turret_angle: f32) -> TankState {
        // Handle comes from a real world so the state is well-formed even
        // though these tests never step physics
        let mut ctx = MatchContext::new(
            "m".into(),
            1,
            30,
            MatchTuning::from_config(&ServerConfig::default()),
        );
        let body = ctx.world.spawn_tank(1, Vec2::new(10.0, 10.0), 0.0, 1.0, 0.5);
        let mut tank = TankState::new(1, "s".into(), false, Vec2::new(10.0, 10.0), 0.0, body);
        tank.turret_angle = turret_angle;
        tank.turret_target_angle = turret_angle;
        tank
    }

    #[test]
    fn test_turret_converges_on_target() {
        let mut tank = test_tank(0.0);
        tank.turret_target_angle = 1.0;

        let dt = 1.0 / 30.0;
        for _ in 0..200 {
            update_turret(&mut tank, 0.0, dt);
        }
        assert!(
            angle_diff(tank.turret_target_angle, tank.turret_angle).abs() < turret::DEAD_ZONE * 2.0,
            "turret stalled at {}",
            tank.turret_angle
        );
    }

    #[test]
    fn test_turret_dead_zone_holds_still() {
        let mut tank = test_tank(0.5);
        tank.turret_target_angle = 0.5 + turret::DEAD_ZONE * 0.5;
        update_turret(&mut tank, 0.0, 1.0 / 30.0);
        assert_eq!(tank.turret_angle, 0.5);
    }

    #[test]
    fn test_turret_two_tier_schedule() {
        let dt = 1.0 / 30.0;

        // Large error moves at the fast cap
        let mut far = test_tank(0.0);
        far.turret_target_angle = PI - 0.1;
        update_turret(&mut far, 0.0, dt);
        assert!((far.turret_angle - turret::SLEW_FAST * dt).abs() < 1e-4);

        // Small (but out of dead zone) error is capped at the precise tier
        let mut near = test_tank(0.0);
        near.turret_target_angle = turret::FAST_ERROR * 0.9;
        update_turret(&mut near, 0.0, dt);
        assert!(near.turret_angle <= turret::SLEW_PRECISE * dt + 1e-4);
        assert!(near.turret_angle > 0.0);
    }

    #[test]
    fn test_turret_command_moves_target() {
        let mut tank = test_tank(0.0);
        let dt = 1.0 / 30.0;
        update_turret(&mut tank, 1.0, dt);
        assert!((tank.turret_target_angle - turret::COMMAND_RATE * dt).abs() < 1e-5);

        // Command is clamped to [-1, 1]
        let mut tank = test_tank(0.0);
        update_turret(&mut tank, 5.0, dt);
        assert!((tank.turret_target_angle - turret::COMMAND_RATE * dt).abs() < 1e-5);
    }

    #[test]
    fn test_turret_takes_shortest_path() {
        // Target just across the wrap boundary must rotate through it, not
        // the long way around
        let mut tank = test_tank(PI - 0.05);
        tank.turret_target_angle = wrap_angle(PI + 0.05);
        update_turret(&mut tank, 0.0, 1.0 / 30.0);
        let moved = angle_diff(tank.turret_angle, PI - 0.05);
        assert!(moved > 0.0, "rotated the wrong way: {moved}");
    }

    #[test]
    fn test_drive_forward_accelerates_forward() {
        let mut ctx = MatchContext::new(
            "m".into(),
            1,
            30,
            MatchTuning::from_config(&ServerConfig::default()),
        );
        let body = ctx.world.spawn_tank(1, Vec2::new(20.0, 20.0), 0.0, 1.0, 0.5);
        let tank = TankState::new(1, "s".into(), false, Vec2::new(20.0, 20.0), 0.0, body);
        let input = InputState {
            move_dir: 1.0,
            ..Default::default()
        };

        for _ in 0..30 {
            apply_drive_forces(&mut ctx.world, &tank, &input, &ctx.tuning);
            ctx.world.step();
        }

        let v = ctx.world.body_velocity(body).unwrap();
        assert!(v.x > 0.5, "no forward motion: {v:?}");
        assert!(v.y.abs() < v.x * 0.1, "drifted sideways: {v:?}");
    }

    #[test]
    fn test_brake_decelerates_faster_than_coasting() {
        let run = |brake: bool| {
            let mut ctx = MatchContext::new(
                "m".into(),
                1,
                30,
                MatchTuning::from_config(&ServerConfig::default()),
            );
            let body = ctx.world.spawn_tank(1, Vec2::new(20.0, 20.0), 0.0, 1.0, 0.5);
            let tank = TankState::new(1, "s".into(), false, Vec2::new(20.0, 20.0), 0.0, body);

            let throttle = InputState {
                move_dir: 1.0,
                ..Default::default()
            };
            for _ in 0..30 {
                apply_drive_forces(&mut ctx.world, &tank, &throttle, &ctx.tuning);
                ctx.world.step();
            }

            let stop = InputState {
                brake,
                ..Default::default()
            };
            for _ in 0..10 {
                apply_drive_forces(&mut ctx.world, &tank, &stop, &ctx.tuning);
                ctx.world.step();
            }
            ctx.world.body_velocity(body).unwrap().length()
        };

        let coasting = run(false);
        let braking = run(true);
        assert!(
            braking < coasting * 0.5,
            "braking {braking} vs coasting {coasting}"
        );
    }

    #[test]
    fn test_opposed_tracks_pivot_in_place() {
        let mut ctx = MatchContext::new(
            "m".into(),
            1,
            30,
            MatchTuning::from_config(&ServerConfig::default()),
        );
        let body = ctx.world.spawn_tank(1, Vec2::new(20.0, 20.0), 0.0, 1.0, 0.5);
        let tank = TankState::new(1, "s".into(), false, Vec2::new(20.0, 20.0), 0.0, body);
        let input = InputState {
            turn_dir: 1.0,
            ..Default::default()
        };

        for _ in 0..30 {
            apply_drive_forces(&mut ctx.world, &tank, &input, &ctx.tuning);
            ctx.world.step();
        }

        let (pos, angle) = ctx.world.body_position(body).unwrap();
        assert!(angle > 0.05, "did not rotate: {angle}");
        assert!(
            pos.distance_to(Vec2::new(20.0, 20.0)) < 1.0,
            "pivot wandered to {pos:?}"
        );
    }
}
