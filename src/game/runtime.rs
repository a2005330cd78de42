//! Match runtime: the fixed-rate authoritative tick loop
//!
//! One cooperative task per match. The tick body is a synchronous function
//! over the match context so the whole simulation can be driven directly in
//! tests; the async wrapper only handles pacing, shutdown and teardown.

use std::time::{Duration, Instant};

use hashbrown::HashMap;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::context::ServerContext;
use crate::game::snapshot::SnapshotBuilder;
use crate::game::state::MatchContext;
use crate::game::systems::{bot, combat, drive};
use crate::metrics::gauge_dec;
use crate::net::protocol::ServerMessage;
use crate::net::registry::{InputState, SessionRegistry};

/// Advance a match by exactly one tick
pub fn step_match(
    ctx: &mut MatchContext,
    snapshots: &mut SnapshotBuilder,
    registry: &SessionRegistry,
) {
    if ctx.end_dispatched {
        return;
    }
    ctx.current_tick += 1;

    // 1. Input collection: one coherent copy per participant
    let inputs = collect_inputs(ctx, registry);

    // 2. Pre-step velocity capture for penetration evaluation
    combat::capture_pre_step_velocities(ctx);

    // 3. Drive forces, turret motors, fixed physics step
    let dt = ctx.dt();
    let entity_ids: Vec<u32> = ctx.tanks.keys().copied().collect();
    for entity_id in entity_ids {
        let alive = ctx.tanks.get(&entity_id).map(|t| t.alive()).unwrap_or(false);
        if !alive {
            continue;
        }
        let input = inputs.get(&entity_id).cloned().unwrap_or_default();
        if let Some(tank) = ctx.tanks.get(&entity_id) {
            drive::apply_drive_forces(&mut ctx.world, tank, &input, &ctx.tuning);
        }
        if let Some(tank) = ctx.tanks.get_mut(&entity_id) {
            drive::update_turret(tank, input.turret_turn, dt);
        }
    }
    ctx.world.step();

    // 4. Transform sync from bodies back into game state
    sync_transforms(ctx);

    // 5. Contact processing
    let events = ctx.world.drain_collision_events();
    combat::process_contacts(ctx, events);

    // 6. Projectile lifecycle
    combat::expire_projectiles(ctx);

    // 7. Ammo, reload, firing
    combat::advance_weapons(ctx, &inputs);

    // 8 + 9. Kill feed batching, snapshot and event emission
    emit_tick_output(ctx, snapshots, registry);

    // 10. Termination check (one-way transition)
    if !ctx.match_ended {
        let alive = ctx.alive_tank_count();
        if alive <= 1 || ctx.current_tick >= ctx.tuning.max_match_ticks {
            ctx.match_ended = true;
            ctx.winner_entity_id = ctx.sole_survivor().unwrap_or(0);
        }
    }

    // 11. Terminal broadcast, exactly once
    if ctx.match_ended && !ctx.end_dispatched {
        broadcast(
            ctx,
            registry,
            ServerMessage::MatchEnd {
                winner_entity_id: ctx.winner_entity_id,
                server_tick: ctx.current_tick,
            },
        );
        ctx.end_dispatched = true;
    }
}

/// Gather inputs for every participant. Sessions observed closed have their
/// tank destroyed here, through the same path as in-game destruction.
fn collect_inputs(
    ctx: &mut MatchContext,
    registry: &SessionRegistry,
) -> HashMap<u32, InputState> {
    let mut inputs = HashMap::new();
    let players = ctx.players.clone();
    for session in &players {
        let entity_id = session.tank_entity_id();
        if entity_id == 0 {
            continue;
        }
        if session.is_closed() {
            let alive = ctx.tanks.get(&entity_id).map(|t| t.alive()).unwrap_or(false);
            if alive {
                warn!(
                    "session {} left match {}, destroying tank {}",
                    session.connection_id, ctx.match_id, entity_id
                );
                combat::destroy_tank(ctx, entity_id, 0);
            }
            continue;
        }
        let input = if session.is_bot {
            bot::bot_input(ctx, entity_id)
        } else {
            registry.input_snapshot(session)
        };
        inputs.insert(entity_id, input);
    }
    inputs
}

fn sync_transforms(ctx: &mut MatchContext) {
    for tank in ctx.tanks.values_mut() {
        if tank.destroyed {
            continue;
        }
        if let Some((position, angle)) = ctx.world.body_position(tank.body) {
            tank.position = position;
            tank.hull_angle = angle;
        }
    }
    for projectile in ctx.projectiles.values_mut() {
        if let Some((position, _)) = ctx.world.body_position(projectile.body) {
            projectile.position = position;
        }
        if let Some(velocity) = ctx.world.body_velocity(projectile.body) {
            projectile.velocity = velocity;
        }
    }
    for crate_state in ctx.crates.values_mut() {
        if let Some((position, angle)) = ctx.world.body_position(crate_state.body) {
            crate_state.position = position;
            crate_state.angle = angle;
        }
    }
}

/// Emit the snapshot due this tick plus the tick's damage events and kill
/// feed. Nothing leaves a match that has already ended.
fn emit_tick_output(
    ctx: &mut MatchContext,
    snapshots: &mut SnapshotBuilder,
    registry: &SessionRegistry,
) {
    if ctx.match_ended {
        return;
    }
    if let Some(message) = snapshots.emit(ctx) {
        broadcast(ctx, registry, message);
    }
    let damage = std::mem::take(&mut ctx.damage_events);
    for record in damage {
        broadcast(
            ctx,
            registry,
            ServerMessage::DamageEvent {
                victim: record.victim,
                attacker: record.attacker,
                amount: record.amount,
                remaining_hp: record.remaining_hp,
            },
        );
    }
    if !ctx.kill_feed.is_empty() {
        let events = ctx.kill_feed.drain(..).collect();
        broadcast(ctx, registry, ServerMessage::KillFeedUpdate { events });
    }
}

fn broadcast(ctx: &MatchContext, registry: &SessionRegistry, message: ServerMessage) {
    for session in &ctx.players {
        registry.push_message(session, message.clone());
    }
}

/// Drive a match to completion on the shared scheduler
pub async fn run_match(
    mut ctx: MatchContext,
    mut snapshots: SnapshotBuilder,
    server: ServerContext,
) {
    info!(
        "match {} running: {} players, seed {}, {} Hz",
        ctx.match_id,
        ctx.players.len(),
        ctx.seed,
        ctx.tick_rate
    );

    let mut ticker = interval(Duration::from_secs_f64(1.0 / ctx.tick_rate as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = server.shutdown.wait() => {
                if !ctx.end_dispatched {
                    ctx.match_ended = true;
                    broadcast(&ctx, &server.registry, ServerMessage::MatchEnd {
                        winner_entity_id: 0,
                        server_tick: ctx.current_tick,
                    });
                    ctx.end_dispatched = true;
                }
                break;
            }
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        step_match(&mut ctx, &mut snapshots, &server.registry);
        server.metrics.record_tick(started.elapsed());

        if ctx.end_dispatched {
            // One more pacing cycle so connection writers drain the terminal
            // message before the match state is released
            ticker.tick().await;
            break;
        }
    }

    teardown(ctx, &server);
}

fn teardown(ctx: MatchContext, server: &ServerContext) {
    let bots = ctx.players.iter().filter(|s| s.is_bot).count();
    for session in &ctx.players {
        session.leave_match();
        if session.is_bot {
            server.registry.disconnect_session(session);
        }
    }
    gauge_dec(&server.metrics.active_matches);
    for _ in 0..bots {
        gauge_dec(&server.metrics.bots_in_match);
    }
    info!(
        "match {} ended at tick {}, winner {}",
        ctx.match_id, ctx.current_tick, ctx.winner_entity_id
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ServerConfig;
    use crate::game::state::{MatchTuning, TankState};
    use crate::metrics::Metrics;
    use crate::net::protocol::InputCommand;
    use crate::net::registry::Session;
    use crate::util::vec2::Vec2;

    struct Harness {
        registry: SessionRegistry,
        ctx: MatchContext,
        snapshots: SnapshotBuilder,
    }

    /// Build a match with `humans` connected players and `bots` bot players,
    /// tanks in a line, the way the matchmaker would
    fn harness(config: ServerConfig, humans: usize, bots: usize) -> Harness {
        let config = Arc::new(config);
        let registry = SessionRegistry::new(config.clone(), Arc::new(Metrics::new()));
        let mut ctx = MatchContext::new(
            "m-test".to_string(),
            99,
            config.tick_rate,
            MatchTuning::from_config(&config),
        );

        let mut sessions: Vec<Arc<Session>> = Vec::new();
        for i in 0..humans {
            let session = registry.add_connection();
            registry
                .authenticate(&session, format!("human-{i}"))
                .unwrap();
            sessions.push(session);
        }
        sessions.extend(registry.create_bots(bots));
        registry.take_group(bots); // clear the queue the bots landed in

        let total = sessions.len();
        for (i, session) in sessions.iter().enumerate() {
            let entity_id = ctx.alloc_entity_id();
            let x = ctx.tuning.map_width * (i + 1) as f32 / (total + 1) as f32;
            let position = Vec2::new(x, ctx.tuning.map_height / 2.0);
            let body = ctx.world.spawn_tank(
                entity_id,
                position,
                0.0,
                ctx.tuning.hull_density,
                ctx.tuning.turret_density,
            );
            ctx.tanks.insert(
                entity_id,
                TankState::new(
                    entity_id,
                    session.session_id().unwrap_or_default(),
                    session.is_bot,
                    position,
                    0.0,
                    body,
                ),
            );
            session.join_match(&ctx.tag, entity_id);
        }
        ctx.players = sessions;

        let snapshots = SnapshotBuilder::from_tuning(&ctx.tuning);
        Harness {
            registry,
            ctx,
            snapshots,
        }
    }

    fn drain(h: &Harness, player: usize) -> Vec<ServerMessage> {
        h.registry.drain_messages(&h.ctx.players[player])
    }

    fn quiet_config() -> ServerConfig {
        // Bots that neither steer nor fire keep scenario ticks deterministic
        ServerConfig {
            disable_bot_ai: true,
            disable_bot_fire: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_match_end_exactly_once() {
        let mut h = harness(quiet_config(), 1, 0);

        // A single live tank terminates the match on the first tick
        step_match(&mut h.ctx, &mut h.snapshots, &h.registry);
        assert!(h.ctx.match_ended);
        assert!(h.ctx.end_dispatched);

        // The termination condition stays true on later ticks; the guard must
        // keep the terminal message unique
        step_match(&mut h.ctx, &mut h.snapshots, &h.registry);
        step_match(&mut h.ctx, &mut h.snapshots, &h.registry);

        let ends: Vec<_> = drain(&h, 0)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::MatchEnd { .. }))
            .collect();
        assert_eq!(ends.len(), 1);
        match &ends[0] {
            ServerMessage::MatchEnd { winner_entity_id, server_tick } => {
                assert_eq!(*winner_entity_id, 1);
                assert_eq!(*server_tick, 1);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_tick_does_not_advance_after_end() {
        let mut h = harness(quiet_config(), 1, 0);
        step_match(&mut h.ctx, &mut h.snapshots, &h.registry);
        let tick = h.ctx.current_tick;
        step_match(&mut h.ctx, &mut h.snapshots, &h.registry);
        assert_eq!(h.ctx.current_tick, tick);
    }

    #[test]
    fn test_hard_cap_ends_match_as_draw() {
        let config = ServerConfig {
            max_match_seconds: 0.2, // 6 ticks at 30 Hz
            ..quiet_config()
        };
        let mut h = harness(config, 1, 1);

        for _ in 0..10 {
            step_match(&mut h.ctx, &mut h.snapshots, &h.registry);
        }
        assert!(h.ctx.match_ended);

        let end = drain(&h, 0)
            .into_iter()
            .find(|m| matches!(m, ServerMessage::MatchEnd { .. }))
            .expect("no MatchEnd");
        match end {
            ServerMessage::MatchEnd { winner_entity_id, .. } => {
                // Two tanks still alive at the cap: a draw
                assert_eq!(winner_entity_id, 0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_snapshot_ticks_monotonic_and_delta_bases() {
        let config = ServerConfig {
            snapshot_interval_ticks: 5,
            full_snapshot_interval_ticks: 30,
            max_match_seconds: 60.0,
            ..quiet_config()
        };
        let mut h = harness(config, 1, 2);

        for _ in 0..40 {
            step_match(&mut h.ctx, &mut h.snapshots, &h.registry);
        }

        let mut last_tick = 0u64;
        let mut saw_full_at_30 = false;
        let mut saw_delta_at_35 = false;
        for message in drain(&h, 0) {
            match message {
                ServerMessage::Snapshot(s) => {
                    assert!(s.server_tick >= last_tick);
                    last_tick = s.server_tick;
                    if s.server_tick == 30 {
                        saw_full_at_30 = true;
                    }
                }
                ServerMessage::Delta(d) => {
                    assert!(d.server_tick >= last_tick);
                    last_tick = d.server_tick;
                    if d.server_tick == 35 {
                        assert_eq!(d.base_tick, 30);
                        saw_delta_at_35 = true;
                    }
                }
                _ => {}
            }
        }
        assert!(saw_full_at_30);
        assert!(saw_delta_at_35);
    }

    #[test]
    fn test_kill_feed_batches_same_tick_destructions() {
        let mut h = harness(quiet_config(), 1, 3);

        // Two destructions land in the same tick
        combat::destroy_tank(&mut h.ctx, 2, 1);
        combat::destroy_tank(&mut h.ctx, 3, 1);
        step_match(&mut h.ctx, &mut h.snapshots, &h.registry);

        let feeds: Vec<_> = drain(&h, 0)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::KillFeedUpdate { events } => Some(events),
                _ => None,
            })
            .collect();
        assert_eq!(feeds.len(), 1, "destructions must batch into one message");
        assert_eq!(feeds[0].len(), 2);
    }

    #[test]
    fn test_human_input_drives_tank() {
        let config = ServerConfig {
            max_match_seconds: 60.0,
            ..quiet_config()
        };
        let mut h = harness(config, 1, 1);
        let session = h.ctx.players[0].clone();
        let entity_id = session.tank_entity_id();
        let start = h.ctx.tanks[&entity_id].position;

        h.registry.update_input(
            &session,
            &InputCommand {
                client_tick: 1,
                move_dir: 1.0,
                ..Default::default()
            },
        );
        for _ in 0..30 {
            step_match(&mut h.ctx, &mut h.snapshots, &h.registry);
        }

        let end = h.ctx.tanks[&entity_id].position;
        assert!(
            start.distance_to(end) > 0.5,
            "tank never moved: {start:?} -> {end:?}"
        );
    }

    #[test]
    fn test_closed_session_destroys_tank_via_normal_path() {
        let mut h = harness(quiet_config(), 2, 1);
        let leaver = h.ctx.players[1].clone();
        let entity_id = leaver.tank_entity_id();

        h.registry.disconnect_session(&leaver);
        step_match(&mut h.ctx, &mut h.snapshots, &h.registry);

        assert!(h.ctx.tanks[&entity_id].destroyed);
        let feed = drain(&h, 0)
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::KillFeedUpdate { events } => Some(events),
                _ => None,
            })
            .expect("destruction must reach the kill feed");
        assert_eq!(feed[0].victim, entity_id);
        assert_eq!(feed[0].attacker, 0);
    }

    #[test]
    fn test_shell_flight_damage_sequence() {
        // Two stationary tanks on the spawn line; the left one holds fire.
        // The client-visible sequence must be: shell announced in a delta,
        // then a DamageEvent, then the shell in removed_projectiles.
        let config = ServerConfig {
            max_match_seconds: 60.0,
            ..quiet_config()
        };
        let mut h = harness(config, 2, 0);
        let shooter = h.ctx.players[0].clone();
        let victim_entity = h.ctx.players[1].tank_entity_id();

        h.registry.update_input(
            &shooter,
            &InputCommand {
                client_tick: 1,
                fire: true,
                ..Default::default()
            },
        );

        for _ in 0..150 {
            step_match(&mut h.ctx, &mut h.snapshots, &h.registry);
            if h.ctx.end_dispatched {
                break;
            }
        }

        let mut announced = Vec::new();
        let mut removed = Vec::new();
        let mut first_damage = None;
        let mut damage_seen_at = None;
        let mut announce_seen_at = None;
        for (i, message) in drain(&h, 0).into_iter().enumerate() {
            match message {
                ServerMessage::Delta(d) => {
                    if !d.projectiles.is_empty() && announce_seen_at.is_none() {
                        announce_seen_at = Some(i);
                    }
                    announced.extend(d.projectiles.iter().map(|p| p.id));
                    removed.extend(d.removed_projectiles);
                }
                ServerMessage::DamageEvent {
                    victim,
                    attacker,
                    amount,
                    remaining_hp,
                } => {
                    if first_damage.is_none() {
                        first_damage = Some((victim, attacker, amount, remaining_hp));
                        damage_seen_at = Some(i);
                    }
                }
                _ => {}
            }
        }

        let (victim, attacker, amount, remaining_hp) =
            first_damage.expect("no damage was ever applied");
        assert_eq!(victim, victim_entity);
        assert_eq!(attacker, shooter.tank_entity_id());
        assert_eq!(amount, h.ctx.tuning.projectile_damage);
        assert_eq!(remaining_hp, 100 - h.ctx.tuning.projectile_damage);
        assert!(!announced.is_empty(), "shell never announced in a delta");
        assert!(
            announce_seen_at.unwrap() < damage_seen_at.unwrap(),
            "shell must be announced before it deals damage"
        );
        assert!(
            removed.iter().any(|id| announced.contains(id)),
            "spent shell never reported removed"
        );
    }

    #[test]
    fn test_bots_fight_to_a_winner() {
        // Full bot match with live AI; someone must win within the cap
        let config = ServerConfig {
            bot_fire_interval_ticks: 10,
            max_match_seconds: 120.0,
            ..Default::default()
        };
        let mut h = harness(config, 0, 4);

        let mut ticks = 0u32;
        while !h.ctx.match_ended && ticks < 4000 {
            step_match(&mut h.ctx, &mut h.snapshots, &h.registry);
            ticks += 1;
        }
        assert!(h.ctx.match_ended, "bot match never terminated");
    }

    #[tokio::test]
    async fn test_run_match_releases_bots_and_gauges() {
        let (server, _handle) = crate::context::ServerContext::new(quiet_config()).unwrap();
        server
            .metrics
            .active_matches
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        server
            .metrics
            .bots_in_match
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let mut ctx = MatchContext::new(
            "m-run".to_string(),
            5,
            120, // fast ticks keep the test short
            MatchTuning::from_config(&server.config),
        );
        let bots = server.registry.create_bots(1);
        server.registry.take_group(1);
        let entity_id = ctx.alloc_entity_id();
        let body = ctx.world.spawn_tank(entity_id, Vec2::new(10.0, 10.0), 0.0, 1.0, 0.5);
        ctx.tanks.insert(
            entity_id,
            TankState::new(entity_id, bots[0].session_id().unwrap(), true, Vec2::new(10.0, 10.0), 0.0, body),
        );
        bots[0].join_match(&ctx.tag, entity_id);
        ctx.players = bots.clone();
        let snapshots = SnapshotBuilder::from_tuning(&ctx.tuning);

        // Single tank: terminates on the first tick
        run_match(ctx, snapshots, server.clone()).await;

        assert!(bots[0].is_closed());
        assert!(bots[0].current_match().is_none());
        assert_eq!(
            server
                .metrics
                .active_matches
                .load(std::sync::atomic::Ordering::Relaxed),
            0
        );
        assert_eq!(
            server
                .metrics
                .bots_in_match
                .load(std::sync::atomic::Ordering::Relaxed),
            0
        );
    }
}
