//! Matchmaker: queue polling, staged bot fill, match formation
//!
//! A single long-lived task. Bots are injected progressively as the earliest
//! queued player waits: at 25/50/75/100 % of the fill timeout the queue is
//! topped up to `ceil(stage x max_players)`. Once the queue holds a full
//! group it is removed FIFO, the match context is built, `MatchStart` is
//! delivered with each player's authoritative entity id, a baseline full
//! snapshot goes out at tick 0, and the match task is spawned.

use std::f32::consts::PI;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::ServerContext;
use crate::game::constants::world as world_consts;
use crate::game::runtime;
use crate::game::snapshot::SnapshotBuilder;
use crate::game::state::{AmmoBoxState, CrateState, MatchContext, MatchTuning, TankState};
use crate::net::protocol::ServerMessage;
use crate::net::registry::Session;
use crate::util::vec2::Vec2;

/// Bot fill stages: fraction of the fill timeout -> fraction of max players
const FILL_STAGES: [f32; 4] = [0.25, 0.50, 0.75, 1.00];

/// How many poll iterations between metric summary logs
const SUMMARY_EVERY_POLLS: u64 = 120;

/// A match built from a queue group, ready to be spawned
pub struct FormedMatch {
    pub ctx: MatchContext,
    pub snapshots: SnapshotBuilder,
}

pub fn spawn_matchmaker(server: &ServerContext) -> JoinHandle<()> {
    let server = server.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(server.config.matchmaker_poll_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls: u64 = 0;

        info!(
            "matchmaker running: poll {}ms, fill timeout {}s, {} per match",
            server.config.matchmaker_poll_ms,
            server.config.fill_timeout_seconds,
            server.config.max_players_per_match
        );

        loop {
            tokio::select! {
                _ = server.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            for formed in poll_once(&server) {
                tokio::spawn(runtime::run_match(formed.ctx, formed.snapshots, server.clone()));
            }
            polls += 1;
            if polls % SUMMARY_EVERY_POLLS == 0 {
                info!("{}", server.metrics.summary());
            }
        }
        info!("matchmaker stopped");
    })
}

/// One matchmaker iteration: staged bot fill, status broadcast, formation.
/// Returns the matches formed so the caller can spawn their runtimes.
pub fn poll_once(server: &ServerContext) -> Vec<FormedMatch> {
    let config = &server.config;
    let max_players = config.max_players_per_match;

    let queue = server.registry.snapshot_queue();
    if queue.is_empty() {
        return Vec::new();
    }

    // Staged bot fill, driven by how long the earliest player has waited
    if queue.len() < max_players {
        let waited = queue
            .iter()
            .filter_map(|s| s.queue_join_time())
            .map(|t| t.elapsed().as_secs_f32())
            .fold(0.0f32, f32::max);
        let frac = waited / config.fill_timeout_seconds;
        let target = stage_target(frac, max_players);
        if queue.len() < target {
            let missing = target - queue.len();
            debug!("bot fill: {:.0}% waited, topping queue up by {}", frac * 100.0, missing);
            server.registry.create_bots(missing);
        }
    }

    // Lobby status for every queued human. Projected fill counts against the
    // human population: bots already injected by an earlier stage still end
    // up in the formed match.
    let queue = server.registry.snapshot_queue();
    let waited = queue
        .iter()
        .filter_map(|s| s.queue_join_time())
        .map(|t| t.elapsed().as_secs_f32())
        .fold(0.0f32, f32::max);
    let humans_in_queue = queue.iter().filter(|s| !s.is_bot).count();
    for (index, session) in queue.iter().enumerate() {
        if session.is_bot {
            continue;
        }
        server.registry.push_message(
            session,
            ServerMessage::QueueStatusUpdate {
                position: index as u32 + 1,
                players_in_queue: queue.len() as u32,
                needed_for_match: max_players.saturating_sub(queue.len()) as u32,
                lobby_countdown: lobby_countdown(waited, config.fill_timeout_seconds),
                projected_bot_fill: max_players.saturating_sub(humans_in_queue) as u32,
                lobby_state: 0,
            },
        );
    }

    // Form as many matches as the queue and the parallel-match budget allow
    let mut formed = Vec::new();
    while server.registry.queue_len() >= max_players
        && server.metrics.active_matches.load(Ordering::Relaxed)
            < config.max_parallel_matches as u64
    {
        let group = server.registry.take_group(max_players);
        if group.len() < max_players {
            // Raced with a disconnect; push nobody into a short match
            for session in &group {
                let _ = server.registry.enqueue(session);
            }
            break;
        }
        formed.push(form_match(server, group));
    }
    formed
}

/// Minimum queue population the staged fill wants at `frac` of the timeout
pub fn stage_target(frac: f32, max_players: usize) -> usize {
    let mut stage = 0.0f32;
    for threshold in FILL_STAGES {
        if frac >= threshold {
            stage = threshold;
        }
    }
    (stage * max_players as f32).ceil() as usize
}

/// Seconds until the next fill stage, 0 once the timeout has passed
pub fn lobby_countdown(waited: f32, fill_timeout: f32) -> f32 {
    let frac = waited / fill_timeout;
    for threshold in FILL_STAGES {
        if frac < threshold {
            return (threshold - frac) * fill_timeout;
        }
    }
    0.0
}

/// Build the match context for a full FIFO group
fn form_match(server: &ServerContext, group: Vec<Arc<Session>>) -> FormedMatch {
    let config = &server.config;
    let seed: u32 = config.fixed_seed.unwrap_or_else(rand::random);
    let match_id = format!("match-{}", Uuid::new_v4());
    let tuning = MatchTuning::from_config(config);
    let mut ctx = MatchContext::new(match_id.clone(), seed, config.tick_rate, tuning);

    spawn_world_objects(&mut ctx, config.crate_count, config.ammo_box_count);

    // The window between group selection and MatchStart: lobby_state 1
    for (index, session) in group.iter().enumerate() {
        server.registry.push_message(
            session,
            ServerMessage::QueueStatusUpdate {
                position: index as u32 + 1,
                players_in_queue: group.len() as u32,
                needed_for_match: 0,
                lobby_countdown: 0.0,
                projected_bot_fill: 0,
                lobby_state: 1,
            },
        );
    }

    let count = group.len();
    let humans = group.iter().filter(|s| !s.is_bot).count();
    for (index, session) in group.iter().enumerate() {
        let entity_id = ctx.alloc_entity_id();
        let (position, angle) = spawn_pose(&mut ctx, index, count, config.force_line_spawn);
        let body = ctx.world.spawn_tank(
            entity_id,
            position,
            angle,
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
                angle,
                body,
            ),
        );
        session.join_match(&ctx.tag, entity_id);
    }
    ctx.players = group;

    // MatchStart carries the authoritative entity id per player. The player
    // count is humans only; the bot-filled total shows up as the tank count
    // of the baseline snapshot.
    for session in &ctx.players {
        server.registry.push_message(
            session,
            ServerMessage::MatchStart {
                match_id: match_id.clone(),
                tick_rate: ctx.tick_rate,
                seed,
                initial_player_count: humans as u32,
                disable_bot_fire: ctx.tuning.disable_bot_fire,
                my_entity_id: session.tank_entity_id(),
            },
        );
    }

    // Baseline full snapshot at tick 0, recorded as the delta reference
    let mut snapshots = SnapshotBuilder::from_tuning(&ctx.tuning);
    let baseline = ServerMessage::Snapshot(snapshots.build_full(&ctx));
    for session in &ctx.players {
        server.registry.push_message(session, baseline.clone());
    }

    let bots = ctx.players.iter().filter(|s| s.is_bot).count();
    server.metrics.active_matches.fetch_add(1, Ordering::Relaxed);
    server.metrics.matches_started.fetch_add(1, Ordering::Relaxed);
    server
        .metrics
        .bots_in_match
        .fetch_add(bots as u64, Ordering::Relaxed);
    info!(
        "match {} formed: {} players ({} bots), seed {}",
        match_id, count, bots, seed
    );

    FormedMatch { ctx, snapshots }
}

/// Deterministic spawn pose for player `index` of `count`
fn spawn_pose(ctx: &mut MatchContext, index: usize, count: usize, line: bool) -> (Vec2, f32) {
    if line {
        let x = ctx.tuning.map_width * (index + 1) as f32 / (count + 1) as f32;
        (Vec2::new(x, ctx.tuning.map_height / 2.0), 0.0)
    } else {
        let margin = world_consts::SPAWN_MARGIN;
        let x = ctx.rng.gen_range(margin..ctx.tuning.map_width - margin);
        let y = ctx.rng.gen_range(margin..ctx.tuning.map_height - margin);
        let angle = ctx.rng.gen_range(-PI..PI);
        (Vec2::new(x, y), angle)
    }
}

/// Seeded crate and ammo box placement
fn spawn_world_objects(ctx: &mut MatchContext, crate_count: usize, ammo_box_count: usize) {
    let margin = world_consts::SPAWN_MARGIN;
    for crate_id in 1..=crate_count as u32 {
        let x = ctx.rng.gen_range(margin..ctx.tuning.map_width - margin);
        let y = ctx.rng.gen_range(margin..ctx.tuning.map_height - margin);
        let angle = ctx.rng.gen_range(-PI..PI);
        let position = Vec2::new(x, y);
        let body = ctx.world.spawn_crate(crate_id, position, angle);
        ctx.crates.insert(
            crate_id,
            CrateState {
                crate_id,
                position,
                angle,
                body,
            },
        );
    }
    for box_id in 1..=ammo_box_count as u32 {
        let x = ctx.rng.gen_range(margin..ctx.tuning.map_width - margin);
        let y = ctx.rng.gen_range(margin..ctx.tuning.map_height - margin);
        let position = Vec2::new(x, y);
        let collider = ctx.world.spawn_ammo_box(box_id, position);
        ctx.ammo_boxes.insert(
            box_id,
            AmmoBoxState {
                box_id,
                position,
                active: true,
                respawn_timer: 0.0,
                collider,
            },
        );
    }
}
