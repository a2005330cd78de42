//! Session registry
//!
//! The authoritative mapping of connections and authenticated sessions, and
//! the only mutable store shared between connection workers, the heartbeat
//! monitor, the matchmaker and match runtimes. Index state is guarded by one
//! mutex; per-session state sits behind the session's own mutex. Locks are
//! never held across an await, and the registry lock is always taken before a
//! session lock.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::state::MatchTag;
use crate::metrics::{gauge_dec, Metrics};
use crate::net::protocol::{InputCommand, ServerMessage};

/// Retained input intent for a session. Within a tick the match runtime reads
/// one coherent copy; between ticks a newer client tick overwrites an older
/// one and stale commands are dropped.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub move_dir: f32,
    pub turn_dir: f32,
    pub turret_turn: f32,
    pub fire: bool,
    pub brake: bool,
    pub last_client_tick: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("session id already active")]
    SessionIdTaken,
    #[error("session already queued")]
    AlreadyQueued,
    #[error("session is in a match")]
    InMatch,
    #[error("queue is full")]
    QueueFull,
    #[error("session is closed")]
    SessionClosed,
}

/// One connected client or bot participant
pub struct Session {
    pub connection_id: String,
    pub is_bot: bool,
    outbound_ready: Notify,
    closed_notify: Notify,
    state: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    session_id: Option<String>,
    authenticated: bool,
    in_queue: bool,
    queue_join_time: Option<Instant>,
    last_heartbeat: Instant,
    input: InputState,
    outbound: Vec<ServerMessage>,
    tank_entity_id: u32,
    current_match: Weak<MatchTag>,
    close_after_flush: bool,
    closed: bool,
}

impl Session {
    fn new(connection_id: String, is_bot: bool) -> Arc<Self> {
        Arc::new(Self {
            connection_id,
            is_bot,
            outbound_ready: Notify::new(),
            closed_notify: Notify::new(),
            state: Mutex::new(SessionState {
                session_id: None,
                authenticated: false,
                in_queue: false,
                queue_join_time: None,
                last_heartbeat: Instant::now(),
                input: InputState::default(),
                outbound: Vec::new(),
                tank_entity_id: 0,
                current_match: Weak::new(),
                close_after_flush: false,
                closed: false,
            }),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session_id.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn in_queue(&self) -> bool {
        self.state.lock().in_queue
    }

    pub fn queue_join_time(&self) -> Option<Instant> {
        self.state.lock().queue_join_time
    }

    pub fn heartbeat_age(&self) -> Duration {
        self.state.lock().last_heartbeat.elapsed()
    }

    /// 0 when the session has no tank in a match
    pub fn tank_entity_id(&self) -> u32 {
        self.state.lock().tank_entity_id
    }

    /// The running match this session belongs to, if it is still alive. The
    /// reference is weak: a finished match drops its tag and the association
    /// vanishes without any unlinking protocol.
    pub fn current_match(&self) -> Option<Arc<MatchTag>> {
        self.state.lock().current_match.upgrade()
    }

    pub fn join_match(&self, tag: &Arc<MatchTag>, entity_id: u32) {
        let mut state = self.state.lock();
        state.current_match = Arc::downgrade(tag);
        state.tank_entity_id = entity_id;
    }

    pub fn leave_match(&self) {
        let mut state = self.state.lock();
        state.current_match = Weak::new();
        state.tank_entity_id = 0;
    }

    /// Ask the write task to terminate the connection once the outbound
    /// buffer is flushed (auth rejection path)
    pub fn request_close_after_flush(&self) {
        self.state.lock().close_after_flush = true;
        self.outbound_ready.notify_one();
    }

    pub fn close_after_flush(&self) -> bool {
        self.state.lock().close_after_flush
    }

    /// Resolve when new outbound messages may be available
    pub async fn outbound_ready(&self) {
        self.outbound_ready.notified().await;
    }

    /// Resolve once the session has been closed
    pub async fn wait_closed(&self) {
        loop {
            if self.is_closed() {
                return;
            }
            self.closed_notify.notified().await;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id)
            .field("is_bot", &self.is_bot)
            .finish_non_exhaustive()
    }
}

struct Indices {
    connections: HashMap<String, Arc<Session>>,
    by_session_id: HashMap<String, Arc<Session>>,
    /// FIFO by queue join time (insertion order)
    queue: Vec<Arc<Session>>,
}

pub struct SessionRegistry {
    config: Arc<ServerConfig>,
    metrics: Arc<Metrics>,
    inner: Mutex<Indices>,
}

impl SessionRegistry {
    pub fn new(config: Arc<ServerConfig>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            metrics,
            inner: Mutex::new(Indices {
                connections: HashMap::new(),
                by_session_id: HashMap::new(),
                queue: Vec::new(),
            }),
        }
    }

    /// Register a new pre-auth connection
    pub fn add_connection(&self) -> Arc<Session> {
        let session = Session::new(Uuid::new_v4().to_string(), false);
        self.inner
            .lock()
            .connections
            .insert(session.connection_id.clone(), session.clone());
        self.metrics.connections_active.fetch_add(1, Ordering::Relaxed);
        debug!("connection {} registered", session.connection_id);
        session
    }

    /// Promote a connection to an authenticated session
    pub fn authenticate(
        &self,
        session: &Arc<Session>,
        session_id: String,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.by_session_id.contains_key(&session_id) {
            return Err(RegistryError::SessionIdTaken);
        }
        {
            let mut state = session.state.lock();
            if state.closed {
                return Err(RegistryError::SessionClosed);
            }
            state.authenticated = true;
            state.session_id = Some(session_id.clone());
            state.last_heartbeat = Instant::now();
        }
        inner.by_session_id.insert(session_id, session.clone());
        if !session.is_bot {
            self.metrics.connected_players.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Append an authenticated session to the waiting queue
    pub fn enqueue(&self, session: &Arc<Session>) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.queue.len() >= self.config.queue_soft_limit {
            warn!("queue soft limit {} reached", self.config.queue_soft_limit);
            return Err(RegistryError::QueueFull);
        }
        let mut state = session.state.lock();
        if state.closed {
            return Err(RegistryError::SessionClosed);
        }
        if !state.authenticated {
            return Err(RegistryError::NotAuthenticated);
        }
        if state.in_queue {
            return Err(RegistryError::AlreadyQueued);
        }
        if state.current_match.upgrade().is_some() {
            return Err(RegistryError::InMatch);
        }
        state.in_queue = true;
        state.queue_join_time = Some(Instant::now());
        drop(state);
        inner.queue.push(session.clone());
        Ok(())
    }

    /// Point-in-time copy of the waiting queue, FIFO order
    pub fn snapshot_queue(&self) -> Vec<Arc<Session>> {
        self.inner.lock().queue.clone()
    }

    /// Remove and return the first `count` queued sessions (FIFO)
    pub fn take_group(&self, count: usize) -> Vec<Arc<Session>> {
        let mut inner = self.inner.lock();
        let count = count.min(inner.queue.len());
        let group: Vec<_> = inner.queue.drain(..count).collect();
        for session in &group {
            let mut state = session.state.lock();
            state.in_queue = false;
            state.queue_join_time = None;
        }
        group
    }

    /// Append a message to a session's outbound buffer and wake its writer.
    /// Bot sessions silently discard messages.
    pub fn push_message(&self, session: &Arc<Session>, message: ServerMessage) {
        if session.is_bot {
            return;
        }
        {
            let mut state = session.state.lock();
            if state.closed {
                return;
            }
            state.outbound.push(message);
        }
        self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
        session.outbound_ready.notify_one();
    }

    /// Atomically steal the outbound buffer
    pub fn drain_messages(&self, session: &Arc<Session>) -> Vec<ServerMessage> {
        std::mem::take(&mut session.state.lock().outbound)
    }

    pub fn update_heartbeat(&self, session: &Arc<Session>) {
        session.state.lock().last_heartbeat = Instant::now();
    }

    /// Overwrite the retained input if the command is not stale
    pub fn update_input(&self, session: &Arc<Session>, cmd: &InputCommand) {
        let mut state = session.state.lock();
        if cmd.client_tick < state.input.last_client_tick {
            // Obsolete input, not an error
            return;
        }
        state.input = InputState {
            move_dir: cmd.move_dir.clamp(-1.0, 1.0),
            turn_dir: cmd.turn_dir.clamp(-1.0, 1.0),
            turret_turn: cmd.turret_turn.clamp(-1.0, 1.0),
            fire: cmd.fire,
            brake: cmd.brake,
            last_client_tick: cmd.client_tick,
        };
    }

    /// Coherent copy of the current input, consumed by the match runtime
    pub fn input_snapshot(&self, session: &Arc<Session>) -> InputState {
        session.state.lock().input.clone()
    }

    /// Remove a session from every index and mark it closed. Idempotent; safe
    /// to call from the heartbeat monitor, the worker and match teardown. A
    /// tank owned by the session is destroyed by its match on the next tick
    /// through the normal destruction path.
    pub fn disconnect_session(&self, session: &Arc<Session>) {
        let mut inner = self.inner.lock();
        inner.connections.remove(&session.connection_id);
        let mut state = session.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(id) = &state.session_id {
            inner.by_session_id.remove(id);
        }
        if state.in_queue {
            state.in_queue = false;
            state.queue_join_time = None;
            let connection_id = &session.connection_id;
            inner
                .queue
                .retain(|queued| &queued.connection_id != connection_id);
        }
        if state.authenticated && !session.is_bot {
            gauge_dec(&self.metrics.connected_players);
        }
        drop(state);
        if !session.is_bot {
            gauge_dec(&self.metrics.connections_active);
        }
        // Wake both connection tasks so they observe the closed flag and exit
        session.outbound_ready.notify_one();
        session.closed_notify.notify_one();
        debug!("session {} disconnected", session.connection_id);
    }

    /// Allocate bot sessions: authenticated, enqueued, no connection
    pub fn create_bots(&self, count: usize) -> Vec<Arc<Session>> {
        let mut bots = Vec::with_capacity(count);
        let mut inner = self.inner.lock();
        for _ in 0..count {
            let bot_id = format!("bot-{}", Uuid::new_v4());
            let session = Session::new(bot_id.clone(), true);
            {
                let mut state = session.state.lock();
                state.authenticated = true;
                state.session_id = Some(bot_id.clone());
                state.in_queue = true;
                state.queue_join_time = Some(Instant::now());
            }
            inner.by_session_id.insert(bot_id, session.clone());
            inner.queue.push(session.clone());
            bots.push(session);
        }
        bots
    }

    /// All authenticated sessions (bots included; callers filter)
    pub fn authenticated_sessions(&self) -> Vec<Arc<Session>> {
        self.inner.lock().by_session_id.values().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }
}
