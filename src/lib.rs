//! Tankline server library
//!
//! Authoritative engine for a real-time 2D multiplayer tank game: clients
//! send input intents over a length-prefixed TCP stream, the server owns all
//! world state, simulates rigid-body physics at a fixed tick rate and
//! broadcasts full and delta snapshots.

pub mod config;
pub mod context;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod util;
