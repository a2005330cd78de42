pub mod auth;
pub mod framing;
pub mod heartbeat;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod worker;
