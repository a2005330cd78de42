pub mod constants;
pub mod runtime;
pub mod snapshot;
pub mod state;
pub mod systems;
pub mod world;
