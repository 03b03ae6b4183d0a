//! Server-side authoritative simulation plumbing

pub mod combat;
pub mod lag_comp;
pub mod physics;
pub mod server;
pub mod snapshot;
pub mod world;

pub use lag_comp::{LagCompensator, Rewind, RewindMode, RewindSource};
pub use server::{GameServer, Inbound, Outbound, ServerHandle, TickReport};
pub use snapshot::{AllVisible, TickBroadcast, VisibilityFilter};
pub use world::{KinematicWorld, Simulation};
