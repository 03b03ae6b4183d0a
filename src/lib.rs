//! Netcode core for an authoritative multiplayer game.
//!
//! The server runs a fixed-rate simulation, keeps a short history of world
//! snapshots and rewinds it to validate hits against what a lagging client
//! saw. Clients predict their own entity, reconcile against acknowledged
//! state, and interpolate everyone else from buffered snapshots.

pub mod app;
pub mod client;
pub mod config;
pub mod error;
pub mod game;
pub mod http;
pub mod input;
pub mod session;
pub mod snapshot;
pub mod util;
pub mod ws;

pub use error::NetError;
