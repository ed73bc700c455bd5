//! Shared playback rooms: a server that owns each room's authoritative
//! playback state and a client engine that keeps local players in step with it.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod metadata;
pub mod model;
pub mod permission;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
