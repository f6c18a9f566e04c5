//! Blaster game-state server
//!
//! Authoritative match simulation for a third-person arena shooter:
//! - Replicated fields with authority checks and observer notification
//! - Combat state machine, weapons, grenades and respawn timers
//! - Match phases, countdown and top-scorer tracking
//! - WebSocket and HTTP surfaces for clients and hit resolution

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod replication;
pub mod util;
pub mod ws;
