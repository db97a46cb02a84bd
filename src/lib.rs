//! TaskBoard real-time sync server library.
//! This crate exposes internal modules for integration testing and for
//! embedding the sync layer in a larger application.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod sync;
pub mod ws;
