//! Movebank study recorder
//!
//! Mirrors Movebank study metadata and animal movement paths into a local
//! SQLite database and serves them to a browser map.

pub mod api;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod movebank;
pub mod opensky;
pub mod pipeline;
pub mod store;
