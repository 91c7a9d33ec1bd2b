//! GPS tracking recorder.
//!
//! Ingests binary AVL frames from vehicle-tracking devices over TCP,
//! persists decoded location records to PostgreSQL and serves them back
//! through a paginated HTTP read API.

pub mod api;
pub mod avl;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod server;
pub mod session;
