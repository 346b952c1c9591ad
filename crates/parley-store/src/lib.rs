//! # parley-store
//!
//! Durable storage for the Parley chat backend, backed by SQLite.
//!
//! Rooms are stored as whole documents (participant pair + JSON
//! message log) with an explicit `version` column, so every mutation
//! is a read-modify-write with an optimistic concurrency check. The
//! crate exposes a synchronous [`Database`] handle with typed helpers
//! for rooms, users, friend status, and push subscriptions.

pub mod database;
pub mod friends;
pub mod migrations;
pub mod models;
pub mod rooms;
pub mod subscriptions;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
