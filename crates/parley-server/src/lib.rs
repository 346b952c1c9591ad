//! # parley-server
//!
//! Real-time direct-messaging backend.
//!
//! This crate provides:
//! - **WebSocket gateway** (axum) carrying the live chat channel:
//!   send, edit, delete, typing, and viewing-state events
//! - **Connection registry** mapping each authenticated identity to
//!   at most one live connection, doubling as the presence tracker
//! - **Delivery engine** that broadcasts to connected participants
//!   first and persists / pushes in the background
//! - **REST API** for history pagination, room listings, message
//!   mutations, and push subscription management

pub mod api;
pub mod collab;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod history;
pub mod registry;
pub mod state;
pub mod store;
