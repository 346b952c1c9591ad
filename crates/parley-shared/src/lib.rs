//! # parley-shared
//!
//! Types shared between the Parley server and its tooling: opaque
//! identifiers, the live-channel wire protocol, and the bearer-token
//! auth contract.

pub mod auth;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{AuthError, ProtocolError};
pub use types::{ConnectionId, MessageId, RoomId, UserId};
