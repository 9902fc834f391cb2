//! # tessera-collab: rooms on top of the replicated document
//!
//! Connects a [`tessera_core::Document`] to a room server over WebSocket and
//! keeps presence for everyone in the room.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   commands    ┌──────────────┐   JSON frames   ┌─────────┐
//! │  RoomClient  │ ────────────► │    Room      │ ◄─────────────► │ server  │
//! │ (tokio task) │ ◄──────────── │ (no I/O)     │    WebSocket    └─────────┘
//! └──────────────┘   effects     └──────┬───────┘
//!                                       │
//!                          ┌────────────┴────────────┐
//!                          ▼                         ▼
//!                   ┌─────────────┐           ┌─────────────┐
//!                   │  Document   │           │   Others    │
//!                   │ (storage)   │           │ (presence)  │
//!                   └─────────────┘           └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`room`]: connection state machine, buffering and timers
//! - [`client`]: tokio driver performing the room's effects
//! - [`protocol`]: JSON wire messages
//! - [`presence`]: roster of other participants
//! - [`auth`]: authenticator seam and token parsing
//! - [`config`]: room configuration and timing constants

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod room;

pub use auth::{parse_token, Authenticator, StaticToken, TokenClaims};
pub use client::RoomClient;
pub use config::{Presence, RoomConfig};
pub use error::{AuthError, RoomError};
pub use presence::{Others, OthersEvent, User};
pub use protocol::{ClientMessage, RoomUser, ServerMessage};
pub use room::{ConnectionState, Effect, Room, RoomEvent, Session};
