//! # relay-core
//!
//! Shared vocabulary for the relay crates:
//!
//! - **Identifiers**: [`ids::ConnectionId`] (server-generated) and
//!   [`ids::UserId`] (client-supplied, never authenticated)
//! - **Wire protocol**: [`protocol::Message`] decoded from inbound text
//!   frames, [`protocol::OutboundFrame`] for relayed messages
//! - **Errors**: [`errors::RouteError`] and [`errors::DeliveryError`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `relay-server`.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::{DeliveryError, RouteError};
pub use ids::{ConnectionId, UserId};
pub use protocol::{Message, OutboundFrame};
