//! WebSocket relay server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `session` | One open connection: outbound queue handle, drop count, liveness |
//! | `routing` | Identity registry, connection index, and broadcast set |
//! | `router` | Frame decoding, login/logout/relay dispatch, fan-out |
//! | `connection` | Per-connection reader/writer tasks and heartbeat |
//! | `server` | Axum routes (`/ws`, `/health`, `/metrics`) and startup |
//!
//! ## Data Flow
//!
//! `server` upgrades → `connection` registers a `session` with the `router`
//! → inbound frames go through `router` → `routing` lookup → `session` queues.

#![deny(unsafe_code)]

pub mod connection;
pub mod router;
pub mod routing;
pub mod server;
pub mod session;

pub use router::{Dispatch, LoginChange, Route, RelayReport, Router};
pub use server::{build_router, start, AppState, ServerHandle};
pub use session::{Outbound, Session};
