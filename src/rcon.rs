//! RCON client for JSONAPI servers.
//!
//! This module implements a resilient client for the JSONAPI v2 WebSocket
//! protocol: tagged request/response calls and push subscriptions share one
//! persistent connection that recovers automatically when lost.
//!
//! # Architecture
//!
//! ```text
//! call() ──────► CommandCorrelator ─┐
//!                                   ├─► ConnectionSupervisor ─► Transport ─► server
//! subscribe() ─► SubscriptionRegistry┘          │
//!                                               ▼ inbound frames
//!                      MessageRouter ─► CommandCorrelator (batches)
//!                                    └► SubscriptionRegistry ─► listener (pushes)
//! ```
//!
//! # Protocol
//!
//! ```text
//! ws://{host}:{port}/api/2/websocket
//!
//! → /api/2/call?json=[{"name":..,"username":..,"key":..,"arguments":[..],"tag":".."}]
//! ← [{"result":"success","source":..,"tag":"..","success":..}]
//!
//! → /api/2/subscribe?json=[{"name":..,"username":..,"key":..,"show_previous":false,"tag":".."}]
//! ← {"result":"success","source":..,"tag":"..","success":..}
//! ```

pub mod auth;
mod client;
pub mod correlator;
mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod supervisor;
pub mod transport;

pub use auth::{derive_key, Credentials};
pub use client::RconClient;
pub use error::RconError;
pub use protocol::Tag;
pub use registry::{PushListener, Subscription};
pub use supervisor::ConnectionState;
pub use transport::{Transport, TransportLink, WebSocketTransport};
