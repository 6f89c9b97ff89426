//! JSONAPI RCON Library
//!
//! This library provides a resilient client for the JSONAPI v2 WebSocket
//! protocol:
//!
//! - `rcon` - connection supervisor, command correlation and subscriptions
//! - `config` - client configuration and config file discovery
//! - `models` - typed payloads for common push sources
//!
//! # Usage
//!
//! ```ignore
//! use jsonapi_rcon::{ClientConfig, RconClient};
//!
//! let config = ClientConfig::load(None)?;
//! let client = RconClient::new(config, |push| println!("{}", push))?;
//!
//! let players = client.call("getPlayers", vec![]).await?;
//! client.subscribe("chat", false);
//! ```

pub mod config;
pub mod models;
pub mod rcon;

pub use config::ClientConfig;
pub use rcon::{ConnectionState, Credentials, RconClient, RconError, Tag};
