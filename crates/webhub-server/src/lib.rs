//! # webhub-server
//!
//! Exposes things to remote clients over HTTP, server-sent events,
//! long-poll and WebSockets.
//!
//! ## Routes
//!
//! | Path | Methods |
//! |------|---------|
//! | `/things` | `GET` |
//! | `/things/{thing}` | `GET`, WebSocket upgrade |
//! | `/things/{thing}/properties` | `GET`, `PUT`, `POST` |
//! | `/things/{thing}/properties/{name}` | `GET`, `PUT`, `POST` |
//! | `/things/{thing}/actions/{name}` | `POST`, `PUT` |
//! | `/things/{thing}/events` | `GET` (SSE) |
//! | `/things/{thing}/events/{name}` | `GET` (long-poll) |
//!
//! ## Example
//!
//! ```ignore
//! use webhub_server::{Config, Hub, HubOptions};
//!
//! let hub = Hub::new(HubOptions::new(Config::default()))?;
//! let lamp = hub.produce(serde_json::json!({
//!     "name": "lamp",
//!     "properties": {"on": {"type": "boolean", "value": false}}
//! }))?;
//! hub.expose(lamp)?;
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8888").await?;
//! hub.serve(listener).await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod hub;
pub mod metrics;
mod ws;

pub use config::Config;
pub use error::HubError;
pub use hub::{Hub, HubOptions, StaticTokens, TokenValidator};
