//! # webhub-transport
//!
//! WebSocket connections for the WebHub server, spoken directly on the
//! byte stream that an HTTP upgrade hands over.
//!
//! ```rust,ignore
//! use webhub_transport::websocket::{split, WebSocketConfig};
//!
//! let (mut reader, writer, outbound) = split(upgraded, &WebSocketConfig::default());
//! tokio::spawn(writer.run());
//! while let Some(message) = reader.next_message().await? {
//!     // route the message, reply through `outbound`
//! }
//! ```

pub mod connection;
pub mod websocket;

pub use connection::{ConnectionId, TransportError};
pub use websocket::{split, WebSocketConfig, WebSocketReader, WebSocketWriter};
