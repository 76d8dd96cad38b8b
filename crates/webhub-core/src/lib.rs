//! # webhub-core
//!
//! Thing model and runtime for the WebHub server.
//!
//! - **Schema** - Validation of JSON values against type constraints
//! - **Description** - Parsed thing descriptions
//! - **Thing** - Property values, actions, events and attached channels
//! - **Channel** - SSE, WebSocket and long-poll delivery handles
//! - **Registry** - Things exposed to clients
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Registry   │────▶│    Thing    │────▶│  Channels   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │   Schema    │
//!                     └─────────────┘
//! ```

pub mod channel;
pub mod description;
pub mod handler;
pub mod message;
pub mod registry;
pub mod schema;
pub mod thing;

pub use channel::{Channel, ChannelId, ChannelKind, Delivery, Subscribers, DEFAULT_CHANNEL_CAPACITY};
pub use description::{ActionDescription, DescriptionError, PropertyDescription, ThingDescription};
pub use handler::{ActionHandler, ActionResult, HandlerError, WriteHandler};
pub use message::Update;
pub use registry::{Registry, RegistryError, RegistryStats};
pub use schema::{invalid, Constraint, TypeRegistry, ValueType};
pub use thing::{Attachment, Thing, ThingError};
