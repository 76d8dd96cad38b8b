//! # webhub-protocol
//!
//! Wire protocol definitions for the WebHub thing server.
//!
//! This crate holds everything that touches bytes on the wire:
//!
//! - `frames` / `codec` - RFC 6455 frames, three-tier lengths and masking
//! - `reassembly` - joining continuation frames into whole messages
//! - `handshake` - the `Sec-WebSocket-Accept` computation
//! - `messages` - the JSON pushes, requests and replies
//!
//! ## Example
//!
//! ```rust
//! use webhub_protocol::{codec, Frame, Push};
//!
//! let push = Push::property("on", serde_json::json!(true));
//! let frame = Frame::text(push.encode().unwrap());
//!
//! let encoded = codec::encode(&frame);
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod handshake;
pub mod messages;
pub mod reassembly;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use frames::{Frame, OpCode};
pub use handshake::{accept_key, WS_GUID};
pub use messages::{Operation, Push, Reply, Request, RequestError};
pub use reassembly::{Assembler, Message};
