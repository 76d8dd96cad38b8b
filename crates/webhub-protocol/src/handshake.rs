//! Opening handshake (RFC 6455 §4.2).
//!
//! The server proves it understood the upgrade by hashing the client's
//! `Sec-WebSocket-Key` together with a fixed GUID.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::codec::ProtocolError;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const WS_VERSION: &str = "13";

/// Compute the `Sec-WebSocket-Accept` value for a client key.
///
/// # Errors
///
/// Returns [`ProtocolError::Handshake`] if the key is empty.
pub fn accept_key(client_key: &str) -> Result<String, ProtocolError> {
    let key = client_key.trim();
    if key.is_empty() {
        return Err(ProtocolError::Handshake("missing Sec-WebSocket-Key"));
    }

    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Whether a `Sec-WebSocket-Version` header value is acceptable. A missing
/// header is tolerated.
#[must_use]
pub fn version_supported(version: Option<&str>) -> bool {
    version.map_or(true, |v| v.trim() == WS_VERSION)
}
