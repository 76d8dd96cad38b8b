//! Updates fanned out to attached channels.
//!
//! An update is serialized once, when it is created, and the encoded bytes
//! are shared by every channel it is delivered to.

use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use webhub_protocol::{ProtocolError, Push};

/// A unique update identifier, used in logs.
pub type UpdateId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique update ID.
#[must_use]
pub fn generate_update_id() -> UpdateId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A change notification ready for delivery.
#[derive(Debug, Clone)]
pub struct Update {
    /// Unique update identifier.
    pub id: UpdateId,
    /// The push as a value.
    pub push: Push,
    /// The push encoded as JSON (cheap to clone).
    json: Bytes,
}

impl Update {
    /// Create an update, serializing the push.
    ///
    /// # Errors
    ///
    /// Returns an error if the push cannot be serialized.
    pub fn new(push: Push) -> Result<Self, ProtocolError> {
        let json = push.encode()?;
        Ok(Self {
            id: generate_update_id(),
            push,
            json,
        })
    }

    /// The encoded push.
    #[must_use]
    pub fn json(&self) -> &Bytes {
        &self.json
    }

    /// Name of the event, if this update is an event push.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match &self.push {
            Push::Event { event, .. } => Some(event),
            _ => None,
        }
    }

    /// Data carried by an event push.
    #[must_use]
    pub fn event_data(&self) -> Option<&Value> {
        match &self.push {
            Push::Event { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_encodes_once() {
        let update = Update::new(Push::property("on", json!(true))).unwrap();
        assert_eq!(&update.json()[..], br#"{"property":"on","data":true}"#);
        assert!(update.event_name().is_none());
    }

    #[test]
    fn test_event_accessors() {
        let update = Update::new(Push::event("overflow", Some(json!(7)))).unwrap();
        assert_eq!(update.event_name(), Some("overflow"));
        assert_eq!(update.event_data(), Some(&json!(7)));
    }

    #[test]
    fn test_unique_update_ids() {
        let a = generate_update_id();
        let b = generate_update_id();
        assert_ne!(a, b);
    }
}
