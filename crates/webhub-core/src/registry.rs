//! Registry of exposed things.
//!
//! The registry is an ordinary value owned by the hub and shared with the
//! request handlers; a thing is reachable by clients only while it is
//! exposed here.

use crate::channel::ChannelKind;
use crate::thing::Thing;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Maximum thing name length.
pub const MAX_THING_NAME_LENGTH: usize = 256;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The name cannot be used in a URL path segment.
    #[error("Invalid thing name: {0}")]
    InvalidName(&'static str),

    /// A thing with this name is already exposed.
    #[error("Thing already exposed: {0}")]
    AlreadyExposed(String),
}

/// Validate a thing name.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_thing_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Thing name cannot be empty");
    }
    if name.len() > MAX_THING_NAME_LENGTH {
        return Err("Thing name too long");
    }
    if name.contains('/') {
        return Err("Thing name cannot contain '/'");
    }
    if name.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err("Thing name contains invalid characters");
    }
    Ok(())
}

/// Things currently exposed to clients, by name.
#[derive(Debug, Default)]
pub struct Registry {
    things: DashMap<String, Arc<Thing>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a thing reachable by clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already taken.
    pub fn expose(&self, thing: Arc<Thing>) -> Result<(), RegistryError> {
        let name = thing.name().to_string();
        validate_thing_name(&name).map_err(RegistryError::InvalidName)?;

        match self.things.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegistryError::AlreadyExposed(name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                thing.reopen();
                slot.insert(thing);
                info!(thing = %name, "Exposed thing");
                Ok(())
            }
        }
    }

    /// Stop exposing a thing and drop every channel attached to it.
    ///
    /// Withdrawing an unknown name does nothing.
    pub fn withdraw(&self, name: &str) -> Option<Arc<Thing>> {
        let (_, thing) = self.things.remove(name)?;
        let closed = thing.close_channels();
        info!(thing = %name, closed, "Withdrew thing");
        Some(thing)
    }

    /// Look up an exposed thing.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Thing>> {
        let thing = self.things.get(name).map(|t| Arc::clone(t.value()));
        if thing.is_none() {
            debug!(thing = %name, "Lookup of unknown thing");
        }
        thing
    }

    /// Check if a thing is exposed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.things.contains_key(name)
    }

    /// Names of all exposed things, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.things.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Description documents of all exposed things, sorted by name.
    #[must_use]
    pub fn descriptions(&self) -> Vec<Value> {
        let mut things: Vec<Arc<Thing>> =
            self.things.iter().map(|e| Arc::clone(e.value())).collect();
        things.sort_by(|a, b| a.name().cmp(b.name()));
        things.iter().map(|t| t.document().clone()).collect()
    }

    /// Number of exposed things.
    #[must_use]
    pub fn len(&self) -> usize {
        self.things.len()
    }

    /// Check if nothing is exposed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            thing_count: self.things.len(),
            ..RegistryStats::default()
        };
        for entry in self.things.iter() {
            let thing = entry.value();
            stats.event_streams += thing.channel_count(ChannelKind::EventStream);
            stats.websockets += thing.channel_count(ChannelKind::WebSocket);
            stats.long_polls += thing.channel_count(ChannelKind::LongPoll);
        }
        stats
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of exposed things.
    pub thing_count: usize,
    /// Attached SSE streams.
    pub event_streams: usize,
    /// Attached WebSocket connections.
    pub websockets: usize,
    /// Pending long-poll waiters.
    pub long_polls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn thing(name: &str) -> Arc<Thing> {
        let doc = json!({
            "name": name,
            "properties": {"on": {"type": "boolean", "value": true}},
            "events": {"done": null}
        });
        Arc::new(Thing::from_document(doc).unwrap())
    }

    #[test]
    fn test_expose_and_get() {
        let registry = Registry::new();
        registry.expose(thing("lamp")).unwrap();
        registry.expose(thing("fan")).unwrap();

        assert!(registry.contains("lamp"));
        assert_eq!(registry.get("lamp").unwrap().name(), "lamp");
        assert!(registry.get("door").is_none());
        assert_eq!(registry.names(), vec!["fan".to_string(), "lamp".to_string()]);
        assert_eq!(registry.descriptions()[0]["name"], json!("fan"));
    }

    #[test]
    fn test_expose_duplicate() {
        let registry = Registry::new();
        registry.expose(thing("lamp")).unwrap();
        assert!(matches!(
            registry.expose(thing("lamp")),
            Err(RegistryError::AlreadyExposed(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_thing_name_validation() {
        assert!(validate_thing_name("lamp-1").is_ok());
        assert!(validate_thing_name("").is_err());
        assert!(validate_thing_name("a/b").is_err());
        assert!(validate_thing_name("a b").is_err());
        assert!(validate_thing_name(&"a".repeat(MAX_THING_NAME_LENGTH + 1)).is_err());
    }

    #[tokio::test]
    async fn test_withdraw_drops_channels() {
        let registry = Registry::new();
        let lamp = thing("lamp");
        registry.expose(Arc::clone(&lamp)).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let _stream = lamp.attach(Channel::EventStream(tx)).unwrap();
        let (_wait, waiter) = lamp.wait_for("done").unwrap();
        assert_eq!(
            registry.stats(),
            RegistryStats {
                thing_count: 1,
                event_streams: 1,
                websockets: 0,
                long_polls: 1
            }
        );

        assert!(registry.withdraw("lamp").is_some());
        assert!(registry.withdraw("lamp").is_none());
        assert!(registry.is_empty());

        rx.recv().await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(waiter.await.is_err());

        let (tx, _rx) = mpsc::channel(8);
        assert!(lamp.attach(Channel::EventStream(tx)).is_err());

        registry.expose(Arc::clone(&lamp)).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        assert!(lamp.attach(Channel::EventStream(tx)).is_ok());
    }
}
