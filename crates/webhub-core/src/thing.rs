//! Thing runtime.
//!
//! A [`Thing`] owns the current property values and the channels attached
//! to it. All mutation goes through one mutex per thing: a write is
//! validated, stored and fanned out before the lock is released, so every
//! channel sees changes in the order they were made. Application handlers
//! run outside the lock.

use crate::channel::{next_channel_id, Channel, ChannelId, ChannelKind, Subscribers};
use crate::description::{DescriptionError, PropertyDescription, ThingDescription};
use crate::handler::{ActionHandler, WriteHandler};
use crate::message::Update;
use crate::schema::invalid;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use webhub_protocol::{ProtocolError, Push};

/// Errors raised by thing operations.
#[derive(Debug, Error)]
pub enum ThingError {
    /// No property with this name.
    #[error("unknown property: {0}")]
    UnknownProperty(String),

    /// No action with this name.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// No event with this name.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The property is not writable by clients.
    #[error("read-only: {0}")]
    ReadOnly(String),

    /// A value failed its constraint.
    #[error("{0}")]
    Validation(String),

    /// The application handler reported a failure.
    #[error("action failed: {reason}")]
    ActionFailed { name: String, reason: String },

    /// The thing was withdrawn; no channel can attach to it.
    #[error("thing withdrawn: {0}")]
    Withdrawn(String),

    /// The change could not be serialized.
    #[error("encoding failed: {0}")]
    Encoding(#[from] ProtocolError),
}

impl ThingError {
    /// Status code reported to HTTP and WebSocket clients.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            ThingError::UnknownProperty(_)
            | ThingError::UnknownAction(_)
            | ThingError::UnknownEvent(_)
            | ThingError::Withdrawn(_) => 404,
            ThingError::ReadOnly(_) => 405,
            ThingError::Validation(_) => 400,
            ThingError::ActionFailed { .. } | ThingError::Encoding(_) => 500,
        }
    }
}

#[derive(Default)]
struct ThingState {
    /// Current values; properties that were never set are absent.
    values: BTreeMap<String, Value>,
    subscribers: Subscribers,
    write_handlers: HashMap<String, WriteHandler>,
    action_handlers: HashMap<String, Arc<dyn ActionHandler>>,
    /// Set by [`Thing::close_channels`] until the thing is exposed again.
    closed: bool,
}

/// A produced thing: description, current values and attached channels.
pub struct Thing {
    description: ThingDescription,
    state: Mutex<ThingState>,
}

impl Thing {
    /// Produce a thing from a parsed description, seeding initial values.
    #[must_use]
    pub fn new(description: ThingDescription) -> Self {
        let mut state = ThingState::default();
        for (name, property) in &description.properties {
            if let Some(value) = description.initial_value(property) {
                state.values.insert(name.clone(), value);
            }
        }
        debug!(
            thing = %description.name,
            properties = description.properties.len(),
            "Produced thing"
        );
        Self {
            description,
            state: Mutex::new(state),
        }
    }

    /// Produce a thing from a description document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid description.
    pub fn from_document(document: Value) -> Result<Self, DescriptionError> {
        Ok(Self::new(ThingDescription::parse(document)?))
    }

    /// The thing's name, used in URLs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.description.name
    }

    /// The parsed description.
    #[must_use]
    pub fn description(&self) -> &ThingDescription {
        &self.description
    }

    /// The description document as supplied.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.description.document
    }

    /// Read one property. A property that was never set reads as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`ThingError::UnknownProperty`] if there is no such property.
    pub fn read(&self, name: &str) -> Result<Value, ThingError> {
        self.property(name)?;
        Ok(self
            .state
            .lock()
            .values
            .get(name)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Current value of every property that has one.
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        self.state
            .lock()
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Write a property on behalf of a client.
    ///
    /// Checks that the property exists, is writable and that the value is
    /// valid, then stores it, notifies every channel and finally calls the
    /// application's write handler.
    ///
    /// # Errors
    ///
    /// Returns the first failed check; the stored value is left untouched.
    pub fn write(&self, name: &str, value: Value) -> Result<(), ThingError> {
        let property = self.property(name)?;
        if !property.is_writable() {
            return Err(ThingError::ReadOnly(name.to_string()));
        }
        self.check_property(name, property, &value)?;

        let handler = self.store(name, value.clone())?;
        if let Some(handler) = handler {
            handler(&value);
        }
        Ok(())
    }

    /// Write several properties on behalf of a client, all or nothing.
    ///
    /// Every entry is checked before anything is stored; the change is then
    /// announced with one state push.
    ///
    /// # Errors
    ///
    /// Returns the error of the first entry that fails a check.
    pub fn write_all(&self, values: Map<String, Value>) -> Result<(), ThingError> {
        for (name, value) in &values {
            let property = self.property(name)?;
            if !property.is_writable() {
                return Err(ThingError::ReadOnly(name.clone()));
            }
            self.check_property(name, property, value)?;
        }

        let update = Update::new(Push::state(values.clone()))?;
        let handlers: Vec<(WriteHandler, Value)> = {
            let mut state = self.state.lock();
            for (name, value) in &values {
                state.values.insert(name.clone(), value.clone());
            }
            let reached = state.subscribers.broadcast(&update);
            debug!(
                thing = %self.name(),
                count = values.len(),
                recipients = reached,
                "Properties written"
            );
            values
                .iter()
                .filter_map(|(name, value)| {
                    state
                        .write_handlers
                        .get(name)
                        .map(|h| (Arc::clone(h), value.clone()))
                })
                .collect()
        };

        for (handler, value) in handlers {
            handler(&value);
        }
        Ok(())
    }

    /// Write a property on behalf of the application.
    ///
    /// Unlike [`Thing::write`] this ignores the writable flag and does not
    /// call the write handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is unknown or the value invalid.
    pub fn update(&self, name: &str, value: Value) -> Result<(), ThingError> {
        let property = self.property(name)?;
        self.check_property(name, property, &value)?;
        self.store(name, value)?;
        Ok(())
    }

    /// Invoke an action.
    ///
    /// The input is validated against the action's input constraint, if
    /// declared. Without a handler the action succeeds with no output.
    ///
    /// # Errors
    ///
    /// Returns [`ThingError::UnknownAction`], [`ThingError::Validation`] for
    /// bad input or output, or [`ThingError::ActionFailed`] if the handler
    /// fails.
    pub async fn invoke(
        &self,
        name: &str,
        input: Option<Value>,
    ) -> Result<Option<Value>, ThingError> {
        let action = self
            .description
            .actions
            .get(name)
            .ok_or_else(|| ThingError::UnknownAction(name.to_string()))?;

        if let Some(constraint) = &action.input {
            if invalid(input.as_ref(), Some(constraint), &self.description.types) {
                return Err(ThingError::Validation(format!("invalid input for action {name}")));
            }
        }

        let handler = self.state.lock().action_handlers.get(name).cloned();
        let Some(handler) = handler else {
            debug!(thing = %self.name(), action = %name, "Action has no handler");
            return Ok(None);
        };

        let output = handler.invoke(input).await.map_err(|e| {
            warn!(thing = %self.name(), action = %name, error = %e, "Action handler failed");
            ThingError::ActionFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;

        if let Some(constraint) = &action.output {
            if invalid(output.as_ref(), Some(constraint), &self.description.types) {
                warn!(thing = %self.name(), action = %name, "Action returned invalid output");
                return Err(ThingError::Validation(format!("invalid output for action {name}")));
            }
        }
        Ok(output)
    }

    /// Emit an event to every streaming channel and to the long-poll
    /// waiters registered for it.
    ///
    /// Returns the number of channels reached.
    ///
    /// # Errors
    ///
    /// Returns [`ThingError::UnknownEvent`] or [`ThingError::Validation`].
    pub fn emit(&self, name: &str, data: Option<Value>) -> Result<usize, ThingError> {
        let constraint = self
            .description
            .events
            .get(name)
            .ok_or_else(|| ThingError::UnknownEvent(name.to_string()))?;

        if let Some(constraint) = constraint {
            if invalid(data.as_ref(), Some(constraint), &self.description.types) {
                return Err(ThingError::Validation(format!("invalid data for event {name}")));
            }
        }

        let update = Update::new(Push::event(name, data))?;
        let reached = self.state.lock().subscribers.broadcast(&update);
        debug!(thing = %self.name(), event = %name, recipients = reached, "Event emitted");
        Ok(reached)
    }

    /// Register the handler run when clients invoke an action.
    ///
    /// # Errors
    ///
    /// Returns [`ThingError::UnknownAction`] if there is no such action.
    pub fn set_action_handler<H: ActionHandler>(
        &self,
        name: &str,
        handler: H,
    ) -> Result<(), ThingError> {
        if !self.description.actions.contains_key(name) {
            return Err(ThingError::UnknownAction(name.to_string()));
        }
        self.state
            .lock()
            .action_handlers
            .insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Register a callback run after a client writes a property.
    ///
    /// # Errors
    ///
    /// Returns [`ThingError::UnknownProperty`] if there is no such property.
    pub fn set_write_handler<F>(&self, name: &str, handler: F) -> Result<(), ThingError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.property(name)?;
        self.state
            .lock()
            .write_handlers
            .insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Attach a streaming channel. It first receives a state push with the
    /// current values, then every later change.
    ///
    /// The channel stays attached until the returned guard is dropped or a
    /// delivery to it fails.
    ///
    /// # Errors
    ///
    /// Returns [`ThingError::Withdrawn`] once the thing's channels were
    /// closed (the channel is dropped, ending its transport), or an error if
    /// the state push cannot be serialized.
    pub fn attach(self: &Arc<Self>, mut channel: Channel) -> Result<Attachment, ThingError> {
        let id = next_channel_id();
        let kind = channel.kind();
        {
            let mut state = self.state.lock();
            if state.closed {
                debug!(thing = %self.name(), kind = %kind, "Attach to withdrawn thing");
                return Err(ThingError::Withdrawn(self.name().to_string()));
            }
            if kind != ChannelKind::LongPoll {
                let values = state.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let sync = Update::new(Push::state(values))?;
                if !channel.deliver(&sync).keeps_channel() {
                    debug!(thing = %self.name(), kind = %kind, "Channel closed before attach");
                    return Ok(Attachment::new(Arc::clone(self), id));
                }
            }
            state.subscribers.attach(id, channel);
        }
        debug!(thing = %self.name(), channel = id, kind = %kind, "Attached");
        Ok(Attachment::new(Arc::clone(self), id))
    }

    /// Register a long-poll waiter for the next emission of an event.
    ///
    /// The receiver yields the event data, or fails if the waiter is
    /// dropped (guard dropped or thing withdrawn).
    ///
    /// # Errors
    ///
    /// Returns [`ThingError::UnknownEvent`] if there is no such event.
    pub fn wait_for(
        self: &Arc<Self>,
        event: &str,
    ) -> Result<(Attachment, oneshot::Receiver<Option<Value>>), ThingError> {
        if !self.description.events.contains_key(event) {
            return Err(ThingError::UnknownEvent(event.to_string()));
        }
        let (channel, rx) = Channel::long_poll(event);
        let attachment = self.attach(channel)?;
        Ok((attachment, rx))
    }

    /// Detach a channel.
    pub fn detach(&self, id: ChannelId) -> bool {
        self.state.lock().subscribers.detach(id)
    }

    /// Drop every attached channel and refuse new ones until
    /// [`Thing::reopen`].
    pub fn close_channels(&self) -> usize {
        let closed = {
            let mut state = self.state.lock();
            state.closed = true;
            state.subscribers.clear()
        };
        debug!(thing = %self.name(), closed, "Closed channels");
        closed
    }

    /// Accept channels again after [`Thing::close_channels`].
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    /// Number of attached channels of a kind.
    #[must_use]
    pub fn channel_count(&self, kind: ChannelKind) -> usize {
        self.state.lock().subscribers.count(kind)
    }

    fn property(&self, name: &str) -> Result<&PropertyDescription, ThingError> {
        self.description
            .properties
            .get(name)
            .ok_or_else(|| ThingError::UnknownProperty(name.to_string()))
    }

    fn check_property(
        &self,
        name: &str,
        property: &PropertyDescription,
        value: &Value,
    ) -> Result<(), ThingError> {
        if invalid(Some(value), Some(&property.constraint), &self.description.types) {
            debug!(thing = %self.name(), property = %name, "Rejected invalid value");
            return Err(ThingError::Validation(format!("invalid data for property {name}")));
        }
        Ok(())
    }

    /// Store a checked value and fan it out; returns the write handler.
    fn store(&self, name: &str, value: Value) -> Result<Option<WriteHandler>, ThingError> {
        let update = Update::new(Push::property(name, value.clone()))?;
        let mut state = self.state.lock();
        state.values.insert(name.to_string(), value);
        let reached = state.subscribers.broadcast(&update);
        debug!(thing = %self.name(), property = %name, recipients = reached, "Property written");
        Ok(state.write_handlers.get(name).cloned())
    }
}

impl fmt::Debug for Thing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thing")
            .field("name", &self.description.name)
            .field("channels", &self.state.lock().subscribers.len())
            .finish()
    }
}

/// Keeps a channel attached to a thing; detaches it on drop.
#[derive(Debug)]
pub struct Attachment {
    thing: Arc<Thing>,
    id: ChannelId,
}

impl Attachment {
    fn new(thing: Arc<Thing>, id: ChannelId) -> Self {
        Self { thing, id }
    }

    /// The attached channel's ID.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The thing the channel is attached to.
    #[must_use]
    pub fn thing(&self) -> &Arc<Thing> {
        &self.thing
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.thing.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn lamp() -> Arc<Thing> {
        let doc = json!({
            "name": "lamp",
            "properties": {
                "on": {"type": "boolean", "value": false},
                "level": {"type": "integer", "minimum": 0, "maximum": 100},
                "serial": {"type": "string", "writable": false, "value": "A-1"}
            },
            "actions": {
                "blink": {"input": {"type": "integer", "minimum": 1}, "output": {"type": "string"}},
                "reset": {}
            },
            "events": {
                "overheat": {"type": "number"},
                "ping": null
            }
        });
        Arc::new(Thing::from_document(doc).unwrap())
    }

    fn sse(thing: &Arc<Thing>) -> (Attachment, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(64);
        (thing.attach(Channel::EventStream(tx)).unwrap(), rx)
    }

    fn json_of(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_initial_values_and_reads() {
        let thing = lamp();
        assert_eq!(thing.read("on").unwrap(), json!(false));
        assert_eq!(thing.read("level").unwrap(), Value::Null);
        assert!(matches!(thing.read("nope"), Err(ThingError::UnknownProperty(_))));

        let snapshot = thing.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["serial"], json!("A-1"));
    }

    #[test]
    fn test_write_checks() {
        let thing = lamp();
        assert_eq!(thing.write("missing", json!(1)).unwrap_err().status(), 404);
        assert_eq!(thing.write("serial", json!("B-2")).unwrap_err().status(), 405);
        assert_eq!(thing.write("level", json!(101)).unwrap_err().status(), 400);
        assert_eq!(thing.write("level", json!(2.5)).unwrap_err().status(), 400);
        assert_eq!(thing.read("level").unwrap(), Value::Null);

        thing.write("level", json!(40)).unwrap();
        assert_eq!(thing.read("level").unwrap(), json!(40));
    }

    #[tokio::test]
    async fn test_attach_syncs_then_streams() {
        let thing = lamp();
        let (_guard, mut rx) = sse(&thing);

        let first = json_of(&rx.recv().await.unwrap());
        assert_eq!(first, json!({"state": {"on": false, "serial": "A-1"}}));

        thing.write("on", json!(true)).unwrap();
        assert_eq!(
            json_of(&rx.recv().await.unwrap()),
            json!({"property": "on", "data": true})
        );
    }

    #[tokio::test]
    async fn test_failed_write_sends_nothing() {
        let thing = lamp();
        let (_guard, mut rx) = sse(&thing);
        rx.recv().await.unwrap();

        assert!(thing.write("level", json!(-1)).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_all_is_atomic() {
        let thing = lamp();
        let (_guard, mut rx) = sse(&thing);
        rx.recv().await.unwrap();

        let mut bad = Map::new();
        bad.insert("on".into(), json!(true));
        bad.insert("level".into(), json!(500));
        assert_eq!(thing.write_all(bad).unwrap_err().status(), 400);
        assert_eq!(thing.read("on").unwrap(), json!(false));
        assert!(rx.try_recv().is_err());

        let mut good = Map::new();
        good.insert("on".into(), json!(true));
        good.insert("level".into(), json!(5));
        thing.write_all(good).unwrap();
        assert_eq!(thing.read("level").unwrap(), json!(5));
        assert_eq!(
            json_of(&rx.recv().await.unwrap()),
            json!({"state": {"on": true, "level": 5}})
        );
    }

    #[test]
    fn test_write_all_read_only() {
        let thing = lamp();
        let mut values = Map::new();
        values.insert("serial".into(), json!("X"));
        assert_eq!(thing.write_all(values).unwrap_err().status(), 405);
    }

    #[test]
    fn test_write_handler_only_for_client_writes() {
        let thing = lamp();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        thing
            .set_write_handler("on", move |v| {
                assert_eq!(v, &json!(true));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        thing.write("on", json!(true)).unwrap();
        thing.update("on", json!(true)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(thing.set_write_handler("nope", |_| {}).is_err());
    }

    #[test]
    fn test_update_bypasses_writable() {
        let thing = lamp();
        thing.update("serial", json!("B-2")).unwrap();
        assert_eq!(thing.read("serial").unwrap(), json!("B-2"));
        assert_eq!(thing.update("serial", json!(3)).unwrap_err().status(), 400);
    }

    #[tokio::test]
    async fn test_invoke_without_handler() {
        let thing = lamp();
        assert_eq!(thing.invoke("reset", None).await.unwrap(), None);
        assert_eq!(thing.invoke("nope", None).await.unwrap_err().status(), 404);
        assert_eq!(thing.invoke("blink", Some(json!(0))).await.unwrap_err().status(), 400);
        assert_eq!(thing.invoke("blink", None).await.unwrap_err().status(), 400);
    }

    #[tokio::test]
    async fn test_invoke_with_handler() {
        let thing = lamp();
        thing
            .set_action_handler("blink", |input: Option<Value>| async move {
                let times = input.and_then(|v| v.as_u64()).unwrap_or(0);
                Ok::<_, HandlerError>(Some(json!(format!("blinked {times}"))))
            })
            .unwrap();

        let output = thing.invoke("blink", Some(json!(3))).await.unwrap();
        assert_eq!(output, Some(json!("blinked 3")));
    }

    #[tokio::test]
    async fn test_invoke_handler_failure_and_bad_output() {
        let thing = lamp();
        thing
            .set_action_handler("reset", |_input: Option<Value>| async move {
                Err::<Option<Value>, HandlerError>("stuck".into())
            })
            .unwrap();
        let err = thing.invoke("reset", None).await.unwrap_err();
        assert_eq!(err.status(), 500);
        assert_eq!(err.to_string(), "action failed: stuck");

        thing
            .set_action_handler("blink", |_input: Option<Value>| async move {
                Ok::<_, HandlerError>(Some(json!(42)))
            })
            .unwrap();
        let err = thing.invoke("blink", Some(json!(1))).await.unwrap_err();
        assert_eq!(err.status(), 400);

        assert!(thing
            .set_action_handler("nope", |_input: Option<Value>| async move {
                Ok::<_, HandlerError>(None)
            })
            .is_err());
    }

    #[tokio::test]
    async fn test_emit_reaches_streams_and_waiters() {
        let thing = lamp();
        let (_guard, mut rx) = sse(&thing);
        rx.recv().await.unwrap();

        let (_first_guard, first) = thing.wait_for("overheat").unwrap();
        let (_second_guard, second) = thing.wait_for("overheat").unwrap();
        let (_other_guard, mut other) = thing.wait_for("ping").unwrap();
        assert_eq!(thing.channel_count(ChannelKind::LongPoll), 3);

        assert_eq!(thing.emit("overheat", Some(json!(91.5))).unwrap(), 3);
        assert_eq!(first.await.unwrap(), Some(json!(91.5)));
        assert_eq!(second.await.unwrap(), Some(json!(91.5)));
        assert!(other.try_recv().is_err());
        assert_eq!(thing.channel_count(ChannelKind::LongPoll), 1);

        assert_eq!(
            json_of(&rx.recv().await.unwrap()),
            json!({"event": "overheat", "data": 91.5})
        );
    }

    #[tokio::test]
    async fn test_emissions_reach_every_stream_in_order() {
        let thing = lamp();
        let (_first_guard, mut first) = sse(&thing);
        let (_second_guard, mut second) = sse(&thing);
        first.recv().await.unwrap();
        second.recv().await.unwrap();

        assert_eq!(thing.emit("overheat", Some(json!(80))).unwrap(), 2);
        assert_eq!(thing.emit("overheat", Some(json!(95))).unwrap(), 2);

        let seen_first = vec![first.recv().await.unwrap(), first.recv().await.unwrap()];
        let seen_second = vec![second.recv().await.unwrap(), second.recv().await.unwrap()];
        assert_eq!(seen_first, seen_second);
        assert_eq!(
            seen_first.iter().map(json_of).collect::<Vec<_>>(),
            vec![
                json!({"event": "overheat", "data": 80}),
                json!({"event": "overheat", "data": 95}),
            ]
        );
    }

    #[test]
    fn test_emit_checks() {
        let thing = lamp();
        assert_eq!(thing.emit("nope", None).unwrap_err().status(), 404);
        assert_eq!(thing.emit("overheat", Some(json!("hot"))).unwrap_err().status(), 400);
        assert_eq!(thing.emit("ping", None).unwrap(), 0);
        assert!(matches!(thing.wait_for("nope"), Err(ThingError::UnknownEvent(_))));
    }

    #[test]
    fn test_guard_detaches() {
        let thing = lamp();
        let (guard, _rx) = sse(&thing);
        assert_eq!(thing.channel_count(ChannelKind::EventStream), 1);
        drop(guard);
        assert_eq!(thing.channel_count(ChannelKind::EventStream), 0);
    }

    #[tokio::test]
    async fn test_close_channels_ends_transports() {
        let thing = lamp();
        let (_guard, mut rx) = sse(&thing);
        let (_wait_guard, waiter) = thing.wait_for("ping").unwrap();
        rx.recv().await.unwrap();

        assert_eq!(thing.close_channels(), 2);
        assert!(rx.recv().await.is_none());
        assert!(waiter.await.is_err());
    }

    #[tokio::test]
    async fn test_attach_after_close_fails() {
        let thing = lamp();
        thing.close_channels();

        let (tx, mut rx) = mpsc::channel(4);
        let err = thing.attach(Channel::EventStream(tx)).unwrap_err();
        assert!(matches!(err, ThingError::Withdrawn(_)));
        assert_eq!(err.status(), 404);
        assert!(rx.recv().await.is_none());
        assert!(thing.wait_for("ping").is_err());
        assert_eq!(thing.channel_count(ChannelKind::EventStream), 0);

        thing.reopen();
        let (_guard, mut rx) = sse(&thing);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_writes_keep_order_per_channel() {
        let thing = lamp();
        let (_guard, mut rx) = sse(&thing);
        rx.recv().await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..4 {
            let thing = Arc::clone(&thing);
            tasks.push(tokio::spawn(async move {
                for j in 0..10 {
                    thing.write("level", json!(i * 10 + j)).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut last = None;
        while let Ok(bytes) = rx.try_recv() {
            last = Some(json_of(&bytes)["data"].clone());
        }
        assert_eq!(last, Some(thing.read("level").unwrap()));
    }
}
