//! Delivery channels.
//!
//! A thing keeps one sending handle per attached client. The transport
//! (SSE body, WebSocket connection, pending long-poll response) owns the
//! receiving end, so dropping a channel from the thing ends the transport
//! and ending the transport makes the next delivery fail.

use crate::message::Update;
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};
use webhub_protocol::Frame;

/// Default queue capacity for streaming channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A channel identifier, unique for the process lifetime.
pub type ChannelId = u64;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a channel ID.
#[must_use]
pub fn next_channel_id() -> ChannelId {
    NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)
}

/// The kinds of delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    EventStream,
    WebSocket,
    LongPoll,
}

impl ChannelKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::EventStream => "sse",
            ChannelKind::WebSocket => "websocket",
            ChannelKind::LongPoll => "longpoll",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of delivering one update to one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the client; the channel stays attached.
    Sent,
    /// Not addressed to this channel; it stays attached.
    Skipped,
    /// One-shot channel resolved; remove it.
    Finished,
    /// The transport is gone or cannot keep up; remove it.
    Failed,
}

impl Delivery {
    /// Whether the channel stays attached after this delivery.
    #[must_use]
    pub fn keeps_channel(self) -> bool {
        matches!(self, Delivery::Sent | Delivery::Skipped)
    }
}

/// A sending handle to one attached client.
#[derive(Debug)]
pub enum Channel {
    /// Server-sent event stream: each update becomes one `data:` event.
    EventStream(mpsc::Sender<Bytes>),
    /// WebSocket connection: each update becomes one text frame.
    WebSocket(mpsc::Sender<Frame>),
    /// Long-poll waiter for one event, resolved by its next emission.
    LongPoll {
        event: String,
        waiter: Option<oneshot::Sender<Option<Value>>>,
    },
}

impl Channel {
    /// Create a long-poll waiter and the receiver its response waits on.
    #[must_use]
    pub fn long_poll(event: impl Into<String>) -> (Self, oneshot::Receiver<Option<Value>>) {
        let (tx, rx) = oneshot::channel();
        let channel = Channel::LongPoll {
            event: event.into(),
            waiter: Some(tx),
        };
        (channel, rx)
    }

    /// The kind of this channel.
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::EventStream(_) => ChannelKind::EventStream,
            Channel::WebSocket(_) => ChannelKind::WebSocket,
            Channel::LongPoll { .. } => ChannelKind::LongPoll,
        }
    }

    /// Deliver an update without blocking.
    ///
    /// Streaming channels get every update. A long-poll waiter only reacts
    /// to an event push with its event name and is consumed by it.
    pub fn deliver(&mut self, update: &Update) -> Delivery {
        match self {
            Channel::EventStream(tx) => match tx.try_send(update.json().clone()) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Failed,
            },
            Channel::WebSocket(tx) => match tx.try_send(Frame::text(update.json().clone())) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Failed,
            },
            Channel::LongPoll { event, waiter } => {
                if update.event_name() != Some(event.as_str()) {
                    return Delivery::Skipped;
                }
                match waiter.take() {
                    Some(tx) => match tx.send(update.event_data().cloned()) {
                        Ok(()) => Delivery::Finished,
                        Err(_) => Delivery::Failed,
                    },
                    None => Delivery::Failed,
                }
            }
        }
    }
}

/// The set of channels attached to one thing, in attachment order.
#[derive(Debug, Default)]
pub struct Subscribers {
    channels: Vec<(ChannelId, Channel)>,
}

impl Subscribers {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a channel.
    pub fn attach(&mut self, id: ChannelId, channel: Channel) {
        debug!(channel = id, kind = %channel.kind(), "Channel attached");
        self.channels.push((id, channel));
    }

    /// Detach a channel.
    ///
    /// Returns `true` if it was attached.
    pub fn detach(&mut self, id: ChannelId) -> bool {
        let before = self.channels.len();
        self.channels.retain(|(cid, _)| *cid != id);
        let removed = self.channels.len() != before;
        if removed {
            debug!(channel = id, "Channel detached");
        }
        removed
    }

    /// Deliver an update to every channel, dropping the ones that failed or
    /// finished.
    ///
    /// Returns the number of channels the update reached.
    pub fn broadcast(&mut self, update: &Update) -> usize {
        let mut reached = 0;
        self.channels.retain_mut(|(id, channel)| {
            let outcome = channel.deliver(update);
            match outcome {
                Delivery::Sent | Delivery::Finished => reached += 1,
                Delivery::Failed => {
                    debug!(channel = *id, kind = %channel.kind(), "Dropping failed channel");
                }
                Delivery::Skipped => {}
            }
            outcome.keeps_channel()
        });
        trace!(update = update.id, recipients = reached, "Broadcast update");
        reached
    }

    /// Drop every channel, ending their transports.
    pub fn clear(&mut self) -> usize {
        let count = self.channels.len();
        self.channels.clear();
        count
    }

    /// Number of attached channels of a kind.
    #[must_use]
    pub fn count(&self, kind: ChannelKind) -> usize {
        self.channels.iter().filter(|(_, c)| c.kind() == kind).count()
    }

    /// Number of attached channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
