//! JSON messages carried over the hub's transports.
//!
//! Pushes travel from the hub to clients over SSE and WebSocket. Requests
//! and replies are only exchanged on WebSocket connections, where the
//! client-chosen `id` correlates a reply with its request.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codec::ProtocolError;

/// Status used when a WebSocket message cannot be parsed at all.
pub const MALFORMED_STATUS: u16 = 444;

/// Correlation id used when the request did not carry a usable one.
pub const UNKNOWN_ID: &str = "unknown";

/// A change notification pushed to attached clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Push {
    /// A single property changed.
    Property {
        property: String,
        #[serde(default)]
        data: Value,
    },
    /// Several properties at once, also used to sync a new client.
    State { state: Map<String, Value> },
    /// A named event fired.
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl Push {
    /// Create a property push.
    #[must_use]
    pub fn property(name: impl Into<String>, data: Value) -> Self {
        Push::Property {
            property: name.into(),
            data,
        }
    }

    /// Create a state push.
    #[must_use]
    pub fn state(state: Map<String, Value>) -> Self {
        Push::State { state }
    }

    /// Create an event push.
    #[must_use]
    pub fn event(name: impl Into<String>, data: Option<Value>) -> Self {
        Push::Event {
            event: name.into(),
            data,
        }
    }

    /// Serialize to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(serde_json::to_vec(self)?.into())
    }
}

/// What a WebSocket client asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Write one property.
    WriteProperty { name: String, value: Value },
    /// Write several properties, all or nothing.
    WriteState(Map<String, Value>),
    /// Invoke an action. `None` means the request carried no input.
    Invoke { name: String, input: Option<Value> },
}

/// A decoded WebSocket request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id echoed on the reply.
    pub id: String,
    /// Requested operation.
    pub operation: Operation,
}

/// Why a WebSocket message could not be turned into a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    /// Not a JSON object with the expected field types.
    #[error("badly formed client message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Well-formed JSON naming no known operation.
    #[error("bad request")]
    Unrecognized {
        /// Correlation id of the rejected message.
        id: String,
    },
}

impl RequestError {
    /// Correlation id to use on the error reply.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            RequestError::Malformed(_) => UNKNOWN_ID,
            RequestError::Unrecognized { id } => id,
        }
    }

    /// Status to use on the error reply.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            RequestError::Malformed(_) => MALFORMED_STATUS,
            RequestError::Unrecognized { .. } => 400,
        }
    }

    /// Error reply for this failure.
    #[must_use]
    pub fn reply(&self) -> Reply {
        let description = match self {
            RequestError::Malformed(_) => "badly formed client message",
            RequestError::Unrecognized { .. } => "bad request",
        };
        Reply::error(self.id(), self.status(), description)
    }
}

/// Distinguishes `"field": null` (Some(Null)) from a missing field (None).
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct RawRequest {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    property: Option<String>,
    #[serde(default, deserialize_with = "present")]
    data: Option<Value>,
    #[serde(default)]
    state: Option<Map<String, Value>>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default, deserialize_with = "present")]
    input: Option<Value>,
}

impl Request {
    /// Decode one complete WebSocket text message.
    ///
    /// Field precedence is `property`, then `state`, then `action`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Malformed`] for unparseable input and
    /// [`RequestError::Unrecognized`] when no operation is named.
    pub fn decode(text: &str) -> Result<Self, RequestError> {
        let raw: RawRequest = serde_json::from_str(text)?;

        let id = match raw.id {
            Some(Value::String(id)) => id,
            _ => UNKNOWN_ID.to_string(),
        };

        let operation = match (raw.property, raw.state, raw.action) {
            (Some(name), _, _) if !name.is_empty() => Operation::WriteProperty {
                name,
                value: raw.data.unwrap_or(Value::Null),
            },
            (_, Some(state), _) => Operation::WriteState(state),
            (_, _, Some(name)) => Operation::Invoke {
                name,
                input: raw.input,
            },
            _ => return Err(RequestError::Unrecognized { id }),
        };

        Ok(Request { id, operation })
    }
}

/// Reply to a WebSocket request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Correlation id of the request.
    pub id: String,
    /// HTTP-style status code.
    pub status: u16,
    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Action output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl Reply {
    /// Success with nothing to return.
    #[must_use]
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: 200,
            description: None,
            output: None,
        }
    }

    /// Success carrying an optional action output.
    #[must_use]
    pub fn output(id: impl Into<String>, output: Option<Value>) -> Self {
        Self {
            output,
            ..Self::ok(id)
        }
    }

    /// Failure.
    #[must_use]
    pub fn error(id: impl Into<String>, status: u16, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            description: Some(description.into()),
            output: None,
        }
    }

    /// Serialize to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(serde_json::to_vec(self)?.into())
    }
}
