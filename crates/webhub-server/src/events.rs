//! Event delivery over server-sent events and long-poll.

use crate::error::HubError;
use crate::hub::Hub;
use crate::metrics::ChannelMetricsGuard;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::debug;
use webhub_core::{Channel, ChannelKind, DEFAULT_CHANNEL_CAPACITY};

/// `GET /things/{thing}/events`: every update of the thing as an SSE
/// stream, starting with its current state.
///
/// The stream ends when the thing is withdrawn or the client falls too far
/// behind.
pub async fn event_stream(
    State(hub): State<Hub>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HubError> {
    let thing = hub.thing(&name)?;
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let attachment = thing.attach(Channel::EventStream(tx))?;
    let guard = ChannelMetricsGuard::new(ChannelKind::EventStream);
    debug!(thing = %name, channel = attachment.id(), "Event stream opened");

    // The attachment and guard live as long as the stream does.
    let stream = stream::unfold((rx, attachment, guard), |(mut rx, attachment, guard)| async move {
        let json = rx.recv().await?;
        let event = Event::default().data(String::from_utf8_lossy(&json));
        Some((Ok(event), (rx, attachment, guard)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `GET /things/{thing}/events/{name}`: wait for the next emission of one
/// event.
///
/// Answers 200 with the event data, 204 when the event carried none, or
/// 404 if the thing is withdrawn while waiting.
pub async fn long_poll(
    State(hub): State<Hub>,
    Path((name, event)): Path<(String, String)>,
) -> Result<Response, HubError> {
    let thing = hub.thing(&name)?;
    let (attachment, rx) = thing.wait_for(&event)?;
    let _guard = ChannelMetricsGuard::new(ChannelKind::LongPoll);
    debug!(thing = %name, event = %event, channel = attachment.id(), "Long-poll waiting");

    let data = rx.await.map_err(|_| HubError::UnknownThing(name))?;
    drop(attachment);

    Ok(match data {
        Some(data) => Json(data).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}
