//! WebSocket connections to a thing.
//!
//! The handshake is answered here and the upgraded stream is handed to the
//! hub's own RFC 6455 transport. Each complete text message is one request;
//! the reply carries the request's correlation id and goes back on the
//! same connection. Updates from the thing arrive on the same outbound
//! queue, so a client sees pushes and replies in the order they were
//! produced.

use crate::config::LimitsConfig;
use crate::error::HubError;
use crate::hub::Hub;
use crate::metrics::{self, ChannelMetricsGuard};
use axum::extract::Request;
use axum::http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webhub_core::{Channel, ChannelKind, Thing, ThingError, DEFAULT_CHANNEL_CAPACITY};
use webhub_protocol::handshake::version_supported;
use webhub_protocol::messages::{MALFORMED_STATUS, UNKNOWN_ID};
use webhub_protocol::{
    accept_key, Frame, Message, Operation, ProtocolError, Reply, Request as WsRequest,
};
use webhub_transport::{ConnectionId, WebSocketConfig};

/// Answer a WebSocket handshake for `thing` and serve the connection once
/// the upgrade completes.
pub(crate) fn upgrade(
    hub: Hub,
    thing: Arc<Thing>,
    mut request: Request,
) -> Result<Response, HubError> {
    let headers = request.headers();
    let version = headers.get(SEC_WEBSOCKET_VERSION).and_then(|v| v.to_str().ok());
    if !version_supported(version) {
        return Err(HubError::Handshake("unsupported Sec-WebSocket-Version"));
    }
    let key = headers
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let accept = accept_key(key).map_err(|e| match e {
        ProtocolError::Handshake(reason) => HubError::Handshake(reason),
        other => HubError::Protocol(other),
    })?;
    let accept = HeaderValue::from_str(&accept)
        .map_err(|_| HubError::Handshake("invalid Sec-WebSocket-Key"))?;

    let on_upgrade = hyper::upgrade::on(&mut request);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => run_connection(hub, thing, TokioIo::new(upgraded)).await,
            Err(e) => warn!(error = %e, "WebSocket upgrade failed"),
        }
    });

    Ok((
        StatusCode::SWITCHING_PROTOCOLS,
        [
            (UPGRADE, HeaderValue::from_static("websocket")),
            (CONNECTION, HeaderValue::from_static("Upgrade")),
            (SEC_WEBSOCKET_ACCEPT, accept),
        ],
    )
        .into_response())
}

/// Serve one WebSocket connection until either side closes it or the thing
/// is withdrawn.
pub(crate) async fn run_connection<S>(hub: Hub, thing: Arc<Thing>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let config = connection_config(&hub.config().limits);
    let (mut reader, writer, outbound) = webhub_transport::split(stream, &config);
    let connection = reader.id().clone();
    let replies = outbound.downgrade();
    let mut writer_task = tokio::spawn(writer.run());
    let mut writer_done = false;

    // The thing holds the only strong sender: detaching or withdrawing the
    // thing closes the connection. A failed attach drops it right away.
    let attachment = match thing.attach(Channel::WebSocket(outbound)) {
        Ok(attachment) => attachment,
        Err(e) => {
            warn!(connection = %connection, error = %e, "Failed to attach WebSocket");
            return;
        }
    };
    let _guard = ChannelMetricsGuard::new(ChannelKind::WebSocket);
    info!(connection = %connection, thing = %thing.name(), "WebSocket connected");

    loop {
        tokio::select! {
            result = &mut writer_task => {
                writer_done = true;
                match result {
                    Ok(Ok(())) => debug!(connection = %connection, "WebSocket writer finished"),
                    Ok(Err(e)) => {
                        debug!(connection = %connection, error = %e, "WebSocket write failed");
                    }
                    Err(e) => {
                        warn!(connection = %connection, error = %e, "WebSocket writer task failed");
                    }
                }
                break;
            }

            message = reader.next_message() => match message {
                Ok(Some(Message::Text(text))) => {
                    handle_text(&thing, &replies, &connection, &text).await;
                }
                Ok(Some(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_text(&thing, &replies, &connection, text).await,
                    Err(_) => {
                        let reply = Reply::error(
                            UNKNOWN_ID,
                            MALFORMED_STATUS,
                            "badly formed client message",
                        );
                        send_reply(&replies, &connection, &reply).await;
                    }
                },
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) if e.is_too_large() => {
                    warn!(connection = %connection, error = %e, "WebSocket message too large");
                    let reply = Reply::error(UNKNOWN_ID, 500, "payload too large");
                    send_reply(&replies, &connection, &reply).await;
                    break;
                }
                Err(e) => {
                    warn!(connection = %connection, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    drop(attachment);
    if !writer_done {
        if let Ok(Err(e)) = writer_task.await {
            debug!(connection = %connection, error = %e, "WebSocket write failed");
        }
    }
    info!(connection = %connection, thing = %thing.name(), "WebSocket disconnected");
}

/// Transport settings for a connection. A single frame may carry a whole
/// message, so both caps follow the configured message size.
fn connection_config(limits: &LimitsConfig) -> WebSocketConfig {
    WebSocketConfig {
        max_frame_size: limits.max_message_size,
        max_message_size: limits.max_message_size,
        outbound_capacity: DEFAULT_CHANNEL_CAPACITY,
    }
}

/// Handle one complete text message.
async fn handle_text(
    thing: &Arc<Thing>,
    replies: &mpsc::WeakSender<Frame>,
    connection: &ConnectionId,
    text: &str,
) {
    if text.trim().is_empty() {
        return;
    }
    metrics::record_ws_message("inbound");

    let WsRequest { id, operation } = match WsRequest::decode(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(connection = %connection, error = %e, "Rejected client message");
            send_reply(replies, connection, &e.reply()).await;
            return;
        }
    };

    let reply = match operation {
        Operation::WriteProperty { name, value } => result_reply(id, thing.write(&name, value)),
        Operation::WriteState(values) => result_reply(id, thing.write_all(values)),
        Operation::Invoke { name, input } => {
            // Actions may take a while; later requests are not held up.
            let thing = Arc::clone(thing);
            let replies = replies.clone();
            let connection = connection.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                let reply = match thing.invoke(&name, input).await {
                    Ok(output) => Reply::output(id, output),
                    Err(e) => error_reply(id, &e),
                };
                metrics::record_action(start.elapsed().as_secs_f64());
                send_reply(&replies, &connection, &reply).await;
            });
            return;
        }
    };
    send_reply(replies, connection, &reply).await;
}

fn result_reply(id: String, result: Result<(), ThingError>) -> Reply {
    match result {
        Ok(()) => Reply::ok(id),
        Err(e) => error_reply(id, &e),
    }
}

fn error_reply(id: String, error: &ThingError) -> Reply {
    Reply::error(id, error.status(), error.to_string())
}

async fn send_reply(replies: &mpsc::WeakSender<Frame>, connection: &ConnectionId, reply: &Reply) {
    let payload = match reply.encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(connection = %connection, error = %e, "Failed to encode reply");
            return;
        }
    };
    let Some(tx) = replies.upgrade() else {
        debug!(connection = %connection, "Connection closed before reply");
        return;
    };
    if tx.send(Frame::text(payload)).await.is_ok() {
        metrics::record_ws_message("outbound");
    }
}
