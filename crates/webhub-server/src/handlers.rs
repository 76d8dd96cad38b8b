//! HTTP request handlers.
//!
//! Routes under `/things/{thing}` map onto the thing runtime; the event
//! routes live in [`crate::events`] and the WebSocket upgrade in
//! [`crate::ws`].

use crate::auth;
use crate::error::HubError;
use crate::events;
use crate::hub::Hub;
use crate::metrics;
use crate::ws;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, UPGRADE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::Value;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Build the hub's router.
pub fn router(hub: Hub) -> Router {
    let things = Router::new()
        .route("/things", get(list_things).fallback(unsupported))
        .route("/things/:thing", get(thing_root).fallback(unsupported))
        .route(
            "/things/:thing/properties",
            get(read_properties)
                .put(write_properties)
                .post(write_properties)
                .fallback(unsupported),
        )
        .route(
            "/things/:thing/properties/:name",
            get(read_property)
                .put(write_property)
                .post(write_property)
                .fallback(unsupported),
        )
        .route(
            "/things/:thing/actions/:name",
            post(invoke_action).put(invoke_action).fallback(unsupported),
        )
        .route(
            "/things/:thing/events",
            get(events::event_stream).fallback(unsupported),
        )
        .route(
            "/things/:thing/events/:name",
            get(events::long_poll).fallback(unsupported),
        )
        .route_layer(middleware::from_fn_with_state(hub.clone(), auth::authorize));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, UPGRADE, AUTHORIZATION]);

    Router::new()
        .merge(things)
        .fallback(unsupported)
        .layer(middleware::from_fn_with_state(hub.clone(), auth::account_gate))
        .layer(middleware::from_fn(auth::options_preflight))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(hub)
}

/// Anything no route handles: 404 for the methods the hub serves, 501 for
/// the rest.
async fn unsupported(method: Method, uri: Uri) -> HubError {
    match method {
        Method::GET | Method::HEAD | Method::PUT | Method::POST => {
            HubError::InvalidRequest(uri.to_string())
        }
        _ => HubError::NotImplemented(format!("{method} {uri}")),
    }
}

/// `GET /things`
async fn list_things(State(hub): State<Hub>) -> Json<Vec<Value>> {
    Json(hub.registry().descriptions())
}

/// `GET /things/{thing}`: the description, or a WebSocket upgrade.
async fn thing_root(
    State(hub): State<Hub>,
    Path(name): Path<String>,
    request: Request,
) -> Result<Response, HubError> {
    if let Some(upgrade) = request.headers().get(UPGRADE) {
        let protocol = upgrade.to_str().unwrap_or_default();
        if !protocol.eq_ignore_ascii_case("websocket") {
            return Err(HubError::NotImplemented(format!("upgrade to {protocol}")));
        }
        let thing = hub.thing(&name)?;
        return ws::upgrade(hub, thing, request);
    }

    let thing = hub.thing(&name)?;
    Ok(Json(thing.document().clone()).into_response())
}

/// `GET /things/{thing}/properties`
async fn read_properties(
    State(hub): State<Hub>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Map<String, Value>>, HubError> {
    Ok(Json(hub.thing(&name)?.snapshot()))
}

/// `GET /things/{thing}/properties/{name}`
async fn read_property(
    State(hub): State<Hub>,
    Path((name, property)): Path<(String, String)>,
) -> Result<Json<Value>, HubError> {
    Ok(Json(hub.thing(&name)?.read(&property)?))
}

/// `PUT|POST /things/{thing}/properties`: all-or-nothing bulk write.
async fn write_properties(
    State(hub): State<Hub>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, HubError> {
    let thing = hub.thing(&name)?;
    let (text, value) = read_json(&hub, &headers, body).await?;
    let values = match value {
        Some(Value::Object(values)) => values,
        Some(_) => return Err(HubError::InvalidData),
        None => return Err(HubError::MalformedBody(text)),
    };
    thing.write_all(values)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT|POST /things/{thing}/properties/{name}`
async fn write_property(
    State(hub): State<Hub>,
    Path((name, property)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, HubError> {
    let thing = hub.thing(&name)?;
    // Unknown properties are reported before the body is looked at.
    thing.read(&property)?;
    let (text, value) = read_json(&hub, &headers, body).await?;
    let value = value.ok_or(HubError::MalformedBody(text))?;
    thing.write(&property, value)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /things/{thing}/actions/{name}`: 200 with the output, or 204.
async fn invoke_action(
    State(hub): State<Hub>,
    Path((name, action)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, HubError> {
    let thing = hub.thing(&name)?;
    let (_, input) = read_json(&hub, &headers, body).await?;

    let start = Instant::now();
    let output = thing.invoke(&action, input).await?;
    metrics::record_action(start.elapsed().as_secs_f64());

    Ok(match output {
        Some(output) => Json(output).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// Read a JSON request body.
///
/// Returns the body text and its parsed value; an empty body parses to
/// `None`.
async fn read_json(
    hub: &Hub,
    headers: &HeaderMap,
    body: Body,
) -> Result<(String, Option<Value>), HubError> {
    if !is_json(headers) {
        return Err(HubError::ContentType);
    }

    let limit = hub.config().limits.max_body_size;
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        debug!(error = %e, limit, "Failed to read request body");
        HubError::PayloadTooLarge
    })?;

    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.trim().is_empty() {
        return Ok((text, None));
    }
    match serde_json::from_str(&text) {
        Ok(value) => Ok((text, Some(value))),
        Err(_) => Err(HubError::MalformedBody(text)),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}
