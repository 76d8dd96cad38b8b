//! Request gates: token check, account manager delegation and CORS preflight.

use crate::error::HubError;
use crate::hub::Hub;
use axum::extract::{Query, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION,
};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tower::ServiceExt;
use tracing::{debug, warn};

/// Methods advertised to preflight requests.
pub const ALLOWED_METHODS: &str = "POST, GET, PUT, OPTIONS";

/// Headers advertised to preflight requests.
pub const ALLOWED_HEADERS: &str = "Content-Type, Upgrade, Authorization";

#[derive(Debug, Deserialize)]
struct TokenQuery {
    jwt: Option<String>,
}

/// Token carried by a request: the `Authorization` header (with or without
/// a `Bearer` prefix), else the `jwt` query parameter used by EventSource
/// and WebSocket clients.
#[must_use]
pub fn request_token(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(AUTHORIZATION) {
        let value = value.to_str().ok()?.trim();
        let token = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            _ => value,
        };
        return Some(token.to_string());
    }

    Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.jwt)
}

/// Reject requests whose token does not pass the hub's validator.
pub async fn authorize(State(hub): State<Hub>, request: Request, next: Next) -> Response {
    let token = request_token(&request);
    let url = request.uri().to_string();

    if hub.authorize(token.as_deref(), &url) {
        next.run(request).await
    } else {
        warn!(url = %url, has_token = token.is_some(), "Unauthorized request");
        HubError::Unauthorized.into_response()
    }
}

/// Hand requests under the account path to the account manager.
pub async fn account_gate(State(hub): State<Hub>, request: Request, next: Next) -> Response {
    if !hub.is_account_path(request.uri().path()) {
        return next.run(request).await;
    }

    match hub.account_manager() {
        Some(manager) => {
            debug!(path = %request.uri().path(), "Delegating to account manager");
            match manager.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            }
        }
        None => HubError::MissingAccountManager.into_response(),
    }
}

/// Answer every `OPTIONS` request with the CORS headers browsers expect.
pub async fn options_preflight(request: Request, next: Next) -> Response {
    if request.method() != Method::OPTIONS {
        return next.run(request).await;
    }

    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"),
            (ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
        ],
    )
        .into_response()
}
