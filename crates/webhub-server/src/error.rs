//! HTTP error responses.
//!
//! Every failure is answered with a plain-text body of the form
//! `"<status> <description>"`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::debug;
use webhub_core::ThingError;
use webhub_protocol::ProtocolError;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum HubError {
    /// No thing is exposed under this name.
    #[error("unknown thing: {0}")]
    UnknownThing(String),

    /// The path does not name a resource.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A thing operation failed.
    #[error(transparent)]
    Thing(#[from] ThingError),

    /// Missing or rejected token.
    #[error("unauthorized")]
    Unauthorized,

    /// PUT/POST body is not JSON.
    #[error("expected application/json for content-type")]
    ContentType,

    /// PUT/POST body exceeds the configured limit.
    #[error("request body too large")]
    PayloadTooLarge,

    /// The body is not parseable JSON.
    #[error("invalid: {0}")]
    MalformedBody(String),

    /// A bulk write body that is not a JSON object.
    #[error("invalid data")]
    InvalidData,

    /// Method or upgrade not supported.
    #[error("not implemented {0}")]
    NotImplemented(String),

    /// Unusable WebSocket handshake request.
    #[error("bad handshake: {0}")]
    Handshake(&'static str),

    /// Account requests with no account manager installed.
    #[error("missing account manager")]
    MissingAccountManager,

    /// Encoding failure.
    #[error("internal error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl HubError {
    /// Status code of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            HubError::UnknownThing(_)
            | HubError::InvalidRequest(_)
            | HubError::MalformedBody(_) => StatusCode::NOT_FOUND,
            HubError::Thing(e) => {
                StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            HubError::Unauthorized => StatusCode::UNAUTHORIZED,
            HubError::InvalidData | HubError::Handshake(_) => StatusCode::BAD_REQUEST,
            HubError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            HubError::ContentType
            | HubError::PayloadTooLarge
            | HubError::MissingAccountManager
            | HubError::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = format!("{} {}", status.as_u16(), self);
        debug!(status = status.as_u16(), error = %self, "Request failed");
        crate::metrics::record_error(status.as_u16());
        (status, body).into_response()
    }
}
