//! Error taxonomy shared by the connection manager, dispatcher and routes.
//!
//! Every variant maps to one HTTP status (see [`Error::status_code`]) and is
//! rendered as the `{"success": false, "error": "..."}` envelope the API uses
//! for all failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::backend::BackendError;
use crate::session::SessionError;
use crate::spreadsheet::SpreadsheetError;

/// Crate result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// No socket has ever been opened for this session.
    #[error("WhatsApp client is not initialized")]
    NotInitialized,

    /// A socket exists (or existed) but the session is not in `Connected`.
    #[error("WhatsApp client is not connected")]
    NotConnected,

    /// The session closed terminally before reaching `Connected`.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Another caller is already waiting for authentication.
    #[error("Authentication already in progress")]
    AuthenticationPending,

    #[error("WhatsApp client is already connected")]
    AlreadyConnected,

    /// Malformed input from the caller.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Timeout(String),

    /// The protocol library failed to connect or send.
    #[error("{0}")]
    Upstream(String),

    #[error("session store: {0}")]
    Session(#[from] SessionError),

    #[error("spreadsheet: {0}")]
    Spreadsheet(#[from] SpreadsheetError),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status used when this error reaches the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::AuthenticationPending | Self::AlreadyConnected => StatusCode::CONFLICT,
            Self::NotInitialized
            | Self::NotConnected
            | Self::AuthenticationFailed
            | Self::Upstream(_)
            | Self::Session(_)
            | Self::Spreadsheet(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(json!({"success": false, "error": self.to_string()})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_are_bad_requests() {
        assert_eq!(
            Error::invalid("missing recipient").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn connection_errors_are_server_errors() {
        assert_eq!(
            Error::NotConnected.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::from(BackendError::Closed).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn qr_timeout_maps_to_408() {
        assert_eq!(
            Error::Timeout("no QR code".into()).status_code(),
            StatusCode::REQUEST_TIMEOUT
        );
    }
}
