//! Client errors
//!
//! Non-2xx responses are turned back into the [`RpaasError`] kind the server
//! mapped them from, so callers can match on `NotFound`, `Conflict`, ... the
//! same way server-side code does.

use rpaas_models::{ErrorKind, RpaasError};
use thiserror::Error;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The control plane answered with an error status
    #[error("{error}")]
    Api { status: u16, error: RpaasError },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Config(String),
}

impl ClientError {
    pub(crate) fn from_response(status: u16, body: &[u8]) -> Self {
        ClientError::Api {
            status,
            error: error_from_response(status, body),
        }
    }

    /// Kind of the server-side error, when there was one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Api { error, .. } => Some(error.kind()),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Message carried by an error body: `{"Msg": ...}`, `{"message": ...}` or
/// plain text (proxies in front of the control plane answer in text).
fn error_message(body: &[u8]) -> Option<String> {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = ["Msg", "message"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        {
            return Some(msg.to_string());
        }
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    (!text.is_empty()).then_some(text)
}

pub fn error_from_response(status: u16, body: &[u8]) -> RpaasError {
    let message = error_message(body).unwrap_or_else(|| {
        http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected response")
            .to_string()
    });
    match status {
        400 | 422 => RpaasError::validation(message),
        404 => RpaasError::not_found(message),
        409 => RpaasError::conflict(message),
        415 => RpaasError::unsupported(message),
        502 => RpaasError::bad_gateway(message),
        _ => RpaasError::Internal(anyhow::anyhow!("{} (status {})", message, status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_rebuilt_from_status() {
        let cases = [
            (400, ErrorKind::Validation),
            (404, ErrorKind::NotFound),
            (409, ErrorKind::Conflict),
            (415, ErrorKind::Unsupported),
            (422, ErrorKind::Validation),
            (502, ErrorKind::BadGateway),
            (500, ErrorKind::Internal),
            (401, ErrorKind::Internal),
        ];
        for (status, kind) in cases {
            assert_eq!(error_from_response(status, b"").kind(), kind, "status {}", status);
        }
    }

    #[test]
    fn messages_come_from_either_body_shape() {
        let e = error_from_response(404, br#"{"Msg":"rpaas instance \"x\" not found"}"#);
        assert_eq!(e.to_string(), "rpaas instance \"x\" not found");

        let e = error_from_response(502, br#"{"message":"cluster x not found"}"#);
        assert_eq!(e.to_string(), "cluster x not found");

        let e = error_from_response(409, b"already exists\n");
        assert_eq!(e.to_string(), "already exists");
    }

    #[test]
    fn empty_bodies_fall_back_to_the_reason_phrase() {
        let e = error_from_response(404, b"");
        assert_eq!(e.to_string(), "Not Found");
    }

    #[test]
    fn api_errors_expose_kind_and_status() {
        let e = ClientError::from_response(409, br#"{"Msg":"taken"}"#);
        assert_eq!(e.kind(), Some(ErrorKind::Conflict));
        assert_eq!(e.status(), Some(409));
        assert_eq!(e.to_string(), "taken");

        assert_eq!(ClientError::Config("x".into()).kind(), None);
    }
}
