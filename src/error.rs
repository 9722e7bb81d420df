//! Error taxonomy
//!
//! Every fallible operation in wiretap returns [`Error`]. Errors from the real
//! network are carried as [`TransportError`] so they can be recorded and
//! re-raised without losing the response they may embed.

use serde::{Deserialize, Serialize};

use crate::response::WebResponse;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to capture response body: {0}")]
    Capture(String),
    #[error("cannot build response: {0}")]
    UnsupportedShape(String),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Classify this error for an [`crate::ExceptionRecord`]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Capture(_) => ErrorKind::Capture,
            Error::UnsupportedShape(_) => ErrorKind::UnsupportedShape,
            _ => ErrorKind::Other,
        }
    }

    /// Transport status, when this is a transport-level failure
    pub fn transport_status(&self) -> Option<TransportStatus> {
        match self {
            Error::Transport(e) => Some(e.status()),
            _ => None,
        }
    }
}

/// Misuse of the transport registry
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("a capture session is already active on this registry")]
    SessionActive,
    #[error("no request factory registered for scheme `{0}`")]
    UnsupportedScheme(String),
}

/// Error taxonomy tag stored in captured exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Configuration,
    Transport,
    Capture,
    UnsupportedShape,
    Other,
}

/// Why a real network call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportStatus {
    ConnectFailure,
    NameResolutionFailure,
    Timeout,
    SendFailure,
    ReceiveFailure,
    /// The server answered with an error status
    ProtocolError,
    RedirectLimit,
    RequestCanceled,
    #[default]
    UnknownError,
}

/// A failed network call, optionally carrying the response the server sent
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    status: TransportStatus,
    message: String,
    response: Option<Box<WebResponse>>,
    #[source]
    source: Option<reqwest::Error>,
}

impl TransportError {
    pub fn new(status: TransportStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            response: None,
            source: None,
        }
    }

    /// An error status surfaced by the live transport
    pub fn protocol(response: WebResponse) -> Self {
        let message = format!(
            "the remote server returned an error: ({}) {}",
            response.status().as_u16(),
            response.status_text()
        );
        Self::new(TransportStatus::ProtocolError, message).with_response(response)
    }

    pub fn with_response(mut self, response: WebResponse) -> Self {
        self.response = Some(Box::new(response));
        self
    }

    pub fn status(&self) -> TransportStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn response(&self) -> Option<&WebResponse> {
        self.response.as_deref()
    }

    pub fn response_mut(&mut self) -> Option<&mut WebResponse> {
        self.response.as_deref_mut()
    }

    pub fn into_response(self) -> Option<WebResponse> {
        self.response.map(|r| *r)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let status = if err.is_timeout() {
            TransportStatus::Timeout
        } else if err.is_connect() {
            TransportStatus::ConnectFailure
        } else if err.is_redirect() {
            TransportStatus::RedirectLimit
        } else if err.is_request() || err.is_builder() {
            TransportStatus::SendFailure
        } else if err.is_body() || err.is_decode() {
            TransportStatus::ReceiveFailure
        } else {
            TransportStatus::UnknownError
        };
        Self {
            status,
            message: err.to_string(),
            response: None,
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::from(ConfigurationError::SessionActive).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(Error::Capture("x".into()).kind(), ErrorKind::Capture);
        assert_eq!(
            Error::UnsupportedShape("x".into()).kind(),
            ErrorKind::UnsupportedShape
        );
        let err = Error::from(TransportError::new(TransportStatus::Timeout, "slow"));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.transport_status(), Some(TransportStatus::Timeout));
        assert_eq!(err.to_string(), "slow");
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let json = serde_json::to_string(&TransportStatus::ProtocolError).unwrap();
        assert_eq!(json, "\"protocolError\"");
        let kind: ErrorKind = serde_json::from_str("\"unsupportedShape\"").unwrap();
        assert_eq!(kind, ErrorKind::UnsupportedShape);
    }
}
