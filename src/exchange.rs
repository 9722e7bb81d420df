//! Captured request/response records
//!
//! One [`CapturedExchange`] holds everything needed to answer a request again
//! later: the request as sent, the response as received, and the error if
//! the call failed.

use serde::{Deserialize, Serialize};

use crate::codec::{nullable_payload, Payload};
use crate::error::{Error, ErrorKind, TransportError, TransportStatus};
use crate::headers::HeaderMultimap;
use crate::response::WebResponse;

/// A recorded request together with its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedExchange {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub request_headers: HeaderMultimap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_cookies: Option<String>,
    #[serde(default, deserialize_with = "nullable_payload")]
    pub request_payload: Payload,
    #[serde(default)]
    pub response_status_code: u16,
    #[serde(default)]
    pub response_headers: HeaderMultimap,
    #[serde(default, deserialize_with = "nullable_payload")]
    pub response_body: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_exception: Option<ExceptionRecord>,
}

impl CapturedExchange {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            request_headers: HeaderMultimap::new(),
            request_cookies: None,
            request_payload: Payload::empty(),
            response_status_code: 0,
            response_headers: HeaderMultimap::new(),
            response_body: Payload::empty(),
            response_exception: None,
        }
    }

    pub fn with_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.append(name, value);
        self
    }

    pub fn with_request_payload(mut self, payload: Payload) -> Self {
        self.request_payload = payload;
        self
    }

    /// Set a plain-text response
    pub fn with_response(mut self, status: u16, body: impl Into<String>) -> Self {
        self.response_status_code = status;
        self.response_body = Payload::from_text(body);
        self
    }

    pub fn with_response_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers.append(name, value);
        self
    }

    pub fn with_exception(mut self, exception: ExceptionRecord) -> Self {
        self.response_exception = Some(exception);
        self
    }

    /// Whether a response status was recorded
    pub fn has_response(&self) -> bool {
        self.response_status_code != 0
    }

    pub fn content_type(&self) -> Option<&str> {
        self.request_headers.first("content-type")
    }
}

/// Enough about a failure to raise a representative error again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionRecord {
    pub message: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_status: Option<TransportStatus>,
}

impl ExceptionRecord {
    pub fn from_error(err: &Error) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind(),
            transport_status: err.transport_status(),
        }
    }

    pub fn from_transport(err: &TransportError) -> Self {
        Self {
            message: err.message().to_string(),
            kind: ErrorKind::Transport,
            transport_status: Some(err.status()),
        }
    }

    /// Rebuild an error of the recorded kind, embedding a response if given
    pub fn to_error(&self, response: Option<WebResponse>) -> Error {
        match self.kind {
            ErrorKind::Transport => {
                let status = self.transport_status.unwrap_or_default();
                let err = TransportError::new(status, self.message.clone());
                match response {
                    Some(response) => err.with_response(response).into(),
                    None => err.into(),
                }
            }
            ErrorKind::Capture => Error::Capture(self.message.clone()),
            ErrorKind::UnsupportedShape => Error::UnsupportedShape(self.message.clone()),
            ErrorKind::Configuration | ErrorKind::Other => {
                Error::Other(anyhow::anyhow!(self.message.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_field_names() {
        let exchange = CapturedExchange::new("get", "http://x/1")
            .with_request_header("Accept", "text/plain")
            .with_response(200, "R1")
            .with_response_header("Content-Type", "text/plain");
        let json = serde_json::to_value(&exchange).unwrap();

        assert_eq!(json["method"], "GET");
        assert_eq!(json["url"], "http://x/1");
        assert_eq!(json["requestHeaders"]["Accept"][0], "text/plain");
        assert_eq!(json["requestPayload"]["encodedText"], "");
        assert_eq!(json["responseStatusCode"], 200);
        assert_eq!(json["responseBody"]["encodedText"], "R1");
        assert!(json.get("responseException").is_none());
    }

    #[test]
    fn test_null_payload_is_empty() {
        let json = r#"{
            "method": "POST",
            "url": "http://x/",
            "requestPayload": null,
            "responseBody": null
        }"#;
        let exchange: CapturedExchange = serde_json::from_str(json).unwrap();
        assert_eq!(exchange.request_payload, Payload::empty());
        assert_eq!(exchange.response_body, Payload::empty());
        assert!(!exchange.has_response());
    }

    #[test]
    fn test_exception_round_trip() {
        let record = ExceptionRecord {
            message: "refused".to_string(),
            kind: ErrorKind::Transport,
            transport_status: Some(TransportStatus::ConnectFailure),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"message":"refused","kind":"transport","transportStatus":"connectFailure"}"#
        );

        match record.to_error(None) {
            Error::Transport(err) => {
                assert_eq!(err.status(), TransportStatus::ConnectFailure);
                assert_eq!(err.message(), "refused");
                assert!(err.response().is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_error_captures_kind() {
        let err = Error::from(TransportError::new(TransportStatus::Timeout, "timed out"));
        let record = ExceptionRecord::from_error(&err);
        assert_eq!(record.kind, ErrorKind::Transport);
        assert_eq!(record.transport_status, Some(TransportStatus::Timeout));
        assert_eq!(record.message, "timed out");
    }
}
