//! Response objects and the synthetic response factory
//!
//! [`WebResponse`] is the single response type every request object hands
//! back, whether it came off the network, out of a capture session, or from a
//! test closure. [`ResponseBuilder`] assembles one from discrete fields.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, StatusCode, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::codec::{self, Payload};
use crate::error::{Error, Result, TransportError, TransportStatus};
use crate::headers::HeaderMultimap;

const KNOWN_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "TRACE", "CONNECT",
];

/// Response body, readable exactly once
#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Full(Bytes),
    Live(reqwest::Response),
    /// A body that could not be read; reading it again reports the failure
    Failed(String),
}

impl ResponseBody {
    pub async fn bytes(self) -> Result<Bytes> {
        match self {
            ResponseBody::Empty => Ok(Bytes::new()),
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Live(response) => {
                Ok(response.bytes().await.map_err(TransportError::from)?)
            }
            ResponseBody::Failed(message) => {
                Err(TransportError::new(TransportStatus::ReceiveFailure, message).into())
            }
        }
    }
}

/// An HTTP response as seen by the caller
#[derive(Debug)]
pub struct WebResponse {
    url: Url,
    method: Method,
    status: StatusCode,
    status_text: String,
    version: Version,
    headers: HeaderMap,
    content_length: Option<u64>,
    content_type: Option<String>,
    proxy: Option<Url>,
    keep_alive: bool,
    connection_group: Option<String>,
    body: ResponseBody,
    pass_through_token: Option<u64>,
}

impl WebResponse {
    /// Wrap a response received from the live network
    pub fn from_live(method: Method, response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let keep_alive = !headers
            .get(http::header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false);

        Self {
            url: response.url().clone(),
            method,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            version: response.version(),
            content_length: response.content_length(),
            content_type,
            headers,
            proxy: None,
            keep_alive,
            connection_group: None,
            body: ResponseBody::Live(response),
            pass_through_token: None,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Charset declared by the content type
    pub fn charset(&self) -> Option<&str> {
        self.content_type.as_deref().and_then(codec::charset)
    }

    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn connection_group(&self) -> Option<&str> {
        self.connection_group.as_deref()
    }

    /// Take the body out, leaving an empty one behind
    pub fn take_body(&mut self) -> ResponseBody {
        std::mem::take(&mut self.body)
    }

    /// Replace the body with fully buffered content
    pub fn set_body(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        self.content_length = Some(bytes.len() as u64);
        self.body = ResponseBody::Full(bytes);
    }

    /// Replace the body with one that fails with `message` when read
    pub(crate) fn fail_body(&mut self, message: impl Into<String>) {
        self.body = ResponseBody::Failed(message.into());
    }

    pub fn is_buffered(&self) -> bool {
        !matches!(self.body, ResponseBody::Live(_))
    }

    pub async fn bytes(self) -> Result<Bytes> {
        self.body.bytes().await
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub(crate) fn pass_through_token(&self) -> Option<u64> {
        self.pass_through_token
    }

    pub(crate) fn mark_pass_through(&mut self, token: u64) {
        self.pass_through_token = Some(token);
    }
}

/// Builds a [`WebResponse`] from declarative parameters
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    url: Url,
    method: String,
    status: u16,
    status_text: Option<String>,
    http10: bool,
    headers: Vec<(String, String)>,
    body: Bytes,
    payload: Option<Payload>,
    content_length: Option<u64>,
    media_type: Option<String>,
    proxy: Option<Url>,
    keep_alive: bool,
    connection_group: Option<String>,
    decompress: bool,
}

impl ResponseBuilder {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            status: 200,
            status_text: None,
            http10: false,
            headers: Vec::new(),
            body: Bytes::new(),
            payload: None,
            content_length: None,
            media_type: None,
            proxy: None,
            keep_alive: true,
            connection_group: None,
            decompress: true,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Report HTTP/1.0 instead of HTTP/1.1
    pub fn http10(mut self, http10: bool) -> Self {
        self.http10 = http10;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            self.headers.push((name.as_str().to_string(), value));
        }
        self
    }

    pub fn headers_multimap(mut self, headers: &HeaderMultimap) -> Self {
        for (name, values) in headers.iter() {
            for value in values {
                self.headers.push((name.to_string(), value.clone()));
            }
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.payload = None;
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        let text: String = text.into();
        self.media_type_if_unset("text/plain; charset=utf-8")
            .body(text)
    }

    pub fn json<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.media_type_if_unset("application/json").body(body))
    }

    /// Body from a captured payload, resolved in [`build`](Self::build)
    ///
    /// Compressed payloads are served decoded only when the headers declare a
    /// `Content-Encoding` and decompression is on. Without that header the
    /// original compressed bytes are served, as a live client would see them.
    pub fn payload(mut self, payload: &Payload) -> Self {
        self.payload = Some(payload.clone());
        self
    }

    pub fn content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    fn media_type_if_unset(mut self, media_type: &str) -> Self {
        if self.media_type.is_none() {
            self.media_type = Some(media_type.to_string());
        }
        self
    }

    pub fn proxy(mut self, proxy: Url) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn connection_group(mut self, group: impl Into<String>) -> Self {
        self.connection_group = Some(group.into());
        self
    }

    /// Whether compressed payloads are served decompressed
    pub fn decompress(mut self, decompress: bool) -> Self {
        self.decompress = decompress;
        self
    }

    pub fn build(self) -> Result<WebResponse> {
        let method_upper = self.method.to_ascii_uppercase();
        if !KNOWN_METHODS.contains(&method_upper.as_str()) {
            return Err(Error::UnsupportedShape(format!(
                "unrecognized method: {}",
                self.method
            )));
        }
        let method = Method::from_bytes(method_upper.as_bytes())
            .map_err(|_| Error::UnsupportedShape(format!("unrecognized method: {}", self.method)))?;

        let status = StatusCode::from_u16(self.status)
            .map_err(|_| Error::UnsupportedShape(format!("invalid status code: {}", self.status)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::UnsupportedShape(format!("invalid header name: {}", name)))?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                Error::UnsupportedShape(format!("invalid header value for {}", name))
            })?;
            headers.append(header_name, header_value);
        }

        let mut body = self.body;
        if let Some(ref payload) = self.payload {
            // recorded lengths describe the original bytes, not the rebuilt ones
            headers.remove(CONTENT_LENGTH);
            let declared = headers.contains_key(CONTENT_ENCODING);
            if payload.is_compressed() && (!declared || !self.decompress) {
                body = payload.to_bytes()?.into();
            } else {
                body = payload.decoded_bytes()?.into();
                headers.remove(CONTENT_ENCODING);
            }
        }

        if let Some(ref media_type) = self.media_type {
            if !headers.contains_key(CONTENT_TYPE) {
                let value = HeaderValue::from_str(media_type).map_err(|_| {
                    Error::UnsupportedShape(format!("invalid media type: {}", media_type))
                })?;
                headers.insert(CONTENT_TYPE, value);
            }
        }

        let content_length = self.content_length.unwrap_or(body.len() as u64);
        if !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let status_text = self
            .status_text
            .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());

        let body = if body.is_empty() {
            ResponseBody::Empty
        } else {
            ResponseBody::Full(body)
        };

        Ok(WebResponse {
            url: self.url,
            method,
            status,
            status_text,
            version: if self.http10 {
                Version::HTTP_10
            } else {
                Version::HTTP_11
            },
            headers,
            content_length: Some(content_length),
            content_type,
            proxy: self.proxy,
            keep_alive: self.keep_alive,
            connection_group: self.connection_group,
            body,
            pass_through_token: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://example.com/a").unwrap()
    }

    #[tokio::test]
    async fn test_build_defaults() {
        let response = ResponseBuilder::new(url()).text("hi").build().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.status_text(), "OK");
        assert_eq!(response.version(), Version::HTTP_11);
        assert_eq!(response.content_length(), Some(2));
        assert_eq!(response.content_type(), Some("text/plain; charset=utf-8"));
        assert_eq!(response.charset(), Some("utf-8"));
        assert!(response.keep_alive());
        assert_eq!(response.method(), Method::GET);
        assert_eq!(response.text().await.unwrap(), "hi");
    }

    #[test]
    fn test_explicit_fields() {
        let response = ResponseBuilder::new(url())
            .method("post")
            .status(201)
            .status_text("Made")
            .http10(true)
            .header("X-Id", "7")
            .media_type("application/xml")
            .keep_alive(false)
            .connection_group("pool-a")
            .proxy(Url::parse("http://proxy:3128").unwrap())
            .build()
            .unwrap();
        assert_eq!(response.method(), Method::POST);
        assert_eq!(response.status().as_u16(), 201);
        assert_eq!(response.status_text(), "Made");
        assert_eq!(response.version(), Version::HTTP_10);
        assert_eq!(response.headers()["x-id"], "7");
        assert_eq!(response.content_type(), Some("application/xml"));
        assert_eq!(response.content_length(), Some(0));
        assert!(!response.keep_alive());
        assert_eq!(response.connection_group(), Some("pool-a"));
        assert_eq!(response.proxy().unwrap().port(), Some(3128));
    }

    #[test]
    fn test_unknown_method_is_unsupported() {
        let err = ResponseBuilder::new(url()).method("BREW").build().unwrap_err();
        assert!(matches!(err, Error::UnsupportedShape(_)));
    }

    #[test]
    fn test_invalid_status_is_unsupported() {
        let err = ResponseBuilder::new(url()).status(0).build().unwrap_err();
        assert!(matches!(err, Error::UnsupportedShape(_)));
    }

    #[tokio::test]
    async fn test_compressed_payload_respects_decompress() {
        let payload = Payload::from_response(
            &Payload {
                encoded_text: "zipped".into(),
                is_gzip: true,
                ..Payload::default()
            }
            .to_bytes()
            .unwrap(),
            Some("text/plain"),
            None,
        );
        assert!(payload.is_gzip);

        let plain = ResponseBuilder::new(url())
            .header("Content-Encoding", "gzip")
            .payload(&payload)
            .build()
            .unwrap();
        assert!(plain.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(plain.text().await.unwrap(), "zipped");

        // the flag may follow the payload
        let raw = ResponseBuilder::new(url())
            .header("Content-Encoding", "gzip")
            .payload(&payload)
            .decompress(false)
            .build()
            .unwrap();
        assert_eq!(raw.headers()[CONTENT_ENCODING], "gzip");
        let bytes = raw.bytes().await.unwrap();
        assert_eq!(codec::sniff_gzip(&bytes).unwrap(), b"zipped");
    }

    #[tokio::test]
    async fn test_compressed_payload_without_declared_encoding_stays_compressed() {
        let payload = Payload {
            encoded_text: "archive".into(),
            is_gzip: true,
            ..Payload::default()
        };
        let response = ResponseBuilder::new(url())
            .media_type("application/octet-stream")
            .payload(&payload)
            .build()
            .unwrap();
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        let bytes = response.bytes().await.unwrap();
        assert_eq!(codec::sniff_gzip(&bytes).unwrap(), b"archive");
    }

    #[tokio::test]
    async fn test_set_body_replaces_content() {
        let mut response = ResponseBuilder::new(url()).text("old").build().unwrap();
        let old = response.take_body().bytes().await.unwrap();
        assert_eq!(&old[..], b"old");
        response.set_body("new body");
        assert_eq!(response.content_length(), Some(8));
        assert_eq!(&response.bytes().await.unwrap()[..], b"new body");
    }
}
