//! HAR (HTTP Archive) import
//!
//! Parses HAR 1.2 logs, as exported by browsers and proxies, into capture
//! sessions that a [`crate::ReplayMatcher`] can serve.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::codec::{self, Payload};
use crate::error::Result;
use crate::exchange::CapturedExchange;
use crate::headers::HeaderMultimap;
use crate::session::CaptureSession;

/// HAR 1.2 root structure
#[derive(Debug, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Debug, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct HarEntry {
    pub request: HarRequest,
    pub response: HarResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<HarHeader>,
    pub post_data: Option<HarPostData>,
}

#[derive(Debug, Deserialize)]
pub struct HarResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<HarHeader>,
    pub content: Option<HarContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    #[serde(default)]
    pub mime_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    #[serde(default)]
    pub mime_type: String,
    pub text: Option<String>,
    pub encoding: Option<String>,
}

/// Parse a HAR file from JSON string
pub fn parse_har(content: &str) -> Result<Har> {
    let har: Har = serde_json::from_str(content)?;
    Ok(har)
}

/// Convert HAR entries to captured exchanges, in log order
pub fn har_to_exchanges(har: Har) -> Result<Vec<CapturedExchange>> {
    har.log.entries.into_iter().map(entry_to_exchange).collect()
}

pub fn har_to_session(har: Har) -> Result<CaptureSession> {
    Ok(CaptureSession::from_exchanges(har_to_exchanges(har)?))
}

fn entry_to_exchange(entry: HarEntry) -> Result<CapturedExchange> {
    let HarEntry { request, response } = entry;

    let mut exchange = CapturedExchange::new(request.method, request.url);
    exchange.request_headers = to_multimap(request.headers);
    if let Some(post) = request.post_data {
        let text = post.text.unwrap_or_default();
        exchange.request_payload = Payload::from_request(text.as_bytes(), mime(&post.mime_type));
    }

    exchange.response_status_code = response.status;
    exchange.response_headers = to_multimap(response.headers);
    if let Some(content) = response.content {
        exchange.response_body = content_payload(content)?;
    }

    Ok(exchange)
}

/// HTTP/2 pseudo-headers are not real request headers
fn to_multimap(headers: Vec<HarHeader>) -> HeaderMultimap {
    headers
        .into_iter()
        .filter(|h| !h.name.starts_with(':'))
        .map(|h| (h.name, h.value))
        .collect()
}

fn content_payload(content: HarContent) -> Result<Payload> {
    let text = content.text.unwrap_or_default();
    let base64 = content
        .encoding
        .as_deref()
        .is_some_and(|e| e.eq_ignore_ascii_case("base64"));

    if base64 {
        let bytes = STANDARD.decode(text.trim())?;
        let charset = mime(&content.mime_type).and_then(codec::charset);
        return Ok(Payload::from_response(&bytes, mime(&content.mime_type), charset));
    }
    Ok(Payload::from_text(text))
}

fn mime(mime_type: &str) -> Option<&str> {
    (!mime_type.is_empty()).then_some(mime_type)
}
