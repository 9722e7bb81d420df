//! Payload codec
//!
//! Turns arbitrary request/response bytes into a form that survives a text
//! serializer. Text-like content is stored verbatim, everything else as
//! base64. Gzip and deflate bodies are stored decompressed and re-compressed
//! on the way back out.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::bufread::MultiGzDecoder;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

const TEXT_MARKERS: [&str; 4] = ["text", "xml", "json", "application/x-www-form-urlencoded"];

/// Serialization-safe representation of a byte sequence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Payload {
    pub encoded_text: String,
    pub is_encoded: bool,
    pub is_gzip: bool,
    pub is_deflate: bool,
}

impl Payload {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Plain text payload, stored verbatim
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            encoded_text: text.into(),
            ..Self::default()
        }
    }

    /// Build a request payload, classified by its content type
    pub fn from_request(bytes: &[u8], content_type: Option<&str>) -> Self {
        Self::build(bytes, is_plain_text(content_type))
    }

    /// Build a response payload; a declared UTF-8 charset also counts as text
    pub fn from_response(bytes: &[u8], content_type: Option<&str>, charset: Option<&str>) -> Self {
        let utf8 = charset
            .map(|c| c.trim().trim_matches('"').eq_ignore_ascii_case("utf-8"))
            .unwrap_or(false);
        Self::build(bytes, utf8 || is_plain_text(content_type))
    }

    fn build(bytes: &[u8], plain_text: bool) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }

        let (content, is_gzip, is_deflate) = match sniff_gzip(bytes) {
            Some(inflated) => (inflated, true, false),
            None => match try_inflate(bytes) {
                Some(inflated) => (inflated, false, true),
                None => (bytes.to_vec(), false, false),
            },
        };

        let text = if plain_text {
            String::from_utf8(content).map_err(|e| e.into_bytes())
        } else {
            Err(content)
        };

        match text {
            Ok(encoded_text) => Self {
                encoded_text,
                is_encoded: false,
                is_gzip,
                is_deflate,
            },
            Err(raw) => Self {
                encoded_text: STANDARD.encode(raw),
                is_encoded: true,
                is_gzip,
                is_deflate,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.encoded_text.is_empty()
    }

    /// Content bytes, without re-applying compression
    pub fn decoded_bytes(&self) -> Result<Vec<u8>> {
        if self.is_encoded {
            Ok(STANDARD.decode(&self.encoded_text)?)
        } else {
            Ok(self.encoded_text.as_bytes().to_vec())
        }
    }

    /// Reconstruct the original bytes, re-compressing where flagged
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let content = self.decoded_bytes()?;
        if self.is_gzip {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&content)?;
            Ok(encoder.finish()?)
        } else if self.is_deflate {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&content)?;
            Ok(encoder.finish()?)
        } else {
            Ok(content)
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.is_gzip || self.is_deflate
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.is_encoded == other.is_encoded && self.encoded_text == other.encoded_text
    }
}

impl Eq for Payload {}

/// Deserialize a payload field, mapping `null` to the empty payload
pub(crate) fn nullable_payload<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Payload, D::Error> {
    Ok(Option::<Payload>::deserialize(deserializer)?.unwrap_or_default())
}

/// Whether a content type denotes text that can be stored verbatim
pub fn is_plain_text(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) if ct.trim().is_empty() => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            TEXT_MARKERS.iter().any(|marker| ct.contains(marker))
        }
    }
}

/// Extract the `charset` parameter of a content type
pub fn charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Decompress gzip content, only tried when the magic header is present
///
/// Every member is decoded. Input with bytes left over after the last member
/// is not treated as gzip.
pub fn sniff_gzip(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() < GZIP_MAGIC.len() || bytes[..GZIP_MAGIC.len()] != GZIP_MAGIC {
        return None;
    }
    let mut decoder = MultiGzDecoder::new(bytes);
    let mut inflated = Vec::new();
    decoder.read_to_end(&mut inflated).ok()?;
    if !decoder.into_inner().is_empty() {
        return None;
    }
    Some(inflated)
}

/// Attempt a raw deflate decode; any failure means the bytes are not deflate
pub fn try_inflate(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut inflater = Decompress::new(false);
    let mut inflated = Vec::with_capacity(bytes.len().saturating_mul(4).max(64));
    loop {
        if inflated.len() == inflated.capacity() {
            inflated.reserve(inflated.capacity());
        }
        let (before_in, before_out) = (inflater.total_in(), inflater.total_out());
        let status = inflater
            .decompress_vec(
                &bytes[before_in as usize..],
                &mut inflated,
                FlushDecompress::Finish,
            )
            .ok()?;
        match status {
            Status::StreamEnd => break,
            // truncated input stalls without reaching the end of the stream
            Status::Ok | Status::BufError
                if inflater.total_in() == before_in && inflater.total_out() == before_out =>
            {
                return None
            }
            Status::Ok | Status::BufError => {}
        }
    }
    if inflated.is_empty() || inflater.total_in() != bytes.len() as u64 {
        return None;
    }
    Some(inflated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_plain_text_classification() {
        for ct in [
            "application/json",
            "text/plain",
            "application/xml",
            "application/x-www-form-urlencoded",
            "Application/JSON; charset=utf-8",
        ] {
            assert!(!Payload::from_request(b"a=b", Some(ct)).is_encoded, "{}", ct);
        }
        assert!(Payload::from_request(b"\x89PNG", Some("image/png")).is_encoded);
        assert!(!Payload::from_request(b"hello", None).is_encoded);
        assert!(!Payload::from_request(b"hello", Some("")).is_encoded);
    }

    #[test]
    fn test_empty_payload() {
        let payload = Payload::from_request(&[], Some("image/png"));
        assert_eq!(payload.encoded_text, "");
        assert!(!payload.is_encoded);
        assert!(!payload.is_gzip);
        assert!(!payload.is_deflate);
        assert!(payload.to_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_representative_payloads() {
        let binary: Vec<u8> = (0u8..=255).collect();
        let cases: Vec<(&[u8], Option<&str>)> = vec![
            (&b"{\"id\":1}"[..], Some("application/json")),
            (&b"plain body"[..], Some("text/plain")),
            (&binary[..], Some("application/octet-stream")),
            (&binary[..], Some("text/plain")),
            (&b"<a/>"[..], None),
        ];
        for (bytes, ct) in cases {
            let payload = Payload::from_request(bytes, ct);
            assert_eq!(payload.to_bytes().unwrap(), bytes, "{:?}", ct);
        }
    }

    #[test]
    fn test_invalid_utf8_text_falls_back_to_base64() {
        let payload = Payload::from_request(&[0xff, 0xfe, 0x41], Some("text/plain"));
        assert!(payload.is_encoded);
        assert_eq!(payload.to_bytes().unwrap(), vec![0xff, 0xfe, 0x41]);
    }

    #[test]
    fn test_gzip_is_stored_decompressed() {
        let compressed = gzip(b"hello gzip");
        let payload = Payload::from_response(&compressed, Some("text/plain"), None);
        assert!(payload.is_gzip);
        assert!(!payload.is_deflate);
        assert_eq!(payload.encoded_text, "hello gzip");

        let restored = payload.to_bytes().unwrap();
        assert_eq!(sniff_gzip(&restored).unwrap(), b"hello gzip");
    }

    #[test]
    fn test_gzip_keeps_every_member() {
        let mut compressed = gzip(b"part one ");
        compressed.extend(gzip(b"part two"));
        let payload = Payload::from_request(&compressed, Some("application/octet-stream"));
        assert!(payload.is_gzip);
        assert_eq!(payload.decoded_bytes().unwrap(), b"part one part two");
        assert_eq!(
            sniff_gzip(&payload.to_bytes().unwrap()).unwrap(),
            b"part one part two"
        );
    }

    #[test]
    fn test_gzip_with_trailing_bytes_is_stored_raw() {
        let mut bytes = gzip(b"head");
        bytes.extend_from_slice(b"tail");
        assert!(sniff_gzip(&bytes).is_none());

        let payload = Payload::from_request(&bytes, Some("application/octet-stream"));
        assert!(!payload.is_gzip);
        assert!(!payload.is_deflate);
        assert_eq!(payload.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_deflate_is_stored_decompressed() {
        let compressed = deflate(b"hello deflate hello deflate");
        let payload = Payload::from_response(&compressed, Some("application/json"), None);
        assert!(payload.is_deflate);
        assert_eq!(payload.encoded_text, "hello deflate hello deflate");
        assert_eq!(
            try_inflate(&payload.to_bytes().unwrap()).unwrap(),
            b"hello deflate hello deflate"
        );
    }

    #[test]
    fn test_encoded_flag_uses_decompressed_bytes() {
        let compressed = gzip(&[0u8, 1, 2, 3, 250]);
        let payload = Payload::from_response(&compressed, Some("application/octet-stream"), None);
        assert!(payload.is_gzip);
        assert!(payload.is_encoded);
        assert_eq!(payload.decoded_bytes().unwrap(), vec![0u8, 1, 2, 3, 250]);
    }

    #[test]
    fn test_utf8_charset_forces_text_for_responses() {
        let payload = Payload::from_response(b"caf\xc3\xa9", Some("application/octet-stream"), Some("UTF-8"));
        assert!(!payload.is_encoded);
        assert_eq!(payload.encoded_text, "café");
    }

    #[test]
    fn test_plain_text_is_not_mistaken_for_deflate() {
        for body in [&b"hello"[..], b"{\"a\":1}", b"x", b"R1", b"GET / HTTP/1.1"] {
            assert!(try_inflate(body).is_none());
            assert!(!Payload::from_request(body, None).is_deflate);
        }
    }

    #[test]
    fn test_equality_ignores_compression_flags() {
        let a = Payload::from_text("same");
        let mut b = Payload::from_text("same");
        b.is_gzip = true;
        assert_eq!(a, b);
        assert_ne!(a, Payload::from_text("other"));
        assert_eq!(Payload::empty(), Payload::from_request(&[], None));
    }

    #[test]
    fn test_charset_parameter() {
        assert_eq!(charset("text/html; charset=UTF-8"), Some("UTF-8"));
        assert_eq!(charset("text/html;charset=\"utf-8\""), Some("utf-8"));
        assert_eq!(charset("application/json"), None);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(Payload::from_text("R1")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "encodedText": "R1",
                "isEncoded": false,
                "isGzip": false,
                "isDeflate": false
            })
        );
    }
}
