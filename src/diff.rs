//! Request diff analysis
//!
//! Compares an intercepted request against recorded ones to explain why no
//! recording matched: method, URL, header and payload differences.

use serde::Serialize;
use similar::TextDiff;

use crate::exchange::CapturedExchange;
use crate::headers::HeaderMultimap;

/// Difference between a recorded request and an intercepted one
#[derive(Debug, Serialize)]
pub struct RequestDiff {
    pub method: String,
    pub url: String,
    pub method_diff: Option<FieldDiff>,
    pub url_diff: Option<FieldDiff>,
    pub header_diffs: Vec<HeaderDiff>,
    pub payload_diff: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FieldDiff {
    pub recorded: String,
    pub intercepted: String,
}

#[derive(Debug, Serialize)]
pub struct HeaderDiff {
    pub name: String,
    pub recorded: Option<String>,
    pub intercepted: Option<String>,
    pub diff_type: HeaderDiffType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderDiffType {
    Added,
    Removed,
    Changed,
}

impl RequestDiff {
    pub fn is_empty(&self) -> bool {
        self.method_diff.is_none()
            && self.url_diff.is_none()
            && self.header_diffs.is_empty()
            && self.payload_diff.is_none()
    }

    /// Weighted distance; a different URL outweighs everything else
    pub fn score(&self) -> usize {
        let mut score = self.header_diffs.len();
        if self.url_diff.is_some() {
            score += 100;
        }
        if self.method_diff.is_some() {
            score += 10;
        }
        if self.payload_diff.is_some() {
            score += 5;
        }
        score
    }

    /// Human-readable explanation
    pub fn describe(&self) -> String {
        let mut lines = vec![format!("{} {}", self.method, self.url)];

        if let Some(ref diff) = self.method_diff {
            lines.push(format!(
                "  method: recorded {}, got {}",
                diff.recorded, diff.intercepted
            ));
        }
        if let Some(ref diff) = self.url_diff {
            lines.push(format!("  url: recorded {}, got {}", diff.recorded, diff.intercepted));
        }
        for header in &self.header_diffs {
            let marker = match header.diff_type {
                HeaderDiffType::Added => '+',
                HeaderDiffType::Removed => '-',
                HeaderDiffType::Changed => '~',
            };
            lines.push(format!(
                "  {} {}: {} -> {}",
                marker,
                header.name,
                header.recorded.as_deref().unwrap_or("-"),
                header.intercepted.as_deref().unwrap_or("-")
            ));
        }
        if let Some(ref payload) = self.payload_diff {
            lines.push("  payload:".to_string());
            lines.extend(payload.lines().map(|l| format!("    {}", l)));
        }

        lines.join("\n")
    }
}

/// Compare a recorded request with an intercepted one (both as exchanges)
pub fn diff_requests(recorded: &CapturedExchange, intercepted: &CapturedExchange) -> RequestDiff {
    let method_diff = (!recorded.method.eq_ignore_ascii_case(&intercepted.method)).then(|| FieldDiff {
        recorded: recorded.method.clone(),
        intercepted: intercepted.method.clone(),
    });
    let url_diff = (!recorded.url.eq_ignore_ascii_case(&intercepted.url)).then(|| FieldDiff {
        recorded: recorded.url.clone(),
        intercepted: intercepted.url.clone(),
    });

    let recorded_text = &recorded.request_payload.encoded_text;
    let intercepted_text = &intercepted.request_payload.encoded_text;
    let payload_diff = (recorded_text.to_lowercase() != intercepted_text.to_lowercase()).then(|| {
        TextDiff::from_lines(recorded_text.as_str(), intercepted_text.as_str())
            .unified_diff()
            .header("recorded", "intercepted")
            .to_string()
    });

    RequestDiff {
        method: recorded.method.clone(),
        url: recorded.url.clone(),
        method_diff,
        url_diff,
        header_diffs: diff_headers(&recorded.request_headers, &intercepted.request_headers),
        payload_diff,
    }
}

fn diff_headers(recorded: &HeaderMultimap, intercepted: &HeaderMultimap) -> Vec<HeaderDiff> {
    let mut diffs = Vec::new();

    for (name, values) in recorded.iter() {
        match intercepted.get(name) {
            None => diffs.push(HeaderDiff {
                name: name.to_string(),
                recorded: Some(values.join(", ")),
                intercepted: None,
                diff_type: HeaderDiffType::Removed,
            }),
            Some(other) if other != values => diffs.push(HeaderDiff {
                name: name.to_string(),
                recorded: Some(values.join(", ")),
                intercepted: Some(other.join(", ")),
                diff_type: HeaderDiffType::Changed,
            }),
            Some(_) => {}
        }
    }

    for (name, values) in intercepted.iter() {
        if !recorded.contains(name) {
            diffs.push(HeaderDiff {
                name: name.to_string(),
                recorded: None,
                intercepted: Some(values.join(", ")),
                diff_type: HeaderDiffType::Added,
            });
        }
    }

    diffs
}

/// The recorded request closest to the intercepted one
pub fn closest<'a>(
    intercepted: &CapturedExchange,
    candidates: &'a [CapturedExchange],
) -> Option<(&'a CapturedExchange, RequestDiff)> {
    candidates
        .iter()
        .map(|candidate| (candidate, diff_requests(candidate, intercepted)))
        .min_by_key(|(_, diff)| diff.score())
}
