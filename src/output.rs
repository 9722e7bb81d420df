//! Output formatting for capture sessions
//!
//! Supports pretty (colored terminal), JSON, and compact formats.

use colored::Colorize;

use crate::codec::Payload;
use crate::error::Result;
use crate::exchange::CapturedExchange;
use crate::session::CaptureDocument;

/// Render a capture document in pretty format
pub fn render_document_pretty(document: &CaptureDocument) -> String {
    let mut out = Vec::new();
    out.push(String::new());
    out.push(format!("{} {}", "wiretap".bold().cyan(), "capture session".dimmed()));
    out.push("─".repeat(60).dimmed().to_string());
    out.push(String::new());

    if let Some(ref source) = document.source {
        out.push(format!("  {} {}", "Source:".bold(), source));
    }
    if let Some(created) = document.created_at {
        out.push(format!(
            "  {} {}",
            "Created:".bold(),
            created.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    out.push(format!("  {} {}", "Exchanges:".bold(), document.requests.len()));

    let failures = document
        .requests
        .iter()
        .filter(|e| e.response_exception.is_some())
        .count();
    if failures > 0 {
        out.push(format!("  {} {}", "Failures:".bold(), failures.to_string().red()));
    }
    out.push(String::new());

    for (index, exchange) in document.requests.iter().enumerate() {
        out.extend(render_exchange(index, exchange));
    }

    out.push("─".repeat(60).dimmed().to_string());
    out.join("\n")
}

pub fn print_document_pretty(document: &CaptureDocument) {
    println!("{}", render_document_pretty(document));
}

fn render_exchange(index: usize, exchange: &CapturedExchange) -> Vec<String> {
    let mut lines = vec![format!(
        "    {} {} {} {}",
        format!("#{}", index).dimmed(),
        exchange.method.bold(),
        truncate_url(&exchange.url, 50),
        format_status(exchange.response_status_code)
    )];

    if !exchange.request_payload.is_empty() {
        lines.push(format!(
            "      {} {}",
            "Request:".dimmed(),
            describe_payload(&exchange.request_payload)
        ));
    }
    if !exchange.response_body.is_empty() {
        lines.push(format!(
            "      {} {}",
            "Response:".dimmed(),
            describe_payload(&exchange.response_body)
        ));
    }
    if let Some(ref exception) = exchange.response_exception {
        lines.push(format!("      {} {}", "Error:".red(), exception.message));
    }
    lines.push(String::new());
    lines
}

fn describe_payload(payload: &Payload) -> String {
    let mut flags = Vec::new();
    if payload.is_encoded {
        flags.push("base64");
    }
    if payload.is_gzip {
        flags.push("gzip");
    }
    if payload.is_deflate {
        flags.push("deflate");
    }

    let preview = if payload.is_encoded {
        format!("{} chars", payload.encoded_text.len())
    } else {
        truncate(&payload.encoded_text.replace('\n', " "), 40)
    };
    if flags.is_empty() {
        preview
    } else {
        format!("{} [{}]", preview, flags.join(", "))
    }
}

/// Format status code with color
fn format_status(status: u16) -> String {
    if status == 0 {
        "N/A".dimmed().to_string()
    } else if status >= 500 {
        status.to_string().red().to_string()
    } else if status >= 400 {
        status.to_string().yellow().to_string()
    } else if status >= 300 {
        status.to_string().cyan().to_string()
    } else {
        status.to_string().green().to_string()
    }
}

/// Capture document as JSON
pub fn render_document_json(document: &CaptureDocument) -> Result<String> {
    Ok(serde_json::to_string_pretty(document)?)
}

/// One line per exchange
pub fn render_document_compact(document: &CaptureDocument) -> String {
    document
        .requests
        .iter()
        .map(|exchange| {
            let outcome = match exchange.response_exception {
                Some(ref exception) => format!("ERR {}", exception.message),
                None => exchange.response_status_code.to_string(),
            };
            format!("{} {} {}", exchange.method, exchange.url, outcome)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate a string
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}

/// Truncate URL, keeping the path visible
fn truncate_url(url: &str, max_len: usize) -> String {
    if url.len() <= max_len {
        return url.to_string();
    }

    if let Ok(parsed) = url::Url::parse(url) {
        let path = parsed.path();
        if path.len() <= max_len {
            return format!("...{}", path);
        }
        return format!("...{}", &path[path.len() - max_len + 3..]);
    }

    truncate(url, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransportStatus};
    use crate::exchange::ExceptionRecord;

    fn document() -> CaptureDocument {
        CaptureDocument::new(vec![
            CapturedExchange::new("GET", "http://x/1").with_response(200, "R1"),
            CapturedExchange::new("GET", "http://x/down").with_exception(ExceptionRecord {
                message: "refused".to_string(),
                kind: ErrorKind::Transport,
                transport_status: Some(TransportStatus::ConnectFailure),
            }),
        ])
        .with_source("fixture.har".to_string())
    }

    #[test]
    fn test_compact() {
        assert_eq!(
            render_document_compact(&document()),
            "GET http://x/1 200\nGET http://x/down ERR refused"
        );
    }

    #[test]
    fn test_json_is_document() {
        let json = render_document_json(&document()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["source"], "fixture.har");
        assert_eq!(value["requests"][0]["url"], "http://x/1");
    }

    #[test]
    fn test_pretty_mentions_each_exchange() {
        let pretty = render_document_pretty(&document());
        assert!(pretty.contains("fixture.har"));
        assert!(pretty.contains("http://x/1"));
        assert!(pretty.contains("refused"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 5), "éé...");
    }

    #[test]
    fn test_truncate_url_keeps_path() {
        let url = "https://very-long-host-name.example.com/api/v1/users";
        assert_eq!(truncate_url(url, 20), ".../api/v1/users");
    }
}
