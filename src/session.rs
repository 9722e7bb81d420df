//! Capture sessions and their on-disk format
//!
//! A [`CaptureSession`] is the ordered list of exchanges a recorder appends to
//! and a replay matcher reads from. Clones share the same list.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::exchange::CapturedExchange;

/// A single entry of a session, shared between the session and its writer
pub type ExchangeHandle = Arc<RwLock<CapturedExchange>>;

const FORMAT_VERSION: &str = "1.0";

/// Shared, ordered collection of captured exchanges
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    entries: Arc<RwLock<Vec<ExchangeHandle>>>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_exchanges(exchanges: impl IntoIterator<Item = CapturedExchange>) -> Self {
        let session = Self::new();
        session.extend(exchanges);
        session
    }

    /// Append an exchange, returning a handle for filling in the rest later
    pub fn push(&self, exchange: CapturedExchange) -> ExchangeHandle {
        let handle = Arc::new(RwLock::new(exchange));
        self.entries.write().push(Arc::clone(&handle));
        handle
    }

    pub fn extend(&self, exchanges: impl IntoIterator<Item = CapturedExchange>) {
        let handles: Vec<_> = exchanges
            .into_iter()
            .map(|e| Arc::new(RwLock::new(e)))
            .collect();
        self.entries.write().extend(handles);
    }

    pub fn remove(&self, index: usize) -> Option<CapturedExchange> {
        let mut entries = self.entries.write();
        if index >= entries.len() {
            return None;
        }
        let handle = entries.remove(index);
        let exchange = handle.read().clone();
        Some(exchange)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Handles to every entry, in order
    pub fn handles(&self) -> Vec<ExchangeHandle> {
        self.entries.read().clone()
    }

    pub fn get(&self, index: usize) -> Option<CapturedExchange> {
        self.entries.read().get(index).map(|h| h.read().clone())
    }

    /// Copy of every entry, in order
    pub fn snapshot(&self) -> Vec<CapturedExchange> {
        self.entries.read().iter().map(|h| h.read().clone()).collect()
    }

    pub fn to_document(&self) -> CaptureDocument {
        CaptureDocument::new(self.snapshot())
    }

    pub fn from_document(document: CaptureDocument) -> Self {
        Self::from_exchanges(document.requests)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: CaptureDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(document))
    }
}

/// Persisted form of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDocument {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub requests: Vec<CapturedExchange>,
}

impl CaptureDocument {
    pub fn new(requests: Vec<CapturedExchange>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            source: None,
            created_at: Some(chrono::Utc::now()),
            requests,
        }
    }

    pub fn with_source(mut self, source: String) -> Self {
        self.source = Some(source);
        self
    }
}

/// Load a session from a file
pub fn load_session(path: impl AsRef<Path>) -> Result<CaptureSession> {
    Ok(CaptureSession::from_document(load_document(path)?))
}

pub fn load_document(path: impl AsRef<Path>) -> Result<CaptureDocument> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let document: CaptureDocument = serde_json::from_str(&content)?;
    debug!(
        "Loaded {} captured exchanges from {:?}",
        document.requests.len(),
        path
    );
    Ok(document)
}

/// Save a session to a file
pub fn save_session(session: &CaptureSession, path: impl AsRef<Path>) -> Result<()> {
    save_document(&session.to_document(), path)
}

pub fn save_document(document: &CaptureDocument, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let content = serde_json::to_string_pretty(document)?;
    std::fs::write(path, content)?;
    debug!(
        "Saved {} captured exchanges to {:?}",
        document.requests.len(),
        path
    );
    Ok(())
}
