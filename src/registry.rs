//! Transport registry
//!
//! Maps URL schemes to the factory that builds request objects for them. A
//! capture session temporarily replaces the `http`/`https` bindings and puts
//! the previous ones back when it ends. Only one session may be active on a
//! registry at a time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::error::{ConfigurationError, Result};
use crate::request::{LiveRequestFactory, WebRequest};

/// Schemes a session takes over by default
pub const DEFAULT_SCHEMES: [&str; 2] = ["http", "https"];

/// Builds request objects for URLs
pub trait RequestFactory: Send + Sync {
    fn create(&self, url: &Url) -> Result<Box<dyn WebRequest>>;
}

impl<F> RequestFactory for F
where
    F: Fn(&Url) -> Result<Box<dyn WebRequest>> + Send + Sync,
{
    fn create(&self, url: &Url) -> Result<Box<dyn WebRequest>> {
        self(url)
    }
}

type Bindings = HashMap<String, Arc<dyn RequestFactory>>;

/// Bindings to restore when the active session ends
struct Snapshot {
    bindings: Bindings,
    schemes: Vec<String>,
}

/// Scheme → factory bindings with scoped, reversible overrides
pub struct TransportRegistry {
    bindings: RwLock<Bindings>,
    snapshot: Mutex<Option<Snapshot>>,
}

impl TransportRegistry {
    /// Registry with `http` and `https` bound to the shared live factory
    pub fn new() -> Self {
        Self::with_live(LiveRequestFactory::shared())
    }

    pub fn with_live(factory: Arc<dyn RequestFactory>) -> Self {
        let bindings = DEFAULT_SCHEMES
            .iter()
            .map(|scheme| (scheme.to_string(), Arc::clone(&factory)))
            .collect();
        Self {
            bindings: RwLock::new(bindings),
            snapshot: Mutex::new(None),
        }
    }

    /// Permanently bind a scheme
    ///
    /// During a session the binding also lands in the snapshot, so it
    /// outlives the session. A scheme the session took over keeps routing
    /// through the session until it ends.
    pub fn register(&self, scheme: &str, factory: Arc<dyn RequestFactory>) {
        let scheme = scheme.to_ascii_lowercase();
        let mut snapshot = self.snapshot.lock();
        if let Some(ref mut snapshot) = *snapshot {
            snapshot.bindings.insert(scheme.clone(), Arc::clone(&factory));
            if snapshot.schemes.contains(&scheme) {
                return;
            }
        }
        self.bindings.write().insert(scheme, factory);
    }

    pub fn binding(&self, scheme: &str) -> Option<Arc<dyn RequestFactory>> {
        self.bindings
            .read()
            .get(&scheme.to_ascii_lowercase())
            .cloned()
    }

    /// Build a request object through the active binding for the URL's scheme
    pub fn create(&self, url: &Url) -> Result<Box<dyn WebRequest>> {
        let factory = self
            .binding(url.scheme())
            .ok_or_else(|| ConfigurationError::UnsupportedScheme(url.scheme().to_string()))?;
        factory.create(url)
    }

    pub fn create_str(&self, url: &str) -> Result<Box<dyn WebRequest>> {
        let url = Url::parse(url)?;
        self.create(&url)
    }

    /// Route `http` and `https` through `factory` until the guard is dropped
    pub fn begin(&self, factory: Arc<dyn RequestFactory>) -> Result<SessionGuard<'_>> {
        self.begin_for(&DEFAULT_SCHEMES, factory)
    }

    pub fn begin_for(
        &self,
        schemes: &[&str],
        factory: Arc<dyn RequestFactory>,
    ) -> Result<SessionGuard<'_>> {
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_some() {
            return Err(ConfigurationError::SessionActive.into());
        }

        let schemes: Vec<String> = schemes.iter().map(|s| s.to_ascii_lowercase()).collect();
        let mut bindings = self.bindings.write();
        *snapshot = Some(Snapshot {
            bindings: bindings.clone(),
            schemes: schemes.clone(),
        });
        for scheme in &schemes {
            bindings.insert(scheme.clone(), Arc::clone(&factory));
        }
        info!("Capture session started for schemes {:?}", schemes);

        Ok(SessionGuard {
            registry: self,
            ended: false,
        })
    }

    /// Restore the bindings captured by `begin`; false if no session was active
    pub fn end(&self) -> bool {
        let mut snapshot = self.snapshot.lock();
        match snapshot.take() {
            Some(previous) => {
                *self.bindings.write() = previous.bindings;
                info!("Capture session ended");
                true
            }
            None => {
                warn!("end() called without an active capture session");
                false
            }
        }
    }

    pub fn is_session_active(&self) -> bool {
        self.snapshot.lock().is_some()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<_> = self.bindings.read().keys().cloned().collect();
        schemes.sort();
        f.debug_struct("TransportRegistry")
            .field("schemes", &schemes)
            .field("session_active", &self.is_session_active())
            .finish()
    }
}

/// Ends the capture session when closed or dropped
#[must_use = "the session ends as soon as the guard is dropped"]
pub struct SessionGuard<'a> {
    registry: &'a TransportRegistry,
    ended: bool,
}

impl SessionGuard<'_> {
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.ended {
            self.ended = true;
            self.registry.end();
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
