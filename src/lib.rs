//! wiretap - record, intercept and replay HTTP exchanges
//!
//! Requests are built through a [`TransportRegistry`]. While a capture
//! session is open, the registry hands out request objects from the session's
//! factory instead of live ones:
//!
//! - a [`Recorder`] performs the real call and appends the exchange to a
//!   [`CaptureSession`];
//! - an [`Interceptor`] answers from a [`Responder`], for example a
//!   [`ReplayMatcher`] serving previously recorded exchanges.
//!
//! Either way the caller gets a [`WebResponse`] it cannot tell apart from a
//! live one.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wiretap::{InterceptorFactory, ReplayMatcher, TransportRegistry};
//!
//! # async fn demo() -> wiretap::Result<()> {
//! let registry = TransportRegistry::new();
//! let session = wiretap::load_session("fixtures/session.json")?;
//! let matcher = ReplayMatcher::new(session).allow_replaying_multiple_times(false);
//!
//! let _guard = registry.begin(Arc::new(InterceptorFactory::new(Arc::new(matcher))))?;
//! let response = registry.create_str("https://api.example.com/users")?.get_response().await?;
//! println!("{}", response.text().await?);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod diff;
pub mod error;
pub mod exchange;
pub mod har;
pub mod headers;
pub mod interceptor;
pub mod output;
pub mod recorder;
pub mod registry;
pub mod replay;
pub mod request;
pub mod response;
pub mod session;

pub use client::{HttpClient, PendingRequest, RegistryTap, RequestTap};
pub use codec::Payload;
pub use error::{
    ConfigurationError, Error, ErrorKind, Result, TransportError, TransportStatus,
};
pub use exchange::{CapturedExchange, ExceptionRecord};
pub use headers::HeaderMultimap;
pub use interceptor::{FnResponder, InterceptedRequest, Interceptor, InterceptorFactory, Responder};
pub use recorder::{Recorder, RecorderFactory};
pub use registry::{RequestFactory, SessionGuard, TransportRegistry};
pub use replay::{NotFoundBehavior, ReplayConfig, ReplayMatcher};
pub use request::{LiveRequest, LiveRequestFactory, RequestStream, TransportConfig, WebRequest};
pub use response::{ResponseBuilder, WebResponse};
pub use session::{
    load_document, load_session, save_document, save_session, CaptureDocument, CaptureSession,
};
