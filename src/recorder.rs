//! Recording request objects
//!
//! A [`Recorder`] wraps a real request object and lets it do its job, while
//! mirroring the request body and reading the response into a
//! [`CapturedExchange`]. The caller still gets a response whose body has not
//! been consumed.

use std::io::Write;
use std::sync::Arc;

use futures::future::BoxFuture;
use http::header::HeaderMap;
use http::Method;
use reqwest::cookie::Jar;
use tracing::{debug, warn};
use url::Url;

use crate::codec::Payload;
use crate::error::{Error, Result};
use crate::exchange::{CapturedExchange, ExceptionRecord};
use crate::headers::HeaderMultimap;
use crate::registry::RequestFactory;
use crate::request::{self, BodyBuffer, LiveRequestFactory, RequestStream, WebRequest};
use crate::response::WebResponse;
use crate::session::{CaptureSession, ExchangeHandle};

/// Forwards writes to the real stream and mirrors them into a shadow buffer
///
/// Dropping the tee closes only the real stream; the shadow stays readable.
pub struct TeeWriter {
    primary: RequestStream,
    shadow: BodyBuffer,
}

impl TeeWriter {
    pub fn new(primary: RequestStream, shadow: BodyBuffer) -> Self {
        Self { primary, shadow }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.primary.write(buf)?;
        self.shadow.write_all(&buf[..written])?;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.primary.flush()
    }
}

/// A real request whose traffic is appended to a capture session
pub struct Recorder {
    inner: Box<dyn WebRequest>,
    session: CaptureSession,
    shadow: Option<BodyBuffer>,
}

impl Recorder {
    /// Record a live request into a fresh session
    pub fn new(url: Url) -> Self {
        Self::with_session(CaptureSession::new(), url)
    }

    /// Record a live request into an existing session
    pub fn with_session(session: CaptureSession, url: Url) -> Self {
        let live = LiveRequestFactory::shared();
        Self::wrap(session, Box::new(live.request(url)))
    }

    /// Record any request object
    pub fn wrap(session: CaptureSession, inner: Box<dyn WebRequest>) -> Self {
        Self {
            inner,
            session,
            shadow: None,
        }
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    fn shadow(&mut self) -> BodyBuffer {
        self.shadow.get_or_insert_with(BodyBuffer::new).clone()
    }

    fn captured_request(&self) -> CapturedExchange {
        let headers = self.inner.headers();
        let content_type = request::content_type(headers);
        let body = self
            .shadow
            .as_ref()
            .map(BodyBuffer::to_bytes)
            .unwrap_or_default();

        let mut exchange = CapturedExchange::new(self.inner.method().as_str(), self.inner.url().as_str());
        exchange.request_headers = HeaderMultimap::from_header_map(headers);
        exchange.request_cookies = self
            .inner
            .cookie_jar()
            .and_then(|jar| request::cookie_snapshot(&jar, self.inner.url()));
        exchange.request_payload = Payload::from_request(&body, content_type.as_deref());
        exchange
    }
}

impl WebRequest for Recorder {
    fn url(&self) -> &Url {
        self.inner.url()
    }

    fn method(&self) -> &Method {
        self.inner.method()
    }

    fn set_method(&mut self, method: Method) {
        self.inner.set_method(method);
    }

    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn cookie_jar(&self) -> Option<Arc<Jar>> {
        self.inner.cookie_jar()
    }

    fn automatic_decompression(&self) -> bool {
        self.inner.automatic_decompression()
    }

    fn request_stream(&mut self) -> Result<RequestStream> {
        let shadow = self.shadow();
        let primary = self.inner.request_stream()?;
        Ok(Box::new(TeeWriter::new(primary, shadow)))
    }

    fn request_stream_async(&mut self) -> BoxFuture<'_, Result<RequestStream>> {
        let shadow = self.shadow();
        Box::pin(async move {
            let primary = self.inner.request_stream_async().await?;
            Ok(Box::new(TeeWriter::new(primary, shadow)) as RequestStream)
        })
    }

    fn get_response(self: Box<Self>) -> BoxFuture<'static, Result<WebResponse>> {
        let exchange = self.captured_request();
        let Recorder { inner, session, .. } = *self;
        debug!("Recording {} {}", exchange.method, exchange.url);
        let slot = session.push(exchange);

        Box::pin(async move {
            match inner.get_response().await {
                Ok(mut response) => {
                    capture_response(&slot, &mut response).await;
                    Ok(response)
                }
                Err(Error::Transport(mut err)) => {
                    slot.write().response_exception = Some(ExceptionRecord::from_transport(&err));
                    if let Some(response) = err.response_mut() {
                        capture_response(&slot, response).await;
                    }
                    Err(Error::Transport(err))
                }
                Err(err) => {
                    slot.write().response_exception = Some(ExceptionRecord::from_error(&err));
                    Err(err)
                }
            }
        })
    }
}

/// Copy status, headers and body into the slot, restoring an unread body
async fn capture_response(slot: &ExchangeHandle, response: &mut WebResponse) {
    {
        let mut exchange = slot.write();
        exchange.response_status_code = response.status().as_u16();
        exchange.response_headers = HeaderMultimap::from_header_map(response.headers());
    }

    let body = response.take_body();
    let payload = match body.bytes().await {
        Ok(bytes) => {
            let payload =
                Payload::from_response(&bytes, response.content_type(), response.charset());
            response.set_body(bytes);
            payload
        }
        Err(err) => {
            // the caller sees the same read failure the recorder did
            response.fail_body(err.to_string());
            let err = Error::Capture(err.to_string());
            warn!("Recording degraded for {}: {}", response.url(), err);
            Payload::from_text(format!("<wiretap: {}>", err))
        }
    };
    slot.write().response_body = payload;
}

/// Creates [`Recorder`]s appending to one shared session
pub struct RecorderFactory {
    session: CaptureSession,
    live: Arc<dyn RequestFactory>,
}

impl RecorderFactory {
    pub fn new(session: CaptureSession) -> Self {
        Self::with_live(session, LiveRequestFactory::shared())
    }

    /// Record requests built by `live`, which must not route back through a registry session
    pub fn with_live(session: CaptureSession, live: Arc<dyn RequestFactory>) -> Self {
        Self { session, live }
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }
}

impl RequestFactory for RecorderFactory {
    fn create(&self, url: &Url) -> Result<Box<dyn WebRequest>> {
        let inner = self.live.create(url)?;
        Ok(Box::new(Recorder::wrap(self.session.clone(), inner)))
    }
}
