//! Thin HTTP client with scheduling taps
//!
//! [`HttpClient`] builds its live request before any transport registry is
//! consulted, the way higher-level client wrappers do. Each
//! [`RequestTap`] sees the scheduled work first and may swap that handle out;
//! [`RegistryTap`] replaces it with one built by the registry's active
//! binding, so an open capture session sees traffic from this client too.

use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::Method;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::registry::{RequestFactory, TransportRegistry};
use crate::request::{LiveRequestFactory, WebRequest};
use crate::response::WebResponse;

/// Work scheduled by [`HttpClient`] but not yet executed
pub struct PendingRequest {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    handle: Box<dyn WebRequest>,
}

impl PendingRequest {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The low-level request that will carry this work
    pub fn handle(&self) -> &dyn WebRequest {
        self.handle.as_ref()
    }

    /// Install a different low-level request, returning the previous one
    pub fn replace_handle(&mut self, handle: Box<dyn WebRequest>) -> Box<dyn WebRequest> {
        std::mem::replace(&mut self.handle, handle)
    }

    /// Apply method, headers and body to the installed handle and send it
    pub async fn execute(self) -> Result<WebResponse> {
        let PendingRequest {
            method,
            headers,
            body,
            mut handle,
            ..
        } = self;

        handle.set_method(method);
        handle.headers_mut().extend(headers);
        if let Some(body) = body {
            // the body goes through whichever handle is installed now
            let mut stream = handle.request_stream_async().await?;
            stream.write_all(&body)?;
            stream.flush()?;
        }
        handle.get_response().await
    }
}

/// Observes or rewrites work before it executes
pub trait RequestTap: Send + Sync {
    fn on_scheduled(&self, pending: &mut PendingRequest) -> Result<()>;
}

impl<F> RequestTap for F
where
    F: Fn(&mut PendingRequest) -> Result<()> + Send + Sync,
{
    fn on_scheduled(&self, pending: &mut PendingRequest) -> Result<()> {
        self(pending)
    }
}

/// Routes scheduled work through a [`TransportRegistry`]
pub struct RegistryTap {
    registry: Arc<TransportRegistry>,
}

impl RegistryTap {
    pub fn new(registry: Arc<TransportRegistry>) -> Self {
        Self { registry }
    }
}

impl RequestTap for RegistryTap {
    fn on_scheduled(&self, pending: &mut PendingRequest) -> Result<()> {
        let handle = self.registry.create(&pending.url)?;
        debug!("Swapped request handle for {} {}", pending.method, pending.url);
        pending.replace_handle(handle);
        Ok(())
    }
}

/// Minimal client that pre-builds live requests and runs taps before sending
#[derive(Clone)]
pub struct HttpClient {
    live: Arc<dyn RequestFactory>,
    taps: Vec<Arc<dyn RequestTap>>,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::with_live(LiveRequestFactory::shared())
    }

    pub fn with_live(live: Arc<dyn RequestFactory>) -> Self {
        Self {
            live,
            taps: Vec::new(),
        }
    }

    pub fn with_tap(mut self, tap: impl RequestTap + 'static) -> Self {
        self.taps.push(Arc::new(tap));
        self
    }

    /// Let the registry's active binding serve this client's requests
    pub fn with_registry(self, registry: Arc<TransportRegistry>) -> Self {
        self.with_tap(RegistryTap::new(registry))
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            method,
            url: Url::parse(url).map_err(Error::from),
            headers: HeaderMap::new(),
            body: None,
            error: None,
        }
    }

    pub fn get(&self, url: &str) -> RequestBuilder<'_> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder<'_> {
        self.request(Method::POST, url)
    }

    fn schedule(
        &self,
        url: Url,
        method: Method,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<PendingRequest> {
        let handle = self.live.create(&url)?;
        let mut pending = PendingRequest {
            url,
            method,
            headers,
            body,
            handle,
        };
        for tap in &self.taps {
            tap.on_scheduled(&mut pending)?;
        }
        Ok(pending)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a single [`HttpClient`] request
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    url: Result<Url>,
    headers: HeaderMap,
    body: Option<Bytes>,
    error: Option<Error>,
}

impl RequestBuilder<'_> {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(value).ok());
        match parsed {
            Some((name, value)) => {
                self.headers.append(name, value);
            }
            None => {
                self.error.get_or_insert_with(|| {
                    Error::UnsupportedShape(format!("invalid header: {}", name))
                });
            }
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        let text: String = text.into();
        self.content_type_if_unset("text/plain; charset=utf-8")
            .body(text)
    }

    pub fn json<T: Serialize>(self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => self.content_type_if_unset("application/json").body(body),
            Err(err) => {
                let mut builder = self;
                builder.error.get_or_insert(err.into());
                builder
            }
        }
    }

    fn content_type_if_unset(mut self, content_type: &'static str) -> Self {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        self
    }

    /// Build the live request and run every tap, without sending
    pub fn schedule(self) -> Result<PendingRequest> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.client
            .schedule(self.url?, self.method, self.headers, self.body)
    }

    pub async fn send(self) -> Result<WebResponse> {
        self.schedule()?.execute().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::InterceptorFactory;
    use crate::recorder::RecorderFactory;
    use crate::request::TransportConfig;
    use crate::session::CaptureSession;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn live() -> Arc<LiveRequestFactory> {
        Arc::new(LiveRequestFactory::new(TransportConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_sends_live_without_taps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"n":1}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
            .mount(&server)
            .await;

        let client = HttpClient::with_live(live());
        let response = client
            .post(&format!("{}/items", server.uri()))
            .json(&serde_json::json!({"n": 1}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "stored");
    }

    #[tokio::test]
    async fn test_registry_tap_routes_body_to_interceptor() {
        let registry = Arc::new(TransportRegistry::with_live(live()));
        let client = HttpClient::with_live(live()).with_registry(Arc::clone(&registry));

        let factory = InterceptorFactory::from_fn(|req| async move {
            let echo = format!("{} {}", req.method(), req.body_text());
            req.respond_synthetic().text(echo).build()
        });
        let _session = registry.begin(Arc::new(factory)).unwrap();

        let response = client
            .post("http://intercepted.test/echo")
            .text("swapped body")
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "POST swapped body");
    }

    #[tokio::test]
    async fn test_registry_tap_feeds_recorder() {
        let server = MockServer::start().await;
        Mock::given(path("/recorded"))
            .respond_with(ResponseTemplate::new(200).set_body_string("live"))
            .mount(&server)
            .await;

        let registry = Arc::new(TransportRegistry::with_live(live()));
        let client = HttpClient::with_live(live()).with_registry(Arc::clone(&registry));
        let session = CaptureSession::new();

        {
            let _guard = registry
                .begin(Arc::new(RecorderFactory::with_live(session.clone(), live())))
                .unwrap();
            let response = client
                .get(&format!("{}/recorded", server.uri()))
                .header("x-trace", "1")
                .send()
                .await
                .unwrap();
            assert_eq!(response.text().await.unwrap(), "live");
        }

        let captured = session.get(0).unwrap();
        assert_eq!(captured.request_headers.first("x-trace"), Some("1"));
        assert_eq!(captured.response_body.encoded_text, "live");
    }

    #[tokio::test]
    async fn test_failing_tap_stops_before_io() {
        let server = MockServer::start().await;
        Mock::given(path("/never"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = HttpClient::with_live(live()).with_tap(|_pending: &mut PendingRequest| -> Result<()> {
            Err(Error::Capture("tap refused".to_string()))
        });
        let err = client
            .get(&format!("{}/never", server.uri()))
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Capture(_)));
    }

    #[test]
    fn test_schedule_exposes_pending_work() {
        let client = HttpClient::with_live(live()).with_tap(|pending: &mut PendingRequest| -> Result<()> {
            pending.headers_mut().insert("x-tapped", HeaderValue::from_static("yes"));
            Ok(())
        });
        let pending = client
            .post("http://example.test/")
            .body("abc")
            .schedule()
            .unwrap();

        assert_eq!(pending.method(), Method::POST);
        assert_eq!(pending.headers()["x-tapped"], "yes");
        assert_eq!(pending.body().unwrap(), "abc");
        assert_eq!(pending.handle().url().as_str(), "http://example.test/");
    }

    #[test]
    fn test_builder_errors_surface_on_schedule() {
        let client = HttpClient::with_live(live());
        assert!(matches!(
            client.get("not a url").schedule().err(),
            Some(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            client.get("http://x/").header("bad header", "v").schedule().err(),
            Some(Error::UnsupportedShape(_))
        ));
    }
}
