//! Request objects
//!
//! [`WebRequest`] is the contract every request handle fulfils: callers set
//! method and headers, write the body through [`WebRequest::request_stream`],
//! then ask for the response. [`LiveRequest`] is the real network
//! implementation backed by `reqwest`.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use http::header::{HeaderMap, CONTENT_TYPE};
use http::Method;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use reqwest::cookie::Jar;
use tracing::debug;
use url::Url;

use crate::error::{Result, TransportError};
use crate::registry::RequestFactory;
use crate::response::WebResponse;

/// Writable request body handed out by a request object
pub type RequestStream = Box<dyn Write + Send>;

/// A request handle, answered exactly once
pub trait WebRequest: Send {
    fn url(&self) -> &Url;

    fn method(&self) -> &Method;

    fn set_method(&mut self, method: Method);

    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Cookie store consulted and updated by this request
    fn cookie_jar(&self) -> Option<Arc<Jar>> {
        None
    }

    /// Whether compressed responses are handed back decompressed
    fn automatic_decompression(&self) -> bool {
        true
    }

    fn request_stream(&mut self) -> Result<RequestStream>;

    /// Asynchronous form of [`WebRequest::request_stream`]
    fn request_stream_async(&mut self) -> BoxFuture<'_, Result<RequestStream>> {
        future::ready(self.request_stream()).boxed()
    }

    fn get_response(self: Box<Self>) -> BoxFuture<'static, Result<WebResponse>>;
}

/// Content type declared on a header map
pub(crate) fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Cookie header the jar would send to a URL
pub(crate) fn cookie_snapshot(jar: &Jar, url: &Url) -> Option<String> {
    use reqwest::cookie::CookieStore;

    jar.cookies(url)
        .and_then(|v| v.to_str().ok().map(str::to_string))
}

/// Shared in-memory body buffer
#[derive(Debug, Clone, Default)]
pub struct BodyBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl BodyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Write for BodyBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Configuration for the live HTTP client
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub user_agent: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: None,
        }
    }
}

static SHARED_LIVE: Lazy<Arc<LiveRequestFactory>> = Lazy::new(|| {
    let factory = LiveRequestFactory::new(TransportConfig::default()).unwrap_or_else(|e| {
        tracing::warn!("Falling back to a default HTTP client: {}", e);
        LiveRequestFactory::from_client(reqwest::Client::new(), Arc::new(Jar::default()))
    });
    Arc::new(factory)
});

/// Creates [`LiveRequest`]s sharing one client and cookie jar
#[derive(Debug, Clone)]
pub struct LiveRequestFactory {
    client: reqwest::Client,
    cookies: Arc<Jar>,
}

impl LiveRequestFactory {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::default()
        } else {
            reqwest::redirect::Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(redirect)
            .cookie_provider(Arc::clone(&cookies));
        if let Some(ref agent) = config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let client = builder.build().map_err(TransportError::from)?;

        Ok(Self { client, cookies })
    }

    pub fn from_client(client: reqwest::Client, cookies: Arc<Jar>) -> Self {
        Self { client, cookies }
    }

    /// Process-wide factory built from the default configuration
    pub fn shared() -> Arc<LiveRequestFactory> {
        Arc::clone(&SHARED_LIVE)
    }

    pub fn cookies(&self) -> Arc<Jar> {
        Arc::clone(&self.cookies)
    }

    pub fn request(&self, url: Url) -> LiveRequest {
        LiveRequest {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: BodyBuffer::new(),
            client: self.client.clone(),
            cookies: Arc::clone(&self.cookies),
        }
    }
}

impl RequestFactory for LiveRequestFactory {
    fn create(&self, url: &Url) -> Result<Box<dyn WebRequest>> {
        Ok(Box::new(self.request(url.clone())))
    }
}

/// A request performed against the real network
#[derive(Debug)]
pub struct LiveRequest {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: BodyBuffer,
    client: reqwest::Client,
    cookies: Arc<Jar>,
}

impl WebRequest for LiveRequest {
    fn url(&self) -> &Url {
        &self.url
    }

    fn method(&self) -> &Method {
        &self.method
    }

    fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn cookie_jar(&self) -> Option<Arc<Jar>> {
        Some(Arc::clone(&self.cookies))
    }

    fn request_stream(&mut self) -> Result<RequestStream> {
        Ok(Box::new(self.body.clone()))
    }

    fn get_response(self: Box<Self>) -> BoxFuture<'static, Result<WebResponse>> {
        let LiveRequest {
            url,
            method,
            headers,
            body,
            client,
            ..
        } = *self;

        Box::pin(async move {
            let mut request = client.request(method.clone(), url.clone()).headers(headers);
            let body = body.to_bytes();
            if !body.is_empty() {
                request = request.body(body);
            }

            debug!("Sending live request: {} {}", method, url);
            let response = request.send().await.map_err(TransportError::from)?;
            let response = WebResponse::from_live(method, response);

            // error statuses surface as transport errors, like `error_for_status`
            let status = response.status();
            if status.is_client_error() || status.is_server_error() {
                return Err(TransportError::protocol(response).into());
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, TransportStatus};
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn factory() -> LiveRequestFactory {
        LiveRequestFactory::new(TransportConfig::default()).unwrap()
    }

    #[test]
    fn test_body_buffer_is_shared() {
        let buffer = BodyBuffer::new();
        let mut writer = buffer.clone();
        writer.write_all(b"abc").unwrap();
        drop(writer);
        assert_eq!(&buffer.to_bytes()[..], b"abc");
        assert_eq!(buffer.len(), 3);
    }

    #[tokio::test]
    async fn test_live_request_sends_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("x-token", "abc"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/echo", server.uri())).unwrap();
        let mut request = factory().create(&url).unwrap();
        request.set_method(Method::POST);
        request
            .headers_mut()
            .insert("x-token", "abc".parse().unwrap());
        let mut stream = request.request_stream_async().await.unwrap();
        stream.write_all(b"payload").unwrap();
        drop(stream);

        let response = request.get_response().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert!(!response.is_buffered());
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_error_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(path("/denied"))
            .respond_with(ResponseTemplate::new(403).set_body_string("X"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/denied", server.uri())).unwrap();
        let request = factory().create(&url).unwrap();
        match request.get_response().await {
            Err(Error::Transport(err)) => {
                assert_eq!(err.status(), TransportStatus::ProtocolError);
                let response = err.into_response().unwrap();
                assert_eq!(response.status().as_u16(), 403);
                assert_eq!(response.text().await.unwrap(), "X");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // nothing listens on the discard port of localhost in test environments
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let request = factory().create(&url).unwrap();
        let err = request.get_response().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
