//! Intercepting request objects
//!
//! An [`Interceptor`] never touches the network on its own. Writes to its
//! request stream land in memory, and its response comes from a
//! [`Responder`]: a test closure, a [`crate::ReplayMatcher`], or anything else
//! that can turn an [`InterceptedRequest`] into a [`WebResponse`].

use std::future::Future;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{HeaderMap, SET_COOKIE};
use http::Method;
use reqwest::cookie::Jar;
use tracing::debug;
use url::Url;

use crate::codec::Payload;
use crate::error::{Error, Result};
use crate::exchange::CapturedExchange;
use crate::headers::HeaderMultimap;
use crate::registry::RequestFactory;
use crate::request::{self, BodyBuffer, LiveRequestFactory, RequestStream, WebRequest};
use crate::response::{ResponseBuilder, WebResponse};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Produces responses for intercepted requests
pub trait Responder: Send + Sync {
    fn respond(&self, request: InterceptedRequest) -> BoxFuture<'static, Result<WebResponse>>;
}

/// Adapts an async closure into a [`Responder`]
pub struct FnResponder<F>(F);

impl<F> FnResponder<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> Responder for FnResponder<F>
where
    F: Fn(InterceptedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<WebResponse>> + Send + 'static,
{
    fn respond(&self, request: InterceptedRequest) -> BoxFuture<'static, Result<WebResponse>> {
        Box::pin((self.0)(request))
    }
}

/// What a responder sees of an intercepted request
#[derive(Clone)]
pub struct InterceptedRequest {
    token: u64,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
    payload: Payload,
    cookies: Arc<Jar>,
    decompress: bool,
    pass_through: Arc<dyn RequestFactory>,
}

impl InterceptedRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_multimap(&self) -> HeaderMultimap {
        HeaderMultimap::from_header_map(&self.headers)
    }

    /// Raw bytes written to the request stream
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Request body classified as text or base64
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn body_text(&self) -> &str {
        &self.payload.encoded_text
    }

    /// Cookie header the caller's cookie store holds for this URL
    pub fn cookies(&self) -> Option<String> {
        request::cookie_snapshot(&self.cookies, &self.url)
    }

    pub fn automatic_decompression(&self) -> bool {
        self.decompress
    }

    /// Response builder bound to this request's URL, method and decompression
    pub fn respond_synthetic(&self) -> ResponseBuilder {
        ResponseBuilder::new(self.url.clone())
            .method(self.method.as_str())
            .decompress(self.decompress)
    }

    /// The request side of this call as an exchange with no response
    pub fn to_exchange(&self) -> CapturedExchange {
        let mut exchange = CapturedExchange::new(self.method.as_str(), self.url.as_str());
        exchange.request_headers = self.header_multimap();
        exchange.request_cookies = self.cookies();
        exchange.request_payload = self.payload.clone();
        exchange
    }

    /// Perform the real network call with the captured method, headers and body
    ///
    /// Returning the response from a responder unchanged hands the live
    /// response to the caller without any post-processing.
    pub fn pass_through(&self) -> BoxFuture<'static, Result<WebResponse>> {
        let factory = Arc::clone(&self.pass_through);
        let token = self.token;
        let method = self.method.clone();
        let url = self.url.clone();
        let headers = self.headers.clone();
        let body = self.body.clone();

        Box::pin(async move {
            debug!("Passing intercepted request through: {} {}", method, url);
            let mut request = factory.create(&url)?;
            request.set_method(method);
            *request.headers_mut() = headers;
            if !body.is_empty() {
                let mut stream = request.request_stream_async().await?;
                stream.write_all(&body)?;
                stream.flush()?;
            }

            match request.get_response().await {
                Ok(mut response) => {
                    response.mark_pass_through(token);
                    Ok(response)
                }
                Err(Error::Transport(mut err)) => {
                    if let Some(response) = err.response_mut() {
                        response.mark_pass_through(token);
                    }
                    Err(Error::Transport(err))
                }
                Err(err) => Err(err),
            }
        })
    }
}

impl std::fmt::Debug for InterceptedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptedRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("payload", &self.payload)
            .finish()
    }
}

/// A request object answered by a [`Responder`] instead of the network
pub struct Interceptor {
    token: u64,
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: BodyBuffer,
    responder: Arc<dyn Responder>,
    pass_through: Arc<dyn RequestFactory>,
    cookies: Arc<Jar>,
    decompress: bool,
}

impl Interceptor {
    pub fn new(url: Url, responder: Arc<dyn Responder>) -> Self {
        let live = LiveRequestFactory::shared();
        Self {
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: BodyBuffer::new(),
            responder,
            cookies: live.cookies(),
            pass_through: live,
            decompress: true,
        }
    }

    pub fn from_fn<F, Fut>(url: Url, f: F) -> Self
    where
        F: Fn(InterceptedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WebResponse>> + Send + 'static,
    {
        Self::new(url, Arc::new(FnResponder::new(f)))
    }

    /// Factory used by [`InterceptedRequest::pass_through`]
    pub fn with_pass_through(mut self, factory: Arc<dyn RequestFactory>) -> Self {
        self.pass_through = factory;
        self
    }

    pub fn with_cookie_jar(mut self, cookies: Arc<Jar>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn set_automatic_decompression(&mut self, decompress: bool) {
        self.decompress = decompress;
    }
}

impl WebRequest for Interceptor {
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

    fn automatic_decompression(&self) -> bool {
        self.decompress
    }

    fn request_stream(&mut self) -> Result<RequestStream> {
        Ok(Box::new(self.body.clone()))
    }

    fn get_response(self: Box<Self>) -> BoxFuture<'static, Result<WebResponse>> {
        let this = *self;
        let body = this.body.to_bytes();
        let content_type = request::content_type(&this.headers);
        let payload = Payload::from_request(&body, content_type.as_deref());

        let intercepted = InterceptedRequest {
            token: this.token,
            method: this.method,
            url: this.url.clone(),
            headers: this.headers,
            body,
            payload,
            cookies: Arc::clone(&this.cookies),
            decompress: this.decompress,
            pass_through: this.pass_through,
        };
        let responder = this.responder;
        let cookies = this.cookies;
        let url = this.url;
        let token = this.token;

        Box::pin(async move {
            let response = responder.respond(intercepted).await?;
            if response.pass_through_token() == Some(token) {
                return Ok(response);
            }
            store_cookies(&cookies, &url, response.headers());
            Ok(response)
        })
    }
}

fn store_cookies(jar: &Jar, url: &Url, headers: &HeaderMap) {
    for value in headers.get_all(SET_COOKIE) {
        if let Ok(cookie) = value.to_str() {
            jar.add_cookie_str(cookie, url);
        }
    }
}

/// Creates [`Interceptor`]s for a transport registry session
pub struct InterceptorFactory {
    responder: Arc<dyn Responder>,
    pass_through: Arc<dyn RequestFactory>,
    cookies: Arc<Jar>,
}

impl InterceptorFactory {
    pub fn new(responder: Arc<dyn Responder>) -> Self {
        Self::with_live(responder, LiveRequestFactory::shared())
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(InterceptedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WebResponse>> + Send + 'static,
    {
        Self::new(Arc::new(FnResponder::new(f)))
    }

    /// Pass through to, and share cookies with, a specific live factory
    pub fn with_live(responder: Arc<dyn Responder>, live: Arc<LiveRequestFactory>) -> Self {
        Self {
            responder,
            cookies: live.cookies(),
            pass_through: live,
        }
    }
}

impl RequestFactory for InterceptorFactory {
    fn create(&self, url: &Url) -> Result<Box<dyn WebRequest>> {
        let interceptor = Interceptor::new(url.clone(), Arc::clone(&self.responder))
            .with_pass_through(Arc::clone(&self.pass_through))
            .with_cookie_jar(Arc::clone(&self.cookies));
        Ok(Box::new(interceptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::request::TransportConfig;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use reqwest::cookie::CookieStore;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_synthetic_response() {
        let interceptor = Interceptor::from_fn(url("http://x/hello"), |req| async move {
            assert_eq!(req.method(), Method::GET);
            req.respond_synthetic().status(202).text("synthetic").build()
        });
        let response = Box::new(interceptor).get_response().await.unwrap();
        assert_eq!(response.status().as_u16(), 202);
        assert_eq!(response.url().as_str(), "http://x/hello");
        assert_eq!(response.text().await.unwrap(), "synthetic");
    }

    #[tokio::test]
    async fn test_request_body_is_captured_and_classified() {
        let seen: Arc<Mutex<Vec<(Payload, Bytes)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let responder = move |req: InterceptedRequest| {
            sink.lock().push((req.payload().clone(), req.body().clone()));
            let response = req.respond_synthetic().build();
            async move { response }
        };
        let responder: Arc<dyn Responder> = Arc::new(FnResponder::new(responder));

        let mut json = Interceptor::new(url("http://x/json"), Arc::clone(&responder));
        json.set_method(Method::POST);
        json.headers_mut()
            .insert("content-type", "application/json".parse().unwrap());
        json.request_stream()
            .unwrap()
            .write_all(br#"{"a":1}"#)
            .unwrap();
        Box::new(json).get_response().await.unwrap();

        let mut png = Interceptor::new(url("http://x/png"), responder);
        png.set_method(Method::PUT);
        png.headers_mut()
            .insert("content-type", "image/png".parse().unwrap());
        png.request_stream().unwrap().write_all(&[0x89, 0x50]).unwrap();
        Box::new(png).get_response().await.unwrap();

        let seen = seen.lock();
        assert!(!seen[0].0.is_encoded);
        assert_eq!(seen[0].0.encoded_text, r#"{"a":1}"#);
        assert!(seen[1].0.is_encoded);
        assert_eq!(&seen[1].1[..], &[0x89, 0x50]);
    }

    #[test]
    fn test_async_stream_completes_immediately() {
        let mut interceptor = Interceptor::from_fn(url("http://x/"), |req| async move {
            req.respond_synthetic().build()
        });
        let stream = interceptor.request_stream_async().now_or_never();
        assert!(matches!(stream, Some(Ok(_))));
    }

    #[tokio::test]
    async fn test_responder_error_propagates() {
        let interceptor = Interceptor::from_fn(url("http://x/"), |_req| async move {
            Err::<WebResponse, Error>(
                TransportError::new(crate::TransportStatus::Timeout, "boom").into(),
            )
        });
        let err = Box::new(interceptor).get_response().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_synthetic_cookies_reach_cookie_store() {
        let jar = Arc::new(Jar::default());
        let interceptor = Interceptor::from_fn(url("http://x/login"), |req| async move {
            req.respond_synthetic()
                .header("Set-Cookie", "session=abc; Path=/")
                .build()
        })
        .with_cookie_jar(Arc::clone(&jar));
        Box::new(interceptor).get_response().await.unwrap();

        let cookies = jar.cookies(&url("http://x/other")).unwrap();
        assert_eq!(cookies.to_str().unwrap(), "session=abc");
    }

    #[tokio::test]
    async fn test_pass_through_returns_live_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/live"))
            .and(body_string("sent body"))
            .respond_with(ResponseTemplate::new(200).set_body_string("from network"))
            .mount(&server)
            .await;

        let live = Arc::new(LiveRequestFactory::new(TransportConfig::default()).unwrap());
        let mut interceptor = Interceptor::from_fn(
            url(&format!("{}/live", server.uri())),
            |req| async move { req.pass_through().await },
        )
        .with_pass_through(live);
        interceptor.set_method(Method::POST);
        interceptor
            .request_stream()
            .unwrap()
            .write_all(b"sent body")
            .unwrap();

        let response = Box::new(interceptor).get_response().await.unwrap();
        assert!(!response.is_buffered());
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "from network");
    }

    #[tokio::test]
    async fn test_factory_creates_interceptors() {
        let factory = InterceptorFactory::from_fn(|req| async move {
            req.respond_synthetic().text(req.url().path().to_string()).build()
        });
        let request = factory.create(&url("http://x/from-factory")).unwrap();
        let response = request.get_response().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "/from-factory");
    }
}
