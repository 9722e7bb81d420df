//! Replay matching
//!
//! A [`ReplayMatcher`] answers intercepted requests from one or more capture
//! sessions. Candidates are scanned in session order and the first match
//! wins. When replaying each recording only once, matched entries are retired
//! under the same lock the scan runs in, so concurrent callers can never
//! claim the same recording twice.

use std::sync::Arc;

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::diff;
use crate::error::{Error, Result};
use crate::exchange::CapturedExchange;
use crate::headers::HeaderMultimap;
use crate::interceptor::{InterceptedRequest, Responder};
use crate::response::WebResponse;
use crate::session::{CaptureSession, ExchangeHandle};

/// Decides whether a recording answers an intercepted request
pub type MatchingAlgorithm =
    Arc<dyn Fn(&InterceptedRequest, &CapturedExchange) -> bool + Send + Sync>;

/// Turns a matched recording into the response (or error) the caller sees
pub type RecordedResultBuilder =
    Arc<dyn Fn(&CapturedExchange, &InterceptedRequest) -> Result<WebResponse> + Send + Sync>;

/// Answers requests no recording matched
pub type NotFoundBuilder =
    Arc<dyn Fn(&InterceptedRequest) -> BoxFuture<'static, Result<WebResponse>> + Send + Sync>;

/// Observes every successful replay
pub type OnMatch = Arc<dyn Fn(&CapturedExchange, &InterceptedRequest, &WebResponse) + Send + Sync>;

/// What to do when nothing matches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotFoundBehavior {
    /// Synthetic 404 explaining the miss
    #[default]
    Return404,
    /// Perform the real network call
    PassThrough,
}

/// Replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayConfig {
    pub allow_replaying_multiple_times: bool,
    pub not_found: NotFoundBehavior,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            allow_replaying_multiple_times: true,
            not_found: NotFoundBehavior::Return404,
        }
    }
}

/// Answers intercepted requests from recorded exchanges
pub struct ReplayMatcher {
    sessions: Vec<CaptureSession>,
    config: ReplayConfig,
    matching: MatchingAlgorithm,
    recorded: RecordedResultBuilder,
    not_found: Option<NotFoundBuilder>,
    on_match: Option<OnMatch>,
    retired: Mutex<Vec<ExchangeHandle>>,
}

impl ReplayMatcher {
    pub fn new(session: CaptureSession) -> Self {
        Self::from_sessions(vec![session])
    }

    /// Match against several sessions, earlier sessions first
    pub fn from_sessions(sessions: impl IntoIterator<Item = CaptureSession>) -> Self {
        Self {
            sessions: sessions.into_iter().collect(),
            config: ReplayConfig::default(),
            matching: Arc::new(default_matching),
            recorded: Arc::new(default_recorded_result),
            not_found: None,
            on_match: None,
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_matching_algorithm<F>(mut self, f: F) -> Self
    where
        F: Fn(&InterceptedRequest, &CapturedExchange) -> bool + Send + Sync + 'static,
    {
        self.matching = Arc::new(f);
        self
    }

    pub fn with_recorded_result_builder<F>(mut self, f: F) -> Self
    where
        F: Fn(&CapturedExchange, &InterceptedRequest) -> Result<WebResponse> + Send + Sync + 'static,
    {
        self.recorded = Arc::new(f);
        self
    }

    /// Replaces the configured [`NotFoundBehavior`]
    pub fn with_not_found_builder<F>(mut self, f: F) -> Self
    where
        F: Fn(&InterceptedRequest) -> BoxFuture<'static, Result<WebResponse>>
            + Send
            + Sync
            + 'static,
    {
        self.not_found = Some(Arc::new(f));
        self
    }

    pub fn on_match<F>(mut self, f: F) -> Self
    where
        F: Fn(&CapturedExchange, &InterceptedRequest, &WebResponse) + Send + Sync + 'static,
    {
        self.on_match = Some(Arc::new(f));
        self
    }

    pub fn allow_replaying_multiple_times(mut self, allow: bool) -> Self {
        self.config.allow_replaying_multiple_times = allow;
        self
    }

    pub fn not_found_behavior(mut self, behavior: NotFoundBehavior) -> Self {
        self.config.not_found = behavior;
        self
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Recordings not yet retired
    pub fn remaining(&self) -> usize {
        let retired = self.retired.lock();
        self.candidates()
            .filter(|handle| !is_retired(&retired, handle))
            .count()
    }

    fn candidates(&self) -> impl Iterator<Item = ExchangeHandle> + '_ {
        self.sessions.iter().flat_map(CaptureSession::handles)
    }

    fn find(&self, request: &InterceptedRequest) -> Option<CapturedExchange> {
        if self.config.allow_replaying_multiple_times {
            return self
                .candidates()
                .map(|handle| handle.read().clone())
                .find(|candidate| (self.matching)(request, candidate));
        }

        let mut retired = self.retired.lock();
        for handle in self.candidates() {
            if is_retired(&retired, &handle) {
                continue;
            }
            let candidate = handle.read().clone();
            if (self.matching)(request, &candidate) {
                retired.push(handle);
                return Some(candidate);
            }
        }
        None
    }

    fn default_not_found(&self, request: &InterceptedRequest) -> BoxFuture<'static, Result<WebResponse>> {
        match self.config.not_found {
            NotFoundBehavior::PassThrough => request.pass_through(),
            NotFoundBehavior::Return404 => {
                let explanation = self.explain_miss(request);
                debug!("{}", explanation);
                let response = request
                    .respond_synthetic()
                    .status(404)
                    .text(explanation)
                    .build();
                Box::pin(future::ready(response))
            }
        }
    }

    fn explain_miss(&self, request: &InterceptedRequest) -> String {
        let intercepted = request.to_exchange();
        let candidates: Vec<CapturedExchange> = {
            let retired = self.retired.lock();
            self.candidates()
                .filter(|handle| !is_retired(&retired, handle))
                .map(|handle| handle.read().clone())
                .collect()
        };

        let mut explanation = format!(
            "wiretap: no recorded exchange matched {} {} ({} candidates)",
            intercepted.method,
            intercepted.url,
            candidates.len()
        );
        if let Some((_, closest)) = diff::closest(&intercepted, &candidates) {
            explanation.push_str("\nclosest recording:\n");
            explanation.push_str(&closest.describe());
        }
        explanation
    }
}

impl Responder for ReplayMatcher {
    fn respond(&self, request: InterceptedRequest) -> BoxFuture<'static, Result<WebResponse>> {
        let Some(candidate) = self.find(&request) else {
            debug!("No recording for {} {}", request.method(), request.url());
            return match self.not_found {
                Some(ref not_found) => not_found(&request),
                None => self.default_not_found(&request),
            };
        };

        debug!("Replaying {} {}", candidate.method, candidate.url);
        let result = (self.recorded)(&candidate, &request);
        if let (Ok(response), Some(on_match)) = (&result, &self.on_match) {
            on_match(&candidate, &request, response);
        }
        Box::pin(future::ready(result))
    }
}

fn is_retired(retired: &[ExchangeHandle], handle: &ExchangeHandle) -> bool {
    retired.iter().any(|r| Arc::ptr_eq(r, handle))
}

/// URL, method, payload text and request headers must all agree
///
/// Headers are strict: the same number of distinct names, each with the same
/// values on both sides. Two header-less requests match.
pub fn default_matching(request: &InterceptedRequest, candidate: &CapturedExchange) -> bool {
    normalize_url(&candidate.url).eq_ignore_ascii_case(request.url().as_str())
        && candidate.method.eq_ignore_ascii_case(request.method().as_str())
        && candidate.request_payload.encoded_text.to_lowercase()
            == request.payload().encoded_text.to_lowercase()
        && headers_match(&candidate.request_headers, &request.header_multimap())
}

pub fn headers_match(recorded: &HeaderMultimap, intercepted: &HeaderMultimap) -> bool {
    if recorded.len() != intercepted.len() {
        return false;
    }
    recorded
        .iter()
        .all(|(name, values)| intercepted.get(name) == Some(values))
}

fn normalize_url(url: &str) -> String {
    Url::parse(url)
        .map(String::from)
        .unwrap_or_else(|_| url.to_string())
}

/// Rebuild the recorded response, or raise the recorded error
///
/// Errors carrying a status code embed the recorded response, as a live
/// transport error would.
pub fn default_recorded_result(
    candidate: &CapturedExchange,
    request: &InterceptedRequest,
) -> Result<WebResponse> {
    let response = if candidate.has_response() {
        let response = request
            .respond_synthetic()
            .status(candidate.response_status_code)
            .headers_multimap(&candidate.response_headers)
            .payload(&candidate.response_body)
            .build()?;
        Some(response)
    } else {
        None
    };

    match (&candidate.response_exception, response) {
        (Some(exception), response) => Err(exception.to_error(response)),
        (None, Some(response)) => Ok(response),
        (None, None) => Err(Error::UnsupportedShape(format!(
            "recording for {} {} has neither a response nor an error",
            candidate.method, candidate.url
        ))),
    }
}
