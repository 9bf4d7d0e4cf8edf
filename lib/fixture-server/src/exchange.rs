//! The `(request, response, next)` triple handed to every handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::body::ParsedBody;
use crate::error::HeaderError;
use crate::handler::Payload;

/// One handler invocation.
///
/// Every handler of a request shares the same [`FixtureRequest`] and
/// [`ResponseWriter`]. Calling [`next`](Self::next) hands the request to the
/// following handler instead of ending it.
#[derive(Debug, Clone)]
pub struct Exchange {
    request: Arc<FixtureRequest>,
    params: Arc<IndexMap<String, String>>,
    response: ResponseWriter,
    next: Arc<AtomicBool>,
}

impl Exchange {
    pub(crate) fn new(
        request: Arc<FixtureRequest>,
        params: Arc<IndexMap<String, String>>,
        response: ResponseWriter,
    ) -> Self {
        Self {
            request,
            params,
            response,
            next: Arc::default(),
        }
    }

    /// The incoming request.
    #[must_use]
    pub fn request(&self) -> &FixtureRequest {
        &self.request
    }

    /// A decoded path parameter of the matched route.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Every path parameter of the matched route, in pattern order.
    #[must_use]
    pub fn params(&self) -> &IndexMap<String, String> {
        &self.params
    }

    /// The response shared by every handler of the request.
    #[must_use]
    pub fn response(&self) -> &ResponseWriter {
        &self.response
    }

    /// Pass the request to the next handler.
    pub fn next(&self) {
        self.next.store(true, Ordering::Release);
    }

    pub(crate) fn next_called(&self) -> bool {
        self.next.load(Ordering::Acquire)
    }
}

/// The incoming request, with its parsed body.
#[derive(Debug, Clone)]
pub struct FixtureRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<ParsedBody>,
}

impl FixtureRequest {
    pub(crate) fn new(parts: Parts, body: Option<ParsedBody>) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        }
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The raw query string.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// The decoded query string pairs, in order.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query()
            .and_then(|query| serde_urlencoded::from_str(query).ok())
            .unwrap_or_default()
    }

    /// The request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A request header, if present and visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The parsed body.
    ///
    /// `None` when body parsing is disabled or the content type is not one
    /// of the parsed types.
    #[must_use]
    pub fn body(&self) -> Option<&ParsedBody> {
        self.body.as_ref()
    }
}

/// The response under construction.
///
/// Cloning yields a handle on the same response. Once finished, by
/// [`send`](Self::send) or [`end`](Self::end), further writes are ignored.
#[derive(Debug, Clone, Default)]
pub struct ResponseWriter {
    state: Arc<Mutex<ResponseState>>,
}

#[derive(Debug, Default)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    finished: bool,
}

impl ResponseWriter {
    /// The status sent so far.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.state().status
    }

    /// Set the response status.
    pub fn set_status(&self, status: StatusCode) -> &Self {
        let mut state = self.state();
        if state.writable("status") {
            state.status = status;
        }
        self
    }

    /// Set a response header, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Fails if the name or the value is not a valid header.
    pub fn set_header(&self, name: &str, value: &str) -> Result<&Self, HeaderError> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        let mut state = self.state();
        if state.writable("header") {
            state.headers.insert(name, value);
        }
        Ok(self)
    }

    /// A response header set so far.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let state = self.state();
        let value = state.headers.get(name)?.to_str().ok()?;
        Some(value.to_owned())
    }

    /// Write the body and finish the response.
    ///
    /// The content type is inferred from the payload unless already set.
    pub fn send(&self, payload: impl Into<Payload>) {
        let payload = payload.into();
        let mut state = self.state();
        if !state.writable("body") {
            return;
        }

        if !state.headers.contains_key(CONTENT_TYPE) {
            state
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(payload.content_type()));
        }
        state.body = payload.into_bytes();
        state.finished = true;
    }

    /// Serialize `value` as JSON and finish the response.
    ///
    /// # Errors
    ///
    /// Fails if `value` cannot be represented as JSON.
    pub fn json<T: Serialize>(&self, value: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.send(Payload::Json(value));
        Ok(())
    }

    /// Finish the response with what was written so far.
    pub fn end(&self) {
        self.state().finished = true;
    }

    /// Whether the response is finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().finished
    }

    pub(crate) fn to_response(&self) -> Response {
        let state = self.state();
        let mut response = Response::new(Body::from(state.body.clone()));
        *response.status_mut() = state.status;
        *response.headers_mut() = state.headers.clone();
        response
    }

    fn state(&self) -> MutexGuard<'_, ResponseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseState {
    fn writable(&self, what: &str) -> bool {
        if self.finished {
            debug!(what, "response already finished, write ignored");
        }
        !self.finished
    }
}
