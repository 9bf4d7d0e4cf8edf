//! Route handler adaptation.
//!
//! A route handler is either a literal value, a deferred value or a callable.
//! Whatever it is, it resolves to an optional [`Payload`]: a truthy payload
//! is written as the response body, anything else leaves the response to the
//! handler itself (which may have written it, or called
//! [`Exchange::next`]).
//!
//! ```rust
//! use fixture_server::{Exchange, deferred, handler, handler_fn};
//! use serde_json::json;
//!
//! // a literal
//! let literal = fixture_server::Handler::from("bar");
//! // a deferred value, resolved once
//! let later = deferred(async { json!({ "foo": "bar" }) });
//! // a callable
//! let echo = handler_fn(|exchange: Exchange| exchange.param("name").map(str::to_owned));
//! let slow = handler(|_exchange: Exchange| async { "bar" });
//! # let _ = (literal, later, echo, slow);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::Json;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use serde_json::Value;

use crate::exchange::Exchange;

/// What a handler resolves to.
pub type Reply = Result<Option<Payload>, HandlerError>;

type Callable = Arc<dyn Fn(Exchange) -> BoxFuture<'static, Reply> + Send + Sync>;

/// A route handler.
#[derive(Clone)]
pub enum Handler {
    /// A value sent as is on every request.
    Literal(Option<Payload>),
    /// A value computed once, then sent on every request.
    Deferred(Shared<BoxFuture<'static, Reply>>),
    /// A function of the exchange.
    Callable(Callable),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(payload) => f.debug_tuple("Literal").field(payload).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl Handler {
    /// Resolve the handler for one exchange, without writing anything.
    pub async fn resolve(&self, exchange: Exchange) -> Reply {
        match self {
            Self::Literal(payload) => Ok(payload.clone()),
            Self::Deferred(value) => value.clone().await,
            Self::Callable(callable) => callable(exchange).await,
        }
    }

    /// Resolve the handler and send the result if it is truthy.
    pub(crate) async fn run(&self, exchange: Exchange) -> Result<(), HandlerError> {
        let response = exchange.response().clone();
        match self.resolve(exchange).await? {
            Some(payload) if payload.is_truthy() => response.send(payload),
            _ => {}
        }
        Ok(())
    }
}

/// Build a handler from an async function of the exchange.
pub fn handler<F, Fut, R>(function: F) -> Handler
where
    F: Fn(Exchange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    Handler::Callable(Arc::new(move |exchange| {
        let output = function(exchange);
        async move { output.await.into_reply() }.boxed()
    }))
}

/// Build a handler from a synchronous function of the exchange.
pub fn handler_fn<F, R>(function: F) -> Handler
where
    F: Fn(Exchange) -> R + Send + Sync + 'static,
    R: IntoReply,
{
    Handler::Callable(Arc::new(move |exchange| {
        futures::future::ready(function(exchange).into_reply()).boxed()
    }))
}

/// Build a handler from a value that is not available yet.
///
/// The future is polled once, by the first request, and its output is
/// shared by every request.
pub fn deferred<Fut, R>(value: Fut) -> Handler
where
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    Handler::Deferred(async move { value.await.into_reply() }.boxed().shared())
}

impl From<Payload> for Handler {
    fn from(payload: Payload) -> Self {
        Self::Literal(Some(payload))
    }
}

impl From<&str> for Handler {
    fn from(text: &str) -> Self {
        Payload::from(text).into()
    }
}

impl From<String> for Handler {
    fn from(text: String) -> Self {
        Payload::from(text).into()
    }
}

impl From<Value> for Handler {
    fn from(value: Value) -> Self {
        Payload::from(value).into()
    }
}

macro_rules! literal_handler {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Handler {
                fn from(value: $ty) -> Self {
                    Payload::Json(Value::from(value)).into()
                }
            }

            impl IntoHandlers for $ty {
                fn into_handlers(self) -> Vec<Handler> {
                    vec![self.into()]
                }
            }
        )*
    };
}

literal_handler!(bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

/// A response body in its in-memory shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Sent as `text/plain`.
    Text(String),
    /// Sent as `application/json`.
    Json(Value),
    /// Sent as `application/octet-stream`.
    Binary(Bytes),
}

impl Payload {
    /// Whether this payload is worth sending.
    ///
    /// Empty text, `null`, `false`, `0` and empty JSON strings are not.
    /// Arrays, objects and byte buffers always are.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Text(text) => !text.is_empty(),
            Self::Json(Value::Null) => false,
            Self::Json(Value::Bool(value)) => *value,
            Self::Json(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
            Self::Json(Value::String(text)) => !text.is_empty(),
            Self::Json(Value::Array(_) | Value::Object(_)) | Self::Binary(_) => true,
        }
    }

    pub(crate) fn content_type(&self) -> &'static str {
        match self {
            Self::Text(_) => "text/plain; charset=utf-8",
            Self::Json(_) => "application/json",
            Self::Binary(_) => "application/octet-stream",
        }
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// JSON strings are sent as text, every other value as JSON.
impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

/// Conversion of a handler output into a [`Reply`].
pub trait IntoReply {
    /// Convert into a reply.
    ///
    /// # Errors
    ///
    /// Fails when the output is an error or cannot be represented.
    fn into_reply(self) -> Reply;
}

impl IntoReply for () {
    fn into_reply(self) -> Reply {
        Ok(None)
    }
}

impl IntoReply for bool {
    fn into_reply(self) -> Reply {
        Ok(Some(Payload::Json(Value::Bool(self))))
    }
}

macro_rules! number_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Reply {
                    Ok(Some(Payload::Json(Value::from(self))))
                }
            }
        )*
    };
}

number_reply!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl IntoReply for &str {
    fn into_reply(self) -> Reply {
        Ok(Some(Payload::from(self)))
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply {
        Ok(Some(Payload::from(self)))
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Reply {
        Ok(Some(Payload::from(self)))
    }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Reply {
        Ok(Some(Payload::from(self)))
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Reply {
        Ok(Some(Payload::from(self)))
    }
}

impl IntoReply for Payload {
    fn into_reply(self) -> Reply {
        Ok(Some(self))
    }
}

impl<T> IntoReply for Json<T>
where
    T: Serialize,
{
    fn into_reply(self) -> Reply {
        let value = serde_json::to_value(self.0)?;
        Ok(Some(Payload::Json(value)))
    }
}

impl<T> IntoReply for Option<T>
where
    T: IntoReply,
{
    fn into_reply(self) -> Reply {
        self.map_or(Ok(None), IntoReply::into_reply)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<HandlerError>,
{
    fn into_reply(self) -> Reply {
        self.map_err(Into::<HandlerError>::into)?.into_reply()
    }
}

/// Failure of a handler.
///
/// Answered with a `500` response. It is cheap to clone, so a deferred value
/// that failed fails every request the same way.
#[derive(Clone)]
pub struct HandlerError {
    source: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl HandlerError {
    /// An error made of a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self {
            source: Arc::new(Message(message.to_string())),
        }
    }

    /// The underlying error.
    #[must_use]
    pub fn source(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.source
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self {
            source: Arc::new(error),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.source, f)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source, f)
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("{_0}")]
struct Message(#[error(not(source))] String);

/// Conversion into the handlers of one route registration.
pub trait IntoHandlers {
    /// Convert into handlers, in call order.
    fn into_handlers(self) -> Vec<Handler>;
}

impl IntoHandlers for Handler {
    fn into_handlers(self) -> Vec<Handler> {
        vec![self]
    }
}

impl IntoHandlers for Vec<Handler> {
    fn into_handlers(self) -> Vec<Handler> {
        self
    }
}

impl<const N: usize> IntoHandlers for [Handler; N] {
    fn into_handlers(self) -> Vec<Handler> {
        self.into()
    }
}

impl IntoHandlers for &str {
    fn into_handlers(self) -> Vec<Handler> {
        vec![self.into()]
    }
}

impl IntoHandlers for String {
    fn into_handlers(self) -> Vec<Handler> {
        vec![self.into()]
    }
}

impl IntoHandlers for Value {
    fn into_handlers(self) -> Vec<Handler> {
        vec![self.into()]
    }
}

impl IntoHandlers for Payload {
    fn into_handlers(self) -> Vec<Handler> {
        vec![self.into()]
    }
}
