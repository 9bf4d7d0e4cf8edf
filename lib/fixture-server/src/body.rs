//! Automatic request body parsing.
//!
//! Four content types are parsed before any route handler runs, each into
//! its own [`ParsedBody`] variant. Bodies of any other type are left as is.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use serde_json::{Map, Value};
use tracing::debug;

use crate::options::BodyParserConfig;

/// A request body parsed according to its content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// `application/json` document.
    Json(Value),
    /// `text/plain` content.
    Text(String),
    /// `application/x-www-form-urlencoded` fields.
    ///
    /// Repeated keys are collected into an array, and bracketed keys such
    /// as `user[name]` or `tags[]` build nested objects and arrays.
    Form(Map<String, Value>),
    /// `application/octet-stream` bytes.
    Raw(Bytes),
}

impl ParsedBody {
    /// The JSON document, for a JSON body.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The text, for a plain text body.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The fields, for a form body.
    #[must_use]
    pub fn as_form(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Form(fields) => Some(fields),
            _ => None,
        }
    }

    /// The bytes, for a raw body.
    #[must_use]
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Rejection of a request body.
#[derive(Debug, derive_more::Error, derive_more::Display, derive_more::From)]
pub enum BodyError {
    /// The body exceeds the configured limit.
    #[from(ignore)]
    #[display("request entity too large, limit is {limit} bytes")]
    TooLarge {
        /// The configured limit, in bytes.
        limit: usize,
    },

    /// The body could not be read from the connection.
    #[from(ignore)]
    #[display("failed to read the request body: {message}")]
    Unreadable {
        /// What went wrong.
        message: String,
    },

    /// The body is not a JSON document.
    #[display("invalid JSON body: {_0}")]
    InvalidJson(serde_json::Error),

    /// Strict mode only accepts objects and arrays.
    #[from(ignore)]
    #[display("strict JSON body must be an object or an array")]
    NonStrictJson,

    /// The body is not URL encoded.
    #[display("invalid form body: {_0}")]
    InvalidForm(serde_urlencoded::de::Error),
}

impl BodyError {
    /// The HTTP status of the rejection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unreadable { .. }
            | Self::InvalidJson(_)
            | Self::NonStrictJson
            | Self::InvalidForm(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for BodyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Text,
    Form,
    Raw,
}

impl BodyKind {
    fn of(request: &Request) -> Option<Self> {
        let content_type = request.headers().get(CONTENT_TYPE)?.to_str().ok()?;
        let mime = content_type.parse::<mime::Mime>().ok()?;
        match mime.essence_str() {
            "application/json" => Some(Self::Json),
            "text/plain" => Some(Self::Text),
            "application/x-www-form-urlencoded" => Some(Self::Form),
            "application/octet-stream" => Some(Self::Raw),
            _ => None,
        }
    }
}

/// Middleware parsing the body and storing it in the request extensions.
pub(crate) async fn parse_body(
    State(config): State<BodyParserConfig>,
    request: Request,
    next: Next,
) -> Response {
    match read_body(config, request).await {
        Ok(request) => next.run(request).await,
        Err(error) => {
            debug!(%error, "request body rejected");
            error.into_response()
        }
    }
}

async fn read_body(config: BodyParserConfig, request: Request) -> Result<Request, BodyError> {
    let Some(kind) = BodyKind::of(&request) else {
        return Ok(request);
    };

    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let limit = u64::try_from(config.limit).unwrap_or(u64::MAX);
    let declared_too_large = declared.is_some_and(|length| length > limit);

    let (mut parts, body) = request.into_parts();
    let bytes = collect_limited(body, config.limit, declared_too_large).await?;

    let parsed = parse(kind, &bytes, config.strict)?;
    parts.extensions.insert(parsed);
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

/// Read the whole body, keeping at most `limit` bytes.
///
/// A body over the limit is still read to its end and discarded, so the
/// client receives the rejection instead of a reset connection.
async fn collect_limited(
    mut body: Body,
    limit: usize,
    too_large: bool,
) -> Result<Bytes, BodyError> {
    let mut collected = BytesMut::new();
    let mut too_large = too_large;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|error| BodyError::Unreadable {
            message: error.to_string(),
        })?;
        let Ok(data) = frame.into_data() else {
            continue;
        };
        if too_large {
            continue;
        }
        if collected.len() + data.len() > limit {
            too_large = true;
            collected.clear();
            continue;
        }
        collected.extend_from_slice(&data);
    }

    if too_large {
        return Err(BodyError::TooLarge { limit });
    }
    Ok(collected.freeze())
}

fn parse(kind: BodyKind, bytes: &Bytes, strict: bool) -> Result<ParsedBody, BodyError> {
    let parsed = match kind {
        BodyKind::Json => ParsedBody::Json(parse_json(bytes, strict)?),
        BodyKind::Text => ParsedBody::Text(String::from_utf8_lossy(bytes).into_owned()),
        BodyKind::Form => ParsedBody::Form(parse_form(bytes)?),
        BodyKind::Raw => ParsedBody::Raw(bytes.clone()),
    };
    Ok(parsed)
}

fn parse_json(bytes: &[u8], strict: bool) -> Result<Value, BodyError> {
    if bytes.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let value = serde_json::from_slice::<Value>(bytes)?;
    if strict && !(value.is_object() || value.is_array()) {
        return Err(BodyError::NonStrictJson);
    }
    Ok(value)
}

/// Bracket segments beyond this depth stay in the last key as is.
const FORM_NESTING_DEPTH: usize = 5;

fn parse_form(bytes: &[u8]) -> Result<Map<String, Value>, BodyError> {
    let pairs = serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes)?;

    let mut fields = Map::new();
    for (key, value) in pairs {
        let (root, path) = split_form_key(&key);
        insert_form_field(&mut fields, root, &path, Value::String(value));
    }
    Ok(fields)
}

/// Split `user[tags][]` into `user` and `["tags", ""]`.
fn split_form_key(key: &str) -> (&str, Vec<&str>) {
    let Some(open) = key.find('[').filter(|open| *open > 0) else {
        return (key, Vec::new());
    };
    let (root, mut rest) = key.split_at(open);

    let mut path = Vec::new();
    while path.len() < FORM_NESTING_DEPTH {
        let Some((segment, tail)) = rest.strip_prefix('[').and_then(|inner| inner.split_once(']'))
        else {
            break;
        };
        path.push(segment);
        rest = tail;
    }

    match (path.is_empty(), rest.is_empty()) {
        (true, _) => (key, path),
        (false, true) => (root, path),
        (false, false) => {
            path.push(rest);
            (root, path)
        }
    }
}

fn is_index(segment: &str) -> bool {
    segment.is_empty() || segment.parse::<usize>().is_ok()
}

fn insert_form_field(fields: &mut Map<String, Value>, key: &str, path: &[&str], value: Value) {
    let Some((segment, rest)) = path.split_first() else {
        match fields.get_mut(key) {
            None => {
                fields.insert(key.to_owned(), value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
        return;
    };

    let entry = fields.entry(key).or_insert(Value::Null);
    insert_nested(entry, segment, rest, value);
}

fn insert_nested(target: &mut Value, segment: &str, rest: &[&str], value: Value) {
    match target {
        Value::Null if is_index(segment) => *target = Value::Array(vec![nest(rest, value)]),
        Value::Null => {
            let mut object = Map::new();
            insert_form_field(&mut object, segment, rest, value);
            *target = Value::Object(object);
        }
        Value::Object(object) => insert_form_field(object, segment, rest, value),
        Value::Array(items) if is_index(segment) => {
            let existing = segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index));
            match (existing, rest.split_first()) {
                (Some(item), Some((next, rest))) => insert_nested(item, next, rest, value),
                _ => items.push(nest(rest, value)),
            }
        }
        Value::Array(items) => {
            let mut object = items
                .drain(..)
                .enumerate()
                .map(|(index, item)| (index.to_string(), item))
                .collect::<Map<_, _>>();
            insert_form_field(&mut object, segment, rest, value);
            *target = Value::Object(object);
        }
        _ => {
            let first = target.take();
            *target = Value::Array(vec![first, wrap(segment, nest(rest, value))]);
        }
    }
}

/// The value at the end of `path`, built from scratch.
fn nest(path: &[&str], value: Value) -> Value {
    path.iter()
        .rev()
        .fold(value, |inner, segment| wrap(segment, inner))
}

fn wrap(segment: &str, inner: Value) -> Value {
    if is_index(segment) {
        Value::Array(vec![inner])
    } else {
        Value::Object(Map::from_iter([(segment.to_owned(), inner)]))
    }
}
