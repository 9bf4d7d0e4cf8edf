use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use tracing::{error, trace};

use crate::body::ParsedBody;
use crate::exchange::{Exchange, FixtureRequest, ResponseWriter};
use crate::handler::Handler;

/// Append-only list of route registrations, in insertion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct RouteTable {
    registrations: Arc<RwLock<Vec<Arc<RouteRegistration>>>>,
}

#[derive(Debug)]
struct RouteRegistration {
    method: Method,
    pattern: PathPattern,
    handlers: Vec<Handler>,
}

impl RouteRegistration {
    fn accepts(&self, method: &Method) -> bool {
        self.method == method || (method == Method::HEAD && self.method == Method::GET)
    }
}

impl RouteTable {
    pub(crate) fn register(&self, method: Method, path: &str, handlers: Vec<Handler>) {
        trace!(%method, path, handlers = handlers.len(), "route registered");
        let registration = RouteRegistration {
            method,
            pattern: PathPattern::parse(path),
            handlers,
        };
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(registration));
    }

    fn snapshot(&self) -> Vec<Arc<RouteRegistration>> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the handlers matching the request until one of them answers.
    pub(crate) async fn dispatch(&self, request: Request) -> Response {
        let (mut parts, _body) = request.into_parts();
        let body = parts.extensions.remove::<ParsedBody>();
        let request = Arc::new(FixtureRequest::new(parts, body));
        let response = ResponseWriter::default();

        for registration in self.snapshot() {
            if !registration.accepts(request.method()) {
                continue;
            }
            let Some(params) = registration.pattern.matches(request.path()) else {
                continue;
            };

            let params = Arc::new(params);
            for handler in &registration.handlers {
                let exchange =
                    Exchange::new(Arc::clone(&request), Arc::clone(&params), response.clone());
                if let Err(error) = handler.run(exchange.clone()).await {
                    error!(
                        method = %request.method(),
                        path = request.path(),
                        %error,
                        "handler failed"
                    );
                    return (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response();
                }

                if response.is_finished() || !exchange.next_called() {
                    return response.to_response();
                }
            }
        }

        let message = format!("Cannot {} {}", request.method(), request.path());
        (StatusCode::NOT_FOUND, message).into_response()
    }
}

/// A route path such as `/users/{id}` or `/files/{*path}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathPattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

impl PathPattern {
    pub(crate) fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                match segment
                    .strip_prefix('{')
                    .and_then(|inner| inner.strip_suffix('}'))
                {
                    Some(name) => match name.strip_prefix('*') {
                        Some(rest) => Segment::Wildcard(rest.to_owned()),
                        None => Segment::Param(name.to_owned()),
                    },
                    None => Segment::Literal(segment.to_owned()),
                }
            })
            .collect();
        Self { segments }
    }

    /// The decoded parameters when `path` matches.
    pub(crate) fn matches(&self, path: &str) -> Option<IndexMap<String, String>> {
        let mut actual = path.split('/').filter(|segment| !segment.is_empty());
        let mut params = IndexMap::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    if !decode(actual.next()?).eq_ignore_ascii_case(literal) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), decode(actual.next()?));
                }
                Segment::Wildcard(name) => {
                    let rest = actual.by_ref().collect::<Vec<_>>().join("/");
                    params.insert(name.clone(), decode(&rest));
                }
            }
        }

        actual.next().is_none().then_some(params)
    }
}

fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
