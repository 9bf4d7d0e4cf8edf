use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};

use axum::Router;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::body::parse_body;
use crate::handler::Handler;
use crate::options::BodyParserConfig;
use crate::routes::RouteTable;

/// The request handling surface shared by the HTTP and HTTPS servers.
#[derive(Debug, Clone)]
pub(crate) struct App {
    inner: Arc<AppInner>,
}

#[derive(Debug)]
struct AppInner {
    routes: RouteTable,
    body_parser: Option<BodyParserConfig>,
    routers: RwLock<Routers>,
}

/// The router as configured by the caller, and the same router wrapped
/// with the fixture layers.
#[derive(Debug)]
struct Routers {
    base: Router,
    served: Router,
}

impl App {
    pub(crate) fn new(body_parser: Option<BodyParserConfig>) -> Self {
        let routes = RouteTable::default();
        let dispatch = routes.clone();
        let base = Router::new().fallback(move |request: Request| async move {
            dispatch.dispatch(request).await
        });
        let served = layered(base.clone(), body_parser);

        Self {
            inner: Arc::new(AppInner {
                routes,
                body_parser,
                routers: RwLock::new(Routers { base, served }),
            }),
        }
    }

    pub(crate) fn route(&self, method: Method, path: &str, handlers: Vec<Handler>) {
        self.inner.routes.register(method, path, handlers);
    }

    /// Replace the router by `f(router)`.
    pub(crate) fn map_router<F>(&self, f: F)
    where
        F: FnOnce(Router) -> Router,
    {
        let mut routers = self
            .inner
            .routers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let base = f(routers.base.clone());
        routers.served = layered(base.clone(), self.inner.body_parser);
        routers.base = base;
    }

    /// Handle one request.
    pub(crate) async fn handle(&self, request: Request) -> Response {
        let router = self
            .inner
            .routers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .served
            .clone();

        match router.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

fn layered(router: Router, body_parser: Option<BodyParserConfig>) -> Router {
    let router = match body_parser {
        Some(config) => router.layer(middleware::from_fn_with_state(config, parse_body)),
        None => router,
    };
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(message, "handler panicked");

    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::routing::get;
    use http_body_util::BodyExt;

    use super::*;
    use crate::body::ParsedBody;
    use crate::exchange::Exchange;
    use crate::handler::handler_fn;

    async fn send(app: &App, request: Request) -> anyhow::Result<(StatusCode, String)> {
        let response = app.handle(request).await;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok((status, String::from_utf8(body.to_vec())?))
    }

    fn post_text(uri: &str, text: &'static str) -> anyhow::Result<Request> {
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "text/plain")
            .body(Body::from(text))?;
        Ok(request)
    }

    fn echo_body(exchange: &Exchange) -> String {
        match exchange.request().body() {
            Some(ParsedBody::Text(text)) => format!("text: {text}"),
            Some(other) => format!("other: {other:?}"),
            None => "no body".to_owned(),
        }
    }

    #[tokio::test]
    async fn should_parse_body_before_handlers() -> anyhow::Result<()> {
        let app = App::new(Some(BodyParserConfig {
            limit: 1024,
            strict: true,
        }));
        app.route(
            Method::POST,
            "/echo",
            vec![handler_fn(|exchange: Exchange| echo_body(&exchange))],
        );

        let (status, body) = send(&app, post_text("/echo", "foo")?).await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "text: foo");
        Ok(())
    }

    #[tokio::test]
    async fn should_skip_parsing_when_disabled() -> anyhow::Result<()> {
        let app = App::new(None);
        app.route(
            Method::POST,
            "/echo",
            vec![handler_fn(|exchange: Exchange| echo_body(&exchange))],
        );

        let (_, body) = send(&app, post_text("/echo", "foo")?).await?;

        assert_eq!(body, "no body");
        Ok(())
    }

    #[tokio::test]
    async fn should_reject_large_body_before_handlers() -> anyhow::Result<()> {
        let app = App::new(Some(BodyParserConfig {
            limit: 2,
            strict: true,
        }));
        app.route(Method::POST, "/", vec![Handler::from("reached")]);

        let (status, _) = send(&app, post_text("/", "foo")?).await?;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        Ok(())
    }

    #[tokio::test]
    async fn should_turn_panics_into_500() -> anyhow::Result<()> {
        let app = App::new(None);
        app.route(
            Method::GET,
            "/boom",
            vec![handler_fn(|_exchange: Exchange| -> &'static str { panic!("boom") })],
        );

        let request = axum::http::Request::builder().uri("/boom").body(Body::empty())?;
        let (status, _) = send(&app, request).await?;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
    }

    #[tokio::test]
    async fn should_pass_through_router_customization() -> anyhow::Result<()> {
        let app = App::new(None);
        app.route(Method::GET, "/fixture", vec![Handler::from("fixture")]);

        app.map_router(|router| router.route("/raw", get(|| async { "raw" })));

        let raw = axum::http::Request::builder().uri("/raw").body(Body::empty())?;
        let fixture = axum::http::Request::builder().uri("/fixture").body(Body::empty())?;
        assert_eq!(send(&app, raw).await?.1, "raw");
        assert_eq!(send(&app, fixture).await?.1, "fixture");
        Ok(())
    }
}
