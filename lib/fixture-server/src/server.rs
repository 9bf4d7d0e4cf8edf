use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::Router;
use axum::extract::Request;
use axum::http::Method;
use axum::response::Response;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::app::App;
use crate::handler::IntoHandlers;
use crate::net::{ForcefulCloser, RawServer, Scheme};
use crate::options::{BodyParserConfig, ListenOptions, ServerOptions};
use crate::{CertificateMaterial, ServerError};

/// A fixture server: an HTTP server, and optionally an HTTPS server, sharing
/// one set of routes.
///
/// [`port`](Self::port) and [`url`](Self::url) (respectively
/// [`ssl_port`](Self::ssl_port) and [`ssl_url`](Self::ssl_url)) are set while
/// the HTTP (respectively HTTPS) server listens, and cleared when it closes.
/// The server can be closed and listened again any number of times; each
/// listen picks fresh ephemeral ports unless ports are pinned.
///
/// # Example
///
/// ```rust,no_run
/// use fixture_server::{ServerError, create_server, ServerOptions};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), ServerError> {
/// let server = create_server(ServerOptions::default()).await?;
/// server.get("/foo", "bar");
///
/// let url = server.url().expect("listening");
/// // request `{url}/foo` with your favorite client...
///
/// server.close().await?;
/// assert!(server.url().is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TestServer {
    app: App,
    http: Slot,
    https: Option<Slot>,
    ca_cert: Option<String>,
    listen_options: ListenOptions,
    endpoints: Mutex<Endpoints>,
}

/// An underlying server with the closer that owns its connections.
#[derive(Debug)]
struct Slot {
    server: RawServer,
    closer: ForcefulCloser,
}

impl Slot {
    fn new(scheme: Scheme, app: &App, tls: Option<TlsAcceptor>) -> Self {
        let closer = ForcefulCloser::default();
        let server = RawServer::new(scheme, app.clone(), tls, closer.tracker());
        Self { server, closer }
    }

    async fn listen(&self, hostname: &str, port: Option<u16>) -> Result<Endpoint, ServerError> {
        let local_addr = self.server.listen(hostname, port.unwrap_or(0)).await?;
        Ok(Endpoint::new(self.server.scheme(), hostname, local_addr))
    }

    async fn close(&self) -> Result<(), ServerError> {
        self.closer.close(&self.server).await
    }
}

#[derive(Debug, Default)]
struct Endpoints {
    http: Option<Endpoint>,
    https: Option<Endpoint>,
}

/// Port and URL, always set together.
#[derive(Debug, Clone)]
struct Endpoint {
    port: u16,
    url: String,
}

impl Endpoint {
    fn new(scheme: Scheme, hostname: &str, local_addr: SocketAddr) -> Self {
        let port = local_addr.port();
        let host = match hostname.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
            _ => hostname.to_owned(),
        };
        Self {
            port,
            url: format!("{scheme}://{host}:{port}"),
        }
    }
}

impl TestServer {
    pub(crate) fn new(
        body_parser: Option<BodyParserConfig>,
        certificate: Option<(CertificateMaterial, TlsAcceptor)>,
        listen_options: ListenOptions,
    ) -> Self {
        let app = App::new(body_parser);
        let http = Slot::new(Scheme::Http, &app, None);
        let (https, ca_cert) = match certificate {
            Some((material, acceptor)) => (
                Some(Slot::new(Scheme::Https, &app, Some(acceptor))),
                Some(material.ca_cert),
            ),
            None => (None, None),
        };

        Self {
            app,
            http,
            https,
            ca_cert,
            listen_options,
            endpoints: Mutex::default(),
        }
    }

    /// Create a listening HTTP server with the default options.
    ///
    /// # Errors
    ///
    /// Fails if the server cannot bind.
    pub async fn start() -> Result<Self, ServerError> {
        crate::create_server(ServerOptions::default()).await
    }

    /// Port of the HTTP server, while listening.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.endpoints().http.as_ref().map(|endpoint| endpoint.port)
    }

    /// Base URL of the HTTP server, while listening.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.endpoints().http.as_ref().map(|endpoint| endpoint.url.clone())
    }

    /// Port of the HTTPS server, while listening.
    #[must_use]
    pub fn ssl_port(&self) -> Option<u16> {
        self.endpoints().https.as_ref().map(|endpoint| endpoint.port)
    }

    /// Base URL of the HTTPS server, while listening.
    #[must_use]
    pub fn ssl_url(&self) -> Option<String> {
        self.endpoints()
            .https
            .as_ref()
            .map(|endpoint| endpoint.url.clone())
    }

    /// PEM certificate of the authority that signed the HTTPS certificate.
    ///
    /// Set for the whole life of the server when HTTPS is enabled.
    #[must_use]
    pub fn ca_cert(&self) -> Option<&str> {
        self.ca_cert.as_deref()
    }

    /// The underlying HTTP server.
    #[must_use]
    pub fn http(&self) -> &RawServer {
        &self.http.server
    }

    /// The underlying HTTPS server, when enabled.
    #[must_use]
    pub fn https(&self) -> Option<&RawServer> {
        self.https.as_ref().map(|slot| &slot.server)
    }

    /// Start listening with the options given at creation.
    ///
    /// # Errors
    ///
    /// Fails if a server cannot bind or is already listening. A server that
    /// did bind keeps listening.
    pub async fn listen(&self) -> Result<(), ServerError> {
        self.listen_with(&self.listen_options).await
    }

    /// Start listening with the given options.
    ///
    /// Both servers bind concurrently.
    ///
    /// # Errors
    ///
    /// Fails if a server cannot bind or is already listening. A server that
    /// did bind keeps listening.
    pub async fn listen_with(&self, options: &ListenOptions) -> Result<(), ServerError> {
        let hostname = options.hostname.as_str();
        let https = async {
            match &self.https {
                Some(slot) => slot.listen(hostname, options.ssl_port).await.map(Some),
                None => Ok(None),
            }
        };
        let (http, https) = tokio::join!(self.http.listen(hostname, options.port), https);

        let mut endpoints = self.endpoints();
        if let Ok(endpoint) = &http {
            endpoints.http = Some(endpoint.clone());
        }
        if let Ok(Some(endpoint)) = &https {
            endpoints.https = Some(endpoint.clone());
        }
        drop(endpoints);

        http?;
        https?;
        Ok(())
    }

    /// Stop listening and destroy every open connection.
    ///
    /// Both servers close concurrently.
    ///
    /// # Errors
    ///
    /// Fails if a server is not listening. Connections are destroyed
    /// regardless.
    pub async fn close(&self) -> Result<(), ServerError> {
        let https = async {
            match &self.https {
                Some(slot) => slot.close().await,
                None => Ok(()),
            }
        };
        let (http, https) = tokio::join!(self.http.close(), https);

        let mut endpoints = self.endpoints();
        if http.is_ok() {
            endpoints.http = None;
        }
        if https.is_ok() {
            endpoints.https = None;
        }
        drop(endpoints);

        http?;
        https?;
        Ok(())
    }

    /// Register handlers for `method` requests on `path`.
    ///
    /// Paths support `{name}` segments and a trailing `{*name}` wildcard.
    /// Handlers run in order, each one calling
    /// [`Exchange::next`](crate::Exchange::next) to hand over to the next.
    pub fn route(&self, method: Method, path: &str, handlers: impl IntoHandlers) -> &Self {
        self.app.route(method, path, handlers.into_handlers());
        self
    }

    /// Register `GET` (and `HEAD`) handlers.
    pub fn get(&self, path: &str, handlers: impl IntoHandlers) -> &Self {
        self.route(Method::GET, path, handlers)
    }

    /// Register `POST` handlers.
    pub fn post(&self, path: &str, handlers: impl IntoHandlers) -> &Self {
        self.route(Method::POST, path, handlers)
    }

    /// Register `PUT` handlers.
    pub fn put(&self, path: &str, handlers: impl IntoHandlers) -> &Self {
        self.route(Method::PUT, path, handlers)
    }

    /// Register `PATCH` handlers.
    pub fn patch(&self, path: &str, handlers: impl IntoHandlers) -> &Self {
        self.route(Method::PATCH, path, handlers)
    }

    /// Register `DELETE` handlers.
    pub fn delete(&self, path: &str, handlers: impl IntoHandlers) -> &Self {
        self.route(Method::DELETE, path, handlers)
    }

    /// Customize the underlying [`Router`].
    ///
    /// Routes and layers added here are served next to the fixture routes,
    /// which stay the fallback of the router.
    pub fn with_router<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Router) -> Router,
    {
        self.app.map_router(f);
        self
    }

    /// Handle a request without going through a socket.
    pub async fn handle(&self, request: Request) -> Response {
        self.app.handle(request).await
    }

    fn endpoints(&self) -> MutexGuard<'_, Endpoints> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        debug!(
            http = ?self.http.server.local_addr(),
            https = ?self.https().and_then(RawServer::local_addr),
            "fixture server dropped"
        );
    }
}
