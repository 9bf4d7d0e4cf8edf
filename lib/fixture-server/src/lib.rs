//! # Fixture Server
//!
//! A throw-away HTTP (and HTTPS) server for integration tests.
//!
//! [`create_server`] boots a server on an ephemeral port and returns a
//! [`TestServer`] handle. Routes answer with whatever their handler returns,
//! be it a literal, a deferred value or a function of the request:
//!
//! ```rust,no_run
//! use fixture_server::{Exchange, ServerOptions, create_server, deferred, handler_fn};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = create_server(ServerOptions::default()).await?;
//!
//! server
//!     .get("/foo", "bar")
//!     .get("/json", json!({ "foo": "bar" }))
//!     .get("/later", deferred(async { "bar" }))
//!     .get("/users/{id}", handler_fn(|exchange: Exchange| {
//!         exchange.param("id").map(|id| format!("user {id}"))
//!     }));
//!
//! let body = reqwest::get(format!("{}/foo", server.url().unwrap_or_default()))
//!     .await?
//!     .text()
//!     .await?;
//! assert_eq!(body, "bar");
//!
//! server.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Lifecycle
//!
//! A server can be closed and listened again any number of times.
//! [`TestServer::close`] destroys every connection still open, including
//! idle keep-alive connections, so no socket outlives the cycle that
//! accepted it.
//!
//! ## HTTPS
//!
//! With a certificate, an HTTPS server shares the routes of the HTTP server.
//! The certificate is signed by a throw-away authority, available from
//! [`TestServer::ca_cert`] for the client to trust.
//!
//! ```rust,no_run
//! use fixture_server::{ServerOptions, create_server};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = create_server(ServerOptions::default().with_certificate(true)).await?;
//!
//! let ca = reqwest::Certificate::from_pem(server.ca_cert().unwrap_or_default().as_bytes())?;
//! let client = reqwest::Client::builder().add_root_certificate(ca).build()?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```
//!
//! ## Request bodies
//!
//! JSON, plain text, URL encoded forms and octet streams are parsed before
//! the handlers run, see [`ParsedBody`]. Bodies above the limit (1 MiB by
//! default) are answered with `413 Payload Too Large`.
//!
//! ## Error Handling
//!
//! - [`ServerError`] - server lifecycle errors (bind, close, certificate)
//! - [`HandlerError`] - failure of a handler, answered with a `500` response

mod app;
mod body;
mod certificate;
mod error;
mod exchange;
mod handler;
mod net;
mod options;
mod routes;
mod server;

use tracing::debug;

pub use self::body::{BodyError, ParsedBody};
pub use self::certificate::{
    CertificateError, CertificateMaterial, CertificateOptions, DEFAULT_CERTIFICATE_DAYS,
    DEFAULT_COMMON_NAME, create_certificate,
};
pub use self::error::{HeaderError, ServerError};
pub use self::exchange::{Exchange, FixtureRequest, ResponseWriter};
pub use self::handler::{
    Handler, HandlerError, IntoHandlers, IntoReply, Payload, Reply, deferred, handler, handler_fn,
};
pub use self::net::{RawServer, Scheme};
pub use self::options::{
    BodyParserOptions, BodyParserSetting, CertificateSetting, DEFAULT_BODY_LIMIT,
    DEFAULT_HOSTNAME, ListenOptions, ServerOptions,
};
pub use self::server::TestServer;

/// Create a fixture server.
///
/// Issues the certificate first when HTTPS is enabled, and starts listening
/// unless [`ServerOptions::auto_listen`] is `false`.
///
/// # Errors
///
/// Fails if the certificate cannot be issued or loaded, or if a server
/// cannot bind. No server is left listening on failure.
pub async fn create_server(options: ServerOptions) -> Result<TestServer, ServerError> {
    let ServerOptions {
        certificate,
        body_parser,
        auto_listen,
        listen,
    } = options;

    let material = match certificate {
        CertificateSetting::Disabled => None,
        CertificateSetting::Generate(options) => Some(create_certificate(options).await?),
        CertificateSetting::Provided(material) => Some(material),
    };
    let certificate = match material {
        Some(material) => {
            let acceptor = certificate::tls_acceptor(&material)?;
            Some((material, acceptor))
        }
        None => None,
    };

    debug!(
        https = certificate.is_some(),
        body_parser = ?body_parser,
        auto_listen,
        "creating fixture server"
    );
    let server = TestServer::new(body_parser.resolve(), certificate, listen);
    if auto_listen {
        server.listen().await?;
    }
    Ok(server)
}
