//! Error types for the server lifecycle and response writing.
//!
//! Lifecycle failures ([`ServerError`]) are surfaced to the caller of
//! [`create_server`](crate::create_server), [`TestServer::listen`](crate::TestServer::listen)
//! and [`TestServer::close`](crate::TestServer::close). Nothing is retried.
//!
//! Handler failures never show up here: they are turned into a `500` response
//! for the request that triggered them, see [`HandlerError`](crate::HandlerError).

use std::net::SocketAddr;

use crate::certificate::CertificateError;
use crate::net::Scheme;

/// Error types for server lifecycle operations.
///
/// # Examples
///
/// ```rust,no_run
/// use fixture_server::{ServerError, TestServer};
///
/// # async fn demo() -> Result<(), ServerError> {
/// let server = TestServer::start().await?;
/// server.close().await?;
///
/// // A second close has nothing to stop
/// match server.close().await {
///     Err(ServerError::NotRunning { scheme }) => println!("{scheme} server already stopped"),
///     other => println!("unexpected: {other:?}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, derive_more::Error, derive_more::Display, derive_more::From)]
pub enum ServerError {
    /// I/O operation failed.
    ///
    /// Typically a bind failure: the port is already in use, the hostname
    /// cannot be resolved or the process lacks the permission to bind.
    #[display("I/O error: {_0}")]
    IoError(std::io::Error),

    /// The certificate material could not be issued or loaded.
    #[display("Certificate error: {_0}")]
    CertificateError(CertificateError),

    /// `listen` was called on a server that is already listening.
    #[from(ignore)]
    #[display("The {scheme} server is already listening on {local_addr}")]
    AlreadyListening {
        /// Which of the underlying servers refused to listen.
        scheme: Scheme,
        /// The address the server is currently bound to.
        local_addr: SocketAddr,
    },

    /// `close` was called on a server that is not listening.
    #[from(ignore)]
    #[display("The {scheme} server is not running")]
    NotRunning {
        /// Which of the underlying servers was already stopped.
        scheme: Scheme,
    },

    /// A background server task ended abnormally.
    #[display("Server task failed: {_0}")]
    TaskError(tokio::task::JoinError),
}

/// Error raised when a handler writes an invalid response header.
#[derive(Debug, derive_more::Error, derive_more::Display, derive_more::From)]
pub enum HeaderError {
    /// The header name contains forbidden characters.
    #[display("Invalid header name: {_0}")]
    InvalidHeaderName(http::header::InvalidHeaderName),

    /// The header value contains forbidden characters.
    #[display("Invalid header value: {_0}")]
    InvalidHeaderValue(http::header::InvalidHeaderValue),
}
