//! Native servers and their socket lifecycle.
//!
//! A [`RawServer`] binds a TCP listener and serves HTTP/1.1 over every
//! accepted connection, optionally behind TLS. The crate-internal
//! `ForcefulCloser` tracks those connections and destroys them when the server
//! is closed, so a test suite can listen and close the same server repeatedly
//! without leaking sockets.

mod closer;
mod connections;
mod server;

pub(crate) use self::closer::ForcefulCloser;
pub use self::server::RawServer;

/// The protocol one underlying server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Scheme {
    /// Plain HTTP.
    #[display("http")]
    Http,
    /// HTTP over TLS.
    #[display("https")]
    Https,
}
