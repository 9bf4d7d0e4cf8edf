use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::body::Body;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::Scheme;
use super::connections::ConnectionTracker;
use crate::ServerError;
use crate::app::App;

/// One underlying HTTP or HTTPS server.
///
/// A `RawServer` owns the listening socket and the accept loop. Its
/// [`close`](Self::close) only stops accepting new connections: connections
/// already established keep being served until the
/// forceful closer wrapping the server destroys them.
#[derive(derive_more::Debug)]
pub struct RawServer {
    scheme: Scheme,
    app: App,
    #[debug(skip)]
    tls: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
    running: Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    accept_loop: JoinHandle<()>,
}

impl RawServer {
    pub(crate) fn new(
        scheme: Scheme,
        app: App,
        tls: Option<TlsAcceptor>,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            scheme,
            app,
            tls,
            tracker,
            running: Mutex::new(None),
        }
    }

    /// Whether this server speaks plain HTTP or HTTPS.
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Whether the server is currently accepting connections.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.running().is_some()
    }

    /// The bound address, while listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|running| running.local_addr)
    }

    /// The number of established connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.tracker.open()
    }

    /// Bind `hostname:port` and start accepting connections.
    ///
    /// A port of `0` asks the OS for an ephemeral port; the assigned address
    /// is returned.
    pub(crate) async fn listen(
        &self,
        hostname: &str,
        port: u16,
    ) -> Result<SocketAddr, ServerError> {
        if let Some(local_addr) = self.local_addr() {
            return Err(ServerError::AlreadyListening {
                scheme: self.scheme,
                local_addr,
            });
        }

        let listener = TcpListener::bind((hostname, port)).await?;
        let local_addr = listener.local_addr()?;

        let mut running = self.running();
        if let Some(current) = running.as_ref() {
            return Err(ServerError::AlreadyListening {
                scheme: self.scheme,
                local_addr: current.local_addr,
            });
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let accept_loop = tokio::spawn(accept_loop(
            listener,
            self.app.clone(),
            self.tls.clone(),
            self.tracker.clone(),
            shutdown_rx,
        ));
        *running = Some(Running {
            local_addr,
            shutdown,
            accept_loop,
        });

        info!(scheme = %self.scheme, %local_addr, "server listening");
        Ok(local_addr)
    }

    /// Stop accepting connections and release the listening socket.
    ///
    /// Fails with [`ServerError::NotRunning`] when the server is not listening.
    pub(crate) async fn close(&self) -> Result<(), ServerError> {
        let Running {
            local_addr,
            shutdown,
            accept_loop,
        } = self.running().take().ok_or(ServerError::NotRunning {
            scheme: self.scheme,
        })?;

        // The loop also stops when the sender is dropped
        let _ = shutdown.send(());
        accept_loop.await?;

        info!(scheme = %self.scheme, %local_addr, "server closed");
        Ok(())
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn accept_loop(
    listener: TcpListener,
    app: App,
    tls: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
    mut shutdown: oneshot::Receiver<()>,
) {
    // TLS handshakes in progress, not yet reported as connections
    let mut handshakes = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!(?error, "failed to accept connection");
                        continue;
                    }
                };

                let Some(acceptor) = tls.clone() else {
                    tracker.track(peer, serve_connection(stream, app.clone()));
                    continue;
                };

                let app = app.clone();
                let tracker = tracker.clone();
                handshakes.spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(stream) => tracker.track(peer, serve_connection(stream, app)),
                        Err(error) => debug!(%peer, ?error, "TLS handshake failed"),
                    }
                });
            }
        }
    }

    handshakes.shutdown().await;
}

async fn serve_connection<S>(stream: S, app: App)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let app = app.clone();
        async move { Ok::<_, Infallible>(app.handle(request.map(Body::new)).await) }
    });

    if let Err(error) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(?error, "connection ended with an error");
    }
}
