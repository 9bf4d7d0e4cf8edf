use tracing::debug;

use super::RawServer;
use super::connections::{ConnectionSet, ConnectionTracker};
use crate::ServerError;

/// Close operation that never leaves a socket behind.
///
/// The closer owns the [`ConnectionSet`] of the server it wraps: the server
/// reports every established connection through the [`ConnectionTracker`]
/// handed out by [`tracker`](Self::tracker), and [`close`](Self::close)
/// destroys whatever is still open before running the native close.
#[derive(Debug, Default)]
pub(crate) struct ForcefulCloser {
    connections: ConnectionSet,
}

impl ForcefulCloser {
    pub(crate) fn tracker(&self) -> ConnectionTracker {
        self.connections.tracker()
    }

    /// Destroy every tracked connection, then close `server`.
    ///
    /// The native close error is returned unchanged; destroyed connections are
    /// not restored.
    pub(crate) async fn close(&self, server: &RawServer) -> Result<(), ServerError> {
        let destroyed = self.connections.destroy_all().await;
        debug!(scheme = %server.scheme(), destroyed, "open connections destroyed");

        server.close().await?;

        // Connections accepted while the accept loop was stopping
        let late = self.connections.destroy_all().await;
        if late > 0 {
            debug!(scheme = %server.scheme(), late, "late connections destroyed");
        }
        Ok(())
    }
}

impl Drop for ForcefulCloser {
    fn drop(&mut self) {
        self.connections.abort_all();
    }
}
