//! TCP accept/dial helpers that hand connections to a callback.
//!
//! This module is not part of either hard core ([`crate::split`]/[`crate::rope`]
//! or [`crate::rpc`]); it is the thin plumbing an end-to-end binary needs to
//! get a socket into an [`crate::rpc::Engine`]. [`Listener`] accepts in a
//! loop bounded by a per-iteration timeout so that a [`CancellationToken`]
//! is checked between accepts even on a listener with no pending
//! connections; [`Dialer`] is the client-side equivalent, bounding the
//! connect itself.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The callback invoked with each accepted or dialed connection.
pub type Handler = Arc<dyn Fn(TcpStream) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Accepts connections in a loop, handing each to `handler` on its own
/// spawned task, until `ctx` is cancelled or the listener errors.
pub struct Listener {
    ctx: CancellationToken,
    listener: TcpListener,
    /// Upper bound on how long one accept() call waits before the loop
    /// re-checks `ctx`. Does not bound the lifetime of accepted
    /// connections, only the polling granularity of cancellation.
    timeout: Duration,
    handler: Handler,
}

impl Listener {
    pub fn new(ctx: CancellationToken, listener: TcpListener, timeout: Duration, handler: Handler) -> Self {
        Self { ctx, listener, timeout, handler }
    }

    /// Binds `addr` and returns a `Listener` ready to [`serve`](Self::serve).
    pub async fn bind(
        ctx: CancellationToken,
        addr: &str,
        timeout: Duration,
        handler: Handler,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {addr}");
        Ok(Self::new(ctx, listener, timeout, handler))
    }

    /// Accepts connections until cancelled. Each accepted connection is
    /// spawned onto its own task running `handler`; errors from `handler`
    /// are logged and otherwise ignored, matching the calling-in-a-loop
    /// discipline of the accept side (one bad connection must not bring
    /// down the listener).
    #[tracing_attributes::instrument(skip_all)]
    pub async fn serve(&self) -> io::Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.ctx.cancelled() => {
                    debug!("listener context cancelled");
                    return Ok(());
                }
                accepted = tokio::time::timeout(self.timeout, self.listener.accept()) => accepted,
            };
            let (socket, peer) = match accepted {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => continue,
            };
            let _ = socket.set_nodelay(true);
            info!("accepted connection from {peer}");
            let handler = self.handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handler(socket).await {
                    debug!("connection from {peer} ended: {e}");
                }
            });
        }
    }
}

/// Dials one connection with a bounded connect timeout and hands it to
/// `handler`, returning whatever `handler` returns.
pub struct Dialer {
    addr: String,
    timeout: Duration,
}

impl Dialer {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self { addr: addr.into(), timeout }
    }

    /// Connects to `self.addr`, bounded by `self.timeout`, then calls
    /// `handler` with the connection and awaits it to completion before
    /// returning its result.
    pub async fn dial<F>(&self, handler: F) -> anyhow::Result<()>
    where
        F: FnOnce(TcpStream) -> BoxFuture<'static, anyhow::Result<()>>,
    {
        let socket = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        let _ = socket.set_nodelay(true);
        handler(socket).await
    }
}
