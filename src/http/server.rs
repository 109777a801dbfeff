//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;

/// An HTTP listener serving one router.
///
/// Connections carry their peer address as [`axum::extract::ConnectInfo`],
/// which the rate limit gate uses as the anonymous client identity.
pub struct HttpServer {
    /// Name used in logs
    name: &'static str,
    /// Bound listener
    listener: TcpListener,
    /// Routes to serve
    router: Router,
}

impl HttpServer {
    /// Bind `addr` for `router`.
    pub async fn bind(name: &'static str, addr: SocketAddr, router: Router) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(server = name, addr = %addr, error = %e, "Failed to bind listener");
            e
        })?;
        Ok(Self {
            name,
            listener,
            router,
        })
    }

    /// The address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            server = self.name,
            addr = %self.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(server = self.name, error = %e, "HTTP server failed");
            e
        })?;

        info!(server = self.name, "HTTP server stopped");
        Ok(())
    }
}
