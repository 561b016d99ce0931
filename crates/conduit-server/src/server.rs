//! The HTTP listener.
//!
//! One task per connection, one [`Framework::handle`] call per request. Both
//! HTTP/1.1 and HTTP/2 are served through hyper-util's auto builder.
//!
//! # Shutdown
//!
//! When the [`ShutdownSignal`] fires the server:
//!
//! 1. stops accepting and asks every connection to close after its current request
//! 2. cancels every request context with `CancelReason::Shutdown`, so handlers
//!    blocked in `Context::until_cancelled` answer 503 right away
//! 3. waits up to [`ServerConfig::shutdown_timeout`](crate::ServerConfig::shutdown_timeout)
//!    for connections to drain
//! 4. fires the force token, which interrupts the remaining chains, and gives
//!    them [`FORCE_GRACE`] to write their 503 before the connection tasks are
//!    dropped
//! 5. runs the shutdown hooks

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use conduit_core::{Error, Response};

use crate::framework::Framework;
use crate::lifecycle::LifecycleError;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// How long forced requests get to write their response before their
/// connections are dropped.
pub const FORCE_GRACE: Duration = Duration::from_millis(500);

/// Listener failures.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The configured address does not parse.
    #[error("invalid bind address `{addr}`: {source}")]
    InvalidAddress {
        /// The configured address.
        addr: String,
        /// Parse failure.
        #[source]
        source: std::net::AddrParseError,
    },

    /// Binding the socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address.
        addr: SocketAddr,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A lifecycle phase failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Framework {
    /// Serves on the configured address until SIGTERM or SIGINT.
    pub async fn listen(self) -> Result<(), ServerError> {
        self.listen_with_shutdown(ShutdownSignal::with_os_signals())
            .await
    }

    /// Serves on the configured address until `shutdown` fires.
    pub async fn listen_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = self
            .config()
            .socket_addr()
            .map_err(|source| ServerError::InvalidAddress {
                addr: self.config().http_addr().to_string(),
                source,
            })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` fires.
    ///
    /// Startup hooks run before the first accept; if one fails nothing is
    /// served and the shutdown hooks do not run.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        self.startup().await?;

        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, routes = self.route_count(), "conduit listening");

        let framework = Arc::new(self);
        let tracker = ConnectionTracker::new();
        let mut connections = JoinSet::new();
        let stop = shutdown.recv();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                biased;

                () = &mut stop => {
                    tracing::info!(
                        connections = tracker.active_connections(),
                        "shutdown signal received, draining connections"
                    );
                    framework.begin_shutdown();
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(error) => {
                            tracing::error!(error = %error, "failed to accept connection");
                            continue;
                        }
                    };

                    if let Some(max) = framework.config().max_connections() {
                        if tracker.active_connections() >= max {
                            tracing::warn!(peer = %remote_addr, max, "connection limit reached, closing");
                            drop(stream);
                            continue;
                        }
                    }

                    let framework = Arc::clone(&framework);
                    let guard = tracker.acquire();
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        serve_connection(framework, stream, remote_addr, shutdown).await;
                        drop(guard);
                    });
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        drop(listener);

        let drain = framework.config().shutdown_timeout();
        if tokio::time::timeout(drain, tracker.wait_idle()).await.is_err() {
            tracing::warn!(
                connections = tracker.active_connections(),
                window = ?drain,
                "drain window elapsed"
            );
            framework.abort_in_flight();
            if tokio::time::timeout(FORCE_GRACE, tracker.wait_idle()).await.is_err() {
                tracing::warn!(
                    connections = tracker.active_connections(),
                    "dropping connections that ignored the force token"
                );
            }
            connections.shutdown().await;
        }
        while connections.join_next().await.is_some() {}

        framework.shutdown().await?;
        tracing::info!("conduit stopped");
        Ok(())
    }

    /// Buffers the body under the configured limit, then handles the request.
    async fn dispatch(&self, request: http::Request<Incoming>, remote_addr: SocketAddr) -> Response {
        let (parts, body) = request.into_parts();
        match Limited::new(body, self.config().max_body_bytes()).collect().await {
            Ok(collected) => {
                let request = http::Request::from_parts(parts, collected.to_bytes());
                self.handle(request, Some(remote_addr)).await
            }
            Err(error) => {
                let error = if error.downcast_ref::<LengthLimitError>().is_some() {
                    Error::http(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
                } else {
                    tracing::debug!(peer = %remote_addr, error = %error, "failed to read request body");
                    Error::bad_request("failed to read request body")
                };
                self.reject(parts, error, Some(remote_addr)).await
            }
        }
    }
}

async fn serve_connection(
    framework: Arc<Framework>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    shutdown: ShutdownSignal,
) {
    let keep_alive = framework.config().keep_alive();
    let http2 = framework.config().http2_enabled();
    let service = service_fn(move |request| {
        let framework = Arc::clone(&framework);
        async move { Ok::<_, Infallible>(framework.dispatch(request, remote_addr).await) }
    });

    let mut builder = ConnBuilder::new(TokioExecutor::new());
    if !http2 {
        builder = builder.http1_only();
    }
    builder.http1().keep_alive(keep_alive);
    let io = TokioIo::new(stream);
    let connection = builder.serve_connection(io, service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        () = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(error) = result {
        tracing::debug!(peer = %remote_addr, error = %error, "connection closed with error");
    }
}
