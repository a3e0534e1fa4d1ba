//! Listener, accept loop and graceful shutdown.
//!
//! [`Server::listen`] binds the socket, spawns the accept loop and hands back
//! a [`Listening`] handle as soon as the port is live. [`Server::serve`] is the
//! blocking flavour: listen, wait for SIGTERM / Ctrl-C, drain.
//!
//! Shutdown stops `accept()` immediately and then waits for every in-flight
//! HTTP connection task. Upgraded WebSocket connections are detached from the
//! HTTP connection once the `101` is sent and are not drained.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::error::Error;
use crate::middleware::BoxFuture;
use crate::router::Router;
use crate::tls::TlsConfig;

/// Turns one parsed HTTP request into one response.
///
/// The router implements it for plain traffic; [`App`](crate::App) layers the
/// upgrade acceptor in front of the router.
pub(crate) trait Dispatch: Send + Sync + 'static {
    fn dispatch(
        self: Arc<Self>,
        req: hyper::Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> BoxFuture<'static, http::Response<Full<Bytes>>>;
}

/// Facts about a bound listener that the upgrade acceptor attaches to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ServerInfo {
    local_addr: SocketAddr,
    secure: bool,
}

impl ServerInfo {
    pub fn local_addr(&self) -> SocketAddr { self.local_addr }

    /// Whether connections on this listener are TLS-terminated.
    pub fn is_secure(&self) -> bool { self.secure }
}

/// The HTTP server.
pub struct Server {
    addr: String,
    tls: Option<TlsConfig>,
}

impl Server {
    /// Configures the server to bind to `addr` (`host:port`). The address is
    /// parsed when the server starts listening.
    ///
    /// ```rust,no_run
    /// use astor_ws::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), tls: None }
    }

    /// Terminates TLS on every accepted stream.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Binds and starts accepting; returns once the port is live.
    pub async fn listen(self, router: Router) -> Result<Listening, Error> {
        Ok(self.bind_listener().await?.start(Arc::new(router)))
    }

    /// Serves `router` until SIGTERM or Ctrl-C, then drains in-flight requests.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let listening = self.listen(router).await?;
        shutdown_signal().await;
        listening.shutdown().await;
        Ok(())
    }

    pub(crate) async fn bind_listener(self) -> Result<Bound, Error> {
        let addr: SocketAddr = self.addr
            .parse()
            .map_err(|_| Error::InvalidAddress(self.addr.clone()))?;
        let listener = TcpListener::bind(addr).await?;
        let info = ServerInfo {
            local_addr: listener.local_addr()?,
            secure: self.tls.is_some(),
        };
        info!(addr = %info.local_addr, secure = info.secure, "astor-ws listening");
        Ok(Bound { listener, tls: self.tls, info })
    }
}

/// A listener that is bound but not yet accepting.
pub(crate) struct Bound {
    listener: TcpListener,
    tls: Option<TlsConfig>,
    info: ServerInfo,
}

impl Bound {
    pub(crate) fn info(&self) -> ServerInfo { self.info }

    pub(crate) fn start(self, dispatch: Arc<dyn Dispatch>) -> Listening {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let info = self.info;
        let task = tokio::spawn(accept_loop(self.listener, self.tls, dispatch, shutdown_rx));
        Listening { info, shutdown: shutdown_tx, task }
    }
}

/// Handle to a running server.
///
/// Dropping the handle leaves the server running in the background.
#[derive(Debug)]
pub struct Listening {
    info: ServerInfo,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Listening {
    pub fn local_addr(&self) -> SocketAddr { self.info.local_addr }
    pub fn info(&self) -> ServerInfo { self.info }

    /// Stops accepting and waits for in-flight HTTP connections to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("accept loop ended abnormally: {e}");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsConfig>,
    dispatch: Arc<dyn Dispatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Every connection task lands in this set so shutdown can wait for the
    // ones still in flight. Upgraded WebSocket connections leave the set as
    // soon as hyper hands the socket over; see the module docs.
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            // `biased` polls the arms top to bottom instead of in random
            // order. Shutdown comes first so a signal stops accepting even
            // while more connections are queued on the listener.
            biased;

            // `changed()` errors once the `Listening` handle is dropped. The
            // pattern then fails to match and the arm is disabled, leaving
            // the server running in the background.
            Ok(()) = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(in_flight = tasks.len(), "shutdown requested, draining connections");
                    break;
                }
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };
                // One `Arc` clone per connection; the routing table and the
                // acceptor are shared, never copied.
                let dispatch = Arc::clone(&dispatch);
                match &tls {
                    None => {
                        tasks.spawn(serve_connection(stream, dispatch, remote_addr));
                    }
                    Some(tls) => {
                        // The TLS handshake runs inside the connection task so
                        // a slow client cannot stall the accept loop.
                        let acceptor = tls.acceptor().clone();
                        tasks.spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(stream) => serve_connection(stream, dispatch, remote_addr).await,
                                Err(e) => error!(peer = %remote_addr, "tls handshake failed: {e}"),
                            }
                        });
                    }
                }
            }

            // Reap finished connection tasks so the set does not grow without
            // bound on a long-running server. The guard keeps this arm from
            // spinning on an empty set.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    // Close the port before draining so new clients are refused right away
    // instead of queueing behind a server that will never accept them.
    drop(listener);
    while tasks.join_next().await.is_some() {}
    info!("astor-ws stopped");
}

async fn serve_connection<I>(io: I, dispatch: Arc<dyn Dispatch>, remote_addr: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // `service_fn` adapts a closure into a hyper `Service`. The closure runs
    // once per request on the connection, not once per connection, so the
    // dispatcher is cloned per request. Errors are handled inside dispatch
    // (404, 400, rejected upgrades), which is why the error type is
    // `Infallible`.
    let svc = service_fn(move |req| {
        let dispatch = Arc::clone(&dispatch);
        async move { Ok::<_, Infallible>(dispatch.dispatch(req, remote_addr).await) }
    });

    // `auto::Builder` speaks HTTP/1.1 or HTTP/2, whichever the client picks.
    // Upgrades must stay enabled: without `with_upgrades` hyper keeps the
    // socket after the `101` and `upgrade::on` never resolves. Once the
    // upgrade completes this future returns and the socket belongs to the
    // WebSocket acceptor's task.
    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(io), svc)
        .await
    {
        debug!(peer = %remote_addr, "connection error: {e}");
    }
}

/// Resolves on the first SIGTERM or Ctrl-C the process receives.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}

#[cfg(test)]
pub(crate) fn test_info() -> ServerInfo {
    ServerInfo { local_addr: ([127, 0, 0, 1], 0).into(), secure: false }
}
