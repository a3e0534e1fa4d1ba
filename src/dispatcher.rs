//! Connection dispatcher: from accepted upgrade to settled middleware chain.
//!
//! Per connection:
//!
//! ```text
//! Accepted ─▶ ContextBuilt ─▶ PipelineRunning ─▶ Settled-Ok
//!                                           └──▶ Settled-Failed
//! ```
//!
//! Each connection gets three tasks: the connection task (handshake
//! completion and read pump), the write pump, and the pipeline. The pipeline
//! runs in its own task so a failing or panicking middleware is reported
//! there and never reaches the accept loop or another connection.
//!
//! A pipeline ends when it settles or when the peer goes away, whichever
//! comes first. In the second case the pipeline task is aborted and its
//! [`Context`] dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Poll;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_PROTOCOL, UPGRADE};
use http::{HeaderValue, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tracing::{Instrument, debug, info_span, warn};

use crate::config::{AcceptorConfig, ListenConfig};
use crate::context::Context;
use crate::error::Error;
use crate::handshake;
use crate::middleware::{Chain, Middleware};
use crate::request::Request;
use crate::response::Response;
use crate::server::ServerInfo;
use crate::socket::{WebSocket, read_pump, write_pump};

/// Middleware registry for upgraded connections.
///
/// Register everything before the application starts listening; the
/// registry is frozen when [`App::listen`](crate::App::listen) attaches it
/// to the bound server.
#[derive(Default)]
pub struct WebSocketServer {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl WebSocketServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware` to the chain. Returns `self` for chaining.
    pub fn with(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Freezes the registry and binds an acceptor to the listener described
    /// by `config`.
    pub(crate) fn listen(self, config: ListenConfig) -> Arc<Acceptor> {
        let chain = Chain::compose(self.middleware);
        debug!(
            middleware = chain.len(),
            addr = %config.server.local_addr(),
            "websocket acceptor attached",
        );
        Arc::new(Acceptor {
            chain,
            options: config.options,
            server: config.server,
            next_id: AtomicU64::new(1),
        })
    }
}

/// Accepts upgrades on one bound listener and runs the chain per connection.
pub(crate) struct Acceptor {
    chain: Chain,
    options: AcceptorConfig,
    server: ServerInfo,
    next_id: AtomicU64,
}

impl Acceptor {
    /// Whether this acceptor handles `req`, as opposed to the HTTP router.
    pub(crate) fn wants(&self, req: &hyper::Request<Incoming>) -> bool {
        if !handshake::is_upgrade(req.headers()) {
            return false;
        }
        match self.options.restricted_path() {
            Some(path) => req.uri().path() == path,
            None => true,
        }
    }

    /// Answers the opening handshake. On success the connection is handed to
    /// [`on_connection`](Self::on_connection) once hyper gives up the socket.
    pub(crate) fn upgrade(
        self: Arc<Self>,
        mut req: hyper::Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> http::Response<Full<Bytes>> {
        let on_upgrade = hyper::upgrade::on(&mut req);
        let (parts, _body) = req.into_parts();
        let request = Request::from_parts(parts, Bytes::new(), Default::default(), remote_addr);

        let accepted = match handshake::negotiate(&request, &self.options) {
            Ok(accepted) => accepted,
            Err(status) => {
                debug!(peer = %remote_addr, path = request.path(), %status, "upgrade rejected");
                return Response::status(status).into_http();
            }
        };

        let mut res = http::Response::new(Full::new(Bytes::new()));
        *res.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let headers = res.headers_mut();
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        match HeaderValue::from_str(&accepted.accept_key) {
            Ok(v) => {
                headers.insert(SEC_WEBSOCKET_ACCEPT, v);
            }
            Err(_) => return Response::status(StatusCode::BAD_REQUEST).into_http(),
        }
        if let Some(protocol) = &accepted.protocol {
            match HeaderValue::from_str(protocol) {
                Ok(v) => {
                    headers.insert(SEC_WEBSOCKET_PROTOCOL, v);
                }
                Err(_) => return Response::status(StatusCode::UNAUTHORIZED).into_http(),
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("ws", id, path = request.path(), peer = %remote_addr);
        tokio::spawn(
            async move {
                match on_upgrade.await {
                    Ok(upgraded) => {
                        let stream = WebSocketStream::from_raw_socket(
                            TokioIo::new(upgraded),
                            Role::Server,
                            Some(self.stream_config()),
                        )
                        .await;
                        self.on_connection(id, request, stream, accepted.protocol).await;
                    }
                    Err(e) => warn!("upgrade failed: {e}"),
                }
            }
            .instrument(span),
        );

        res
    }

    /// Runs one accepted connection until the peer goes away.
    async fn on_connection<S>(
        self: Arc<Self>,
        id: u64,
        request: Request,
        stream: WebSocketStream<S>,
        protocol: Option<String>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        debug!(secure = self.server.is_secure(), ?protocol, "accepted");

        let (sink, frames) = stream.split();
        let (socket, outbound) = WebSocket::open(id, request.remote_addr(), protocol);
        tokio::spawn(write_pump(sink, outbound).in_current_span());

        let ctx = Context::from_upgrade(request, socket.clone());
        debug!("context built");

        let (ready_tx, ready_rx) = oneshot::channel();
        let mut pipeline = tokio::spawn(
            run_pipeline(self.chain.clone(), ctx, ready_tx).in_current_span(),
        );
        // Frames are only read once the chain had its first chance to
        // subscribe; otherwise early messages could reach no one.
        let _ = ready_rx.await;

        let reading = read_pump(frames, socket.clone());
        tokio::pin!(reading);

        tokio::select! {
            // A chain that settled in the same instant the peer left is still
            // reported as settled, not cancelled.
            biased;

            outcome = &mut pipeline => {
                self.settle(outcome, &socket);
                // Middleware may have spawned listeners; keep feeding them
                // until the peer goes away.
                reading.await;
            }

            () = &mut reading => {
                // The peer is gone. Whatever the chain is still waiting on
                // can never complete usefully, so drop it along with its
                // context.
                pipeline.abort();
                let _ = pipeline.await;
                debug!("pipeline cancelled, connection closed");
            }
        }
        debug!("connection finished");
    }

    /// Logs how the chain ended and applies the close-on-error policy.
    fn settle(&self, outcome: Result<Result<(), Error>, JoinError>, socket: &WebSocket) {
        let failure = match outcome {
            Ok(Ok(())) => {
                debug!("pipeline settled");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("middleware panicked: {e}"),
        };
        warn!(error = %failure, "pipeline failed");
        if self.options.closes_on_error() {
            let _ = socket.close_with(CloseCode::Error, "internal error");
        }
    }

    fn stream_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if let Some(limit) = self.options.message_limit() {
            config.max_message_size = Some(limit);
            config.max_frame_size = Some(limit);
        }
        config
    }
}

async fn run_pipeline(
    chain: Chain,
    mut ctx: Context,
    ready: oneshot::Sender<()>,
) -> Result<(), Error> {
    debug!("pipeline running");
    let mut pipeline = chain.run(&mut ctx);
    let first = futures_util::poll!(pipeline.as_mut());
    let _ = ready.send(());
    match first {
        Poll::Ready(outcome) => outcome,
        Poll::Pending => pipeline.await,
    }
}
