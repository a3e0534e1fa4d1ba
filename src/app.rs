//! The WebSocket-capable application.
//!
//! [`attach`] wraps a [`Router`] in an [`App`] that starts the same listener
//! [`Server::listen`] would, then attaches the upgrade acceptor to it. Plain
//! requests and upgrades share the port:
//!
//! ```text
//! accept ─▶ hyper ─▶ Upgradable::dispatch ─┬─ upgrade?  ─▶ Acceptor ─▶ middleware chain
//!                                           └─ otherwise ─▶ Router   ─▶ handler
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;

use crate::config::AcceptorConfig;
use crate::dispatcher::{Acceptor, WebSocketServer};
use crate::error::Error;
use crate::middleware::BoxFuture;
use crate::router::Router;
use crate::server::{Dispatch, Listening, Server, shutdown_signal};
use crate::tls::TlsConfig;

/// Wraps `router` so it also accepts WebSocket upgrades.
///
/// With `tls`, the listener terminates TLS for both plain requests and
/// upgrades; without it the listener is started exactly as
/// [`Server::listen`] starts it.
pub fn attach(router: Router, config: AcceptorConfig, tls: Option<TlsConfig>) -> App {
    App {
        router,
        ws: WebSocketServer::new(),
        config,
        tls,
    }
}

/// A [`Router`] plus its WebSocket middleware registry.
pub struct App {
    router: Router,
    ws: WebSocketServer,
    config: AcceptorConfig,
    tls: Option<TlsConfig>,
}

impl App {
    /// The WebSocket middleware registry.
    pub fn ws(&mut self) -> &mut WebSocketServer {
        &mut self.ws
    }

    /// Binds `addr`, attaches the upgrade acceptor to that same listener
    /// and starts accepting. Returns once the port is live.
    pub async fn listen(self, addr: &str) -> Result<Listening, Error> {
        let mut server = Server::bind(addr);
        if let Some(tls) = self.tls {
            server = server.tls(tls);
        }
        let bound = server.bind_listener().await?;

        let acceptor = self.ws.listen(self.config.bind_to(bound.info()));
        let app = Upgradable {
            router: Arc::new(self.router),
            acceptor,
        };
        Ok(bound.start(Arc::new(app)))
    }

    /// Serves until SIGTERM or Ctrl-C, then drains in-flight HTTP requests.
    pub async fn serve(self, addr: &str) -> Result<(), Error> {
        let listening = self.listen(addr).await?;
        shutdown_signal().await;
        listening.shutdown().await;
        Ok(())
    }
}

struct Upgradable {
    router: Arc<Router>,
    acceptor: Arc<Acceptor>,
}

impl Dispatch for Upgradable {
    fn dispatch(
        self: Arc<Self>,
        req: hyper::Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> BoxFuture<'static, http::Response<Full<Bytes>>> {
        if self.acceptor.wants(&req) {
            let res = Arc::clone(&self.acceptor).upgrade(req, remote_addr);
            return Box::pin(async move { res });
        }
        Arc::clone(&self.router).dispatch(req, remote_addr)
    }
}
