//! # astor-ws
//!
//! WebSocket middleware pipelines for astor applications, on the same port
//! as the HTTP routes.
//!
//! ## How a connection is handled
//!
//! 1. [`App::listen`] binds one listener (TLS or plain) and attaches the
//!    upgrade acceptor to it. Non-upgrade requests go to the [`Router`].
//! 2. An upgrade request is validated and its sub-protocol negotiated.
//!    Rejections are plain HTTP responses; no middleware runs.
//! 3. The accepted connection gets its own [`Context`]: the upgrade
//!    [`Request`], the [`WebSocket`] handle and the request path without its
//!    query string.
//! 4. The registered middleware run in order. Each calls `next` to continue
//!    or returns to stop. A failure ends only that connection's chain.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use astor_ws::middleware::{from_fn, route};
//! use astor_ws::{AcceptorConfig, Request, Router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), astor_ws::Error> {
//!     let router = Router::new().get("/healthz", healthz);
//!     let mut app = astor_ws::attach(router, AcceptorConfig::new(), None);
//!
//!     app.ws()
//!         .with(from_fn(|ctx, next| Box::pin(async move {
//!             tracing::info!(path = ctx.path(), "connected");
//!             next.run(ctx).await
//!         })))
//!         .with(route::all("/echo", from_fn(|ctx, _next| Box::pin(async move {
//!             let socket = ctx.socket().clone();
//!             let mut messages = socket.subscribe();
//!             tokio::spawn(async move {
//!                 while let Some(msg) = messages.recv().await {
//!                     let _ = socket.send(msg);
//!                 }
//!             });
//!             Ok(())
//!         }))));
//!
//!     app.serve("0.0.0.0:3000").await
//! }
//!
//! async fn healthz(_req: Request) -> &'static str {
//!     "ok"
//! }
//! ```

mod app;
mod config;
mod context;
mod dispatcher;
mod error;
mod handler;
mod handshake;
mod request;
mod response;
mod router;
mod server;
mod socket;
mod tls;

pub mod middleware;

pub use app::{App, attach};
pub use config::AcceptorConfig;
pub use context::Context;
pub use dispatcher::WebSocketServer;
pub use error::{BoxError, Error};
pub use handler::Handler;
pub use middleware::{Middleware, Next};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{Listening, Server, ServerInfo};
pub use socket::{Messages, WebSocket};
pub use tls::TlsConfig;

pub use tokio_tungstenite::tungstenite::Message;
pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
