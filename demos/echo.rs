//! Echo server: WebSocket routes and plain HTTP on one port.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example echo
//!
//! Try:
//!   curl http://localhost:3000/healthz
//!   websocat ws://localhost:3000/rooms/lobby
//!   websocat --protocol chat ws://localhost:3000/echo
//!
//! Set `TLS_CERT` and `TLS_KEY` to PEM files to serve `wss://` instead.

use astor_ws::middleware::{BoxFuture, from_fn, route};
use astor_ws::{AcceptorConfig, Context, Next, Request, Router, TlsConfig};

#[tokio::main]
async fn main() -> Result<(), astor_ws::Error> {
    tracing_subscriber::fmt::init();

    let tls = match (std::env::var("TLS_CERT"), std::env::var("TLS_KEY")) {
        (Ok(cert), Ok(key)) => Some(TlsConfig::from_pem_files(cert, key)?),
        _ => None,
    };

    let config = AcceptorConfig::new()
        .handle_protocols(|offered| offered.iter().find(|p| *p == "chat").cloned())
        .max_message_size(64 * 1024);

    let router = Router::new().get("/healthz", healthz);
    let mut app = astor_ws::attach(router, config, tls);

    app.ws()
        .with(from_fn(log_connection))
        .with(route::all("/echo", from_fn(echo)))
        .with(route::all("/rooms/{room}", from_fn(greet_room)))
        .with(from_fn(echo));

    app.serve("0.0.0.0:3000").await
}

async fn healthz(_req: Request) -> &'static str {
    "ok"
}

fn log_connection<'a>(ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), astor_ws::Error>> {
    Box::pin(async move {
        tracing::info!(
            path = ctx.path(),
            peer = %ctx.socket().peer_addr(),
            protocol = ?ctx.socket().protocol(),
            "connected",
        );
        next.run(ctx).await
    })
}

// Terminal: keeps echoing after the chain settles.
fn echo<'a>(ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, Result<(), astor_ws::Error>> {
    let socket = ctx.socket().clone();
    let mut messages = socket.subscribe();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            if socket.send(msg).is_err() {
                break;
            }
        }
    });
    Box::pin(async { Ok(()) })
}

fn greet_room<'a>(ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), astor_ws::Error>> {
    Box::pin(async move {
        let room = ctx.param("room").unwrap_or("nowhere").to_owned();
        ctx.socket().send(format!("welcome to {room}"))?;
        next.run(ctx).await
    })
}
