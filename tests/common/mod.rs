//! Shared fixtures: the echo application and a small WebSocket client.

#![allow(dead_code)]

use std::time::Duration;

use astor_ws::middleware::{from_fn, route};
use astor_ws::{AcceptorConfig, App, Error, Listening, Message, Middleware, Request, Router, TlsConfig, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;

pub const WAIT: Duration = Duration::from_secs(5);

/// Picks the last offered protocol, refusing any offer that includes
/// `bad_protocol`.
pub fn refuse_bad_protocol(offered: &[String]) -> Option<String> {
    if offered.iter().any(|p| p == "bad_protocol") {
        return None;
    }
    offered.last().cloned()
}

/// Echoes every message the peer sends, for as long as it is connected.
pub fn spawn_echo(socket: &WebSocket, only: Option<&'static str>) {
    let socket = socket.clone();
    let mut messages = socket.subscribe();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            if only.is_none() || msg.to_text().ok() == only {
                let _ = socket.send(msg);
            }
        }
    });
}

/// Takes the connection and echoes everything; never calls `next`.
pub fn echo() -> impl Middleware {
    from_fn(|ctx, _next| Box::pin(async move {
        spawn_echo(ctx.socket(), None);
        Ok(())
    }))
}

/// The echo application: any connection echoes `123`; `/abc` and `/def`
/// echo everything. Plain `GET /hello` is served on the same port.
pub fn echo_app(tls: Option<TlsConfig>) -> App {
    let config = AcceptorConfig::new().handle_protocols(refuse_bad_protocol);
    let router = Router::new().get("/hello", hello);
    let mut app = astor_ws::attach(router, config, tls);

    app.ws()
        .with(from_fn(|ctx, next| Box::pin(async move {
            spawn_echo(ctx.socket(), Some("123"));
            next.run(ctx).await
        })))
        .with(route::all("/abc", echo()))
        .with(route::all("/abc", echo()))
        .with(route::all("/def", echo()));
    app
}

/// `/boom` fails its chain, `/panic` panics in it; everything else echoes.
pub fn failing_app(tls: Option<TlsConfig>, config: AcceptorConfig) -> App {
    let mut app = astor_ws::attach(Router::new(), config, tls);
    app.ws()
        .with(route::all("/boom", from_fn(|_ctx, _next| Box::pin(async {
            Err(Error::middleware("boom"))
        }))))
        .with(route::all("/panic", from_fn(|ctx, _next| Box::pin(async move {
            if ctx.path() == "/panic" {
                panic!("middleware panicked on purpose");
            }
            Ok(())
        }))))
        .with(echo());
    app
}

async fn hello(_req: Request) -> &'static str {
    "hello"
}

pub async fn start(app: App) -> Listening {
    app.listen("127.0.0.1:0").await.expect("listen")
}

pub async fn send_text<S>(ws: &mut WebSocketStream<S>, text: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ws.send(Message::text(text)).await.expect("send");
}

/// Next message from the server, failing the test after [`WAIT`].
pub async fn next_message<S>(ws: &mut WebSocketStream<S>) -> Message
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(WAIT, ws.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("websocket error")
}

pub async fn next_text<S>(ws: &mut WebSocketStream<S>) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    next_message(ws).await.into_text().expect("text message").as_str().to_owned()
}
