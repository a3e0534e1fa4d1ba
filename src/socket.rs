//! The per-connection socket handle given to middleware.
//!
//! Frames are moved by two pumps owned by the dispatcher: the read pump hands
//! every incoming data message to each [`Messages`] subscriber, the write
//! pump drains what middleware [`send`](WebSocket::send). Middleware never
//! touch the stream directly, so any number of them may listen at once.
//!
//! Each subscriber owns an unbounded queue. A slow subscriber only grows its
//! own queue; it never loses messages and never holds up the others.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use crate::error::Error;

/// Cheaply cloneable handle to one accepted WebSocket connection.
///
/// Clone it into tasks spawned by middleware; the connection stays writable
/// for as long as the peer keeps it open.
#[derive(Clone, Debug)]
pub struct WebSocket {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    id: u64,
    peer: SocketAddr,
    protocol: Option<String>,
    outbound: mpsc::UnboundedSender<Message>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Message>>>,
    ended: AtomicBool,
}

impl Shared {
    // A panicking subscriber cannot leave the list half-updated, so a
    // poisoned lock is still safe to use.
    fn subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Message>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WebSocket {
    pub(crate) fn open(
        id: u64,
        peer: SocketAddr,
        protocol: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Shared {
            id,
            peer,
            protocol,
            outbound,
            subscribers: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        });
        (Self { inner }, outbound_rx)
    }

    /// Connection number, unique per acceptor.
    pub fn id(&self) -> u64 { self.inner.id }

    pub fn peer_addr(&self) -> SocketAddr { self.inner.peer }

    /// Sub-protocol agreed during the handshake, if any.
    pub fn protocol(&self) -> Option<&str> { self.inner.protocol.as_deref() }

    /// True once the peer has closed or the transport failed.
    pub fn is_closed(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst) || self.inner.outbound.is_closed()
    }

    /// Queues a message for the peer.
    ///
    /// Fails with [`Error::Closed`] once the write half has shut down.
    pub fn send(&self, msg: impl Into<Message>) -> Result<(), Error> {
        self.inner.outbound.send(msg.into()).map_err(|_| Error::Closed)
    }

    /// Starts the closing handshake with code 1000.
    pub fn close(&self) -> Result<(), Error> {
        self.close_with(CloseCode::Normal, "")
    }

    pub fn close_with(&self, code: CloseCode, reason: &str) -> Result<(), Error> {
        self.send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
    }

    /// Subscribes to text and binary messages from the peer.
    ///
    /// Only messages that arrive after this call are delivered; a message
    /// that arrives while nobody is subscribed is dropped. The peer is not
    /// read until the middleware chain has been polled once, so subscribing
    /// before the first `.await` of the chain sees every message. Later
    /// subscriptions (for example from a spawned task) may miss early ones.
    ///
    /// Subscribing after the connection ended yields a finished stream.
    pub fn subscribe(&self) -> Messages {
        let mut subscribers = self.inner.subscribers();
        if self.inner.ended.load(Ordering::SeqCst) {
            return Messages { rx: None };
        }
        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.push(tx);
        Messages { rx: Some(rx) }
    }

    fn deliver(&self, msg: Message) {
        // Dropped `Messages` have closed their queue; forget them.
        self.inner.subscribers().retain(|tx| tx.send(msg.clone()).is_ok());
    }

    fn end(&self) {
        let mut subscribers = self.inner.subscribers();
        self.inner.ended.store(true, Ordering::SeqCst);
        // Dropping the senders finishes every `Messages` once it has
        // drained what was already queued.
        subscribers.clear();
    }
}

/// Incoming messages for one subscriber.
#[derive(Debug)]
pub struct Messages {
    rx: Option<mpsc::UnboundedReceiver<Message>>,
}

impl Messages {
    /// Next text or binary message, or `None` once the connection ended and
    /// every queued message has been returned.
    pub async fn recv(&mut self) -> Option<Message> {
        let rx = self.rx.as_mut()?;
        let msg = rx.recv().await;
        if msg.is_none() {
            self.rx = None;
        }
        msg
    }
}

/// Reads frames until the peer goes away. This is the connection's
/// transport error observer: failures are logged and end this connection only.
pub(crate) async fn read_pump<S>(mut frames: SplitStream<WebSocketStream<S>>, socket: WebSocket)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(msg @ (Message::Text(_) | Message::Binary(_))) => socket.deliver(msg),
            Ok(Message::Close(frame)) => debug!(?frame, "peer closed"),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "transport error");
                break;
            }
        }
    }
    socket.end();
}

/// Writes queued messages until every handle is dropped or a close frame
/// has gone out.
pub(crate) async fn write_pump<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        let closing = msg.is_close();
        if let Err(e) = sink.send(msg).await {
            debug!(error = %e, "write failed, dropping outbound messages");
            break;
        }
        if closing {
            break;
        }
    }
    // Further sends report `Error::Closed`.
    outbound.close();
}

#[cfg(test)]
impl WebSocket {
    /// A handle with no transport behind it, plus the receiving end of its
    /// outbound queue.
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Message>) {
        Self::open(0, ([127, 0, 0, 1], 9).into(), None)
    }

    pub(crate) fn inject(&self, msg: Message) {
        self.deliver(msg);
    }

    pub(crate) fn hang_up(&self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_each_message() {
        let (socket, _out) = WebSocket::detached();
        let mut a = socket.subscribe();
        let mut b = socket.subscribe();

        socket.inject(Message::text("hello"));
        socket.hang_up();

        assert_eq!(a.recv().await, Some(Message::text("hello")));
        assert_eq!(b.recv().await, Some(Message::text("hello")));
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn idle_subscriber_keeps_a_long_burst() {
        let (socket, _out) = WebSocket::detached();
        let mut messages = socket.subscribe();

        for i in 0..1_000 {
            socket.inject(Message::text(i.to_string()));
        }
        socket.hang_up();

        let mut received = Vec::new();
        while let Some(msg) = messages.recv().await {
            received.push(msg.into_text().unwrap().as_str().to_owned());
        }
        let expected: Vec<String> = (0..1_000).map(|i: i32| i.to_string()).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_forgotten() {
        let (socket, _out) = WebSocket::detached();
        let gone = socket.subscribe();
        let mut kept = socket.subscribe();
        drop(gone);

        socket.inject(Message::text("a"));
        assert_eq!(socket.inner.subscribers().len(), 1);
        assert_eq!(kept.recv().await, Some(Message::text("a")));
    }

    #[tokio::test]
    async fn subscribing_after_end_is_finished() {
        let (socket, _out) = WebSocket::detached();
        socket.hang_up();
        assert!(socket.is_closed());
        assert_eq!(socket.subscribe().recv().await, None);
    }

    #[tokio::test]
    async fn send_queues_and_fails_once_writer_is_gone() {
        let (socket, mut out) = WebSocket::detached();
        socket.send("abc").unwrap();
        assert_eq!(out.recv().await, Some(Message::text("abc")));

        drop(out);
        assert!(matches!(socket.send("late"), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn close_with_sends_close_frame() {
        let (socket, mut out) = WebSocket::detached();
        socket.close_with(CloseCode::Error, "boom").unwrap();
        match out.recv().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, CloseCode::Error);
                assert_eq!(frame.reason.as_str(), "boom");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
