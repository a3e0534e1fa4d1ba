//! Unified error type.

use std::io;

use tokio_rustls::rustls;
use tokio_tungstenite::tungstenite;

/// Boxed error accepted from middleware code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by astor-ws's fallible operations.
///
/// HTTP-level outcomes (404, rejected handshakes) are expressed as responses,
/// not as `Error`s. This type covers infrastructure failures and the failure
/// of a middleware pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),

    #[error("certificate: {0}")]
    Certificate(String),

    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),

    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The connection's write half is gone; nothing more can be sent.
    #[error("connection closed")]
    Closed,

    #[error("middleware: {0}")]
    Middleware(#[source] BoxError),
}

impl Error {
    /// Wraps an arbitrary failure raised inside a middleware.
    pub fn middleware(err: impl Into<BoxError>) -> Self {
        Self::Middleware(err.into())
    }
}
