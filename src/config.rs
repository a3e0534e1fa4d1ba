//! Upgrade acceptor options.

use std::fmt;
use std::sync::Arc;

use crate::request::Request;
use crate::server::ServerInfo;

type ProtocolFn = dyn Fn(&[String]) -> Option<String> + Send + Sync;
type VerifyFn = dyn Fn(&Request) -> bool + Send + Sync;

/// Options for the WebSocket upgrade acceptor.
///
/// ```rust
/// use astor_ws::AcceptorConfig;
///
/// let config = AcceptorConfig::new()
///     .handle_protocols(|offered| {
///         if offered.iter().any(|p| p == "bad_protocol") {
///             return None;
///         }
///         offered.last().cloned()
///     })
///     .max_message_size(1 << 20);
/// ```
#[derive(Clone)]
pub struct AcceptorConfig {
    handle_protocols: Option<Arc<ProtocolFn>>,
    verify_client: Option<Arc<VerifyFn>>,
    path: Option<String>,
    max_message_size: Option<usize>,
    close_on_error: bool,
}

impl AcceptorConfig {
    pub fn new() -> Self {
        Self {
            handle_protocols: None,
            verify_client: None,
            path: None,
            max_message_size: None,
            close_on_error: false,
        }
    }

    /// Chooses a sub-protocol from the ones the client offered.
    ///
    /// Returning `None` rejects the upgrade with `401 Unauthorized`. Only
    /// consulted when the client offers at least one protocol; without a
    /// callback the first offered protocol is selected.
    pub fn handle_protocols<F>(mut self, f: F) -> Self
    where
        F: Fn(&[String]) -> Option<String> + Send + Sync + 'static,
    {
        self.handle_protocols = Some(Arc::new(f));
        self
    }

    /// Inspects the upgrade request before accepting it. Returning `false`
    /// rejects the upgrade with `401 Unauthorized`.
    pub fn verify_client<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.verify_client = Some(Arc::new(f));
        self
    }

    /// Accept upgrades on this exact path only. Upgrade requests for other
    /// paths are handed to the HTTP router like any other request.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Largest incoming message accepted; larger ones end the connection.
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }

    /// Close the socket with code 1011 when a connection's middleware
    /// pipeline fails. Off by default: the socket stays open and only the
    /// failure is logged.
    pub fn close_on_error(mut self, close: bool) -> Self {
        self.close_on_error = close;
        self
    }

    /// Merges these options with the handle of an already bound listener.
    pub(crate) fn bind_to(self, server: ServerInfo) -> ListenConfig {
        ListenConfig { options: self, server }
    }

    pub(crate) fn protocol_handler(&self) -> Option<&ProtocolFn> {
        self.handle_protocols.as_deref()
    }

    pub(crate) fn client_verifier(&self) -> Option<&VerifyFn> {
        self.verify_client.as_deref()
    }

    pub(crate) fn restricted_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub(crate) fn message_limit(&self) -> Option<usize> {
        self.max_message_size
    }

    pub(crate) fn closes_on_error(&self) -> bool {
        self.close_on_error
    }
}

impl Default for AcceptorConfig {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for AcceptorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptorConfig")
            .field("handle_protocols", &self.handle_protocols.is_some())
            .field("verify_client", &self.verify_client.is_some())
            .field("path", &self.path)
            .field("max_message_size", &self.max_message_size)
            .field("close_on_error", &self.close_on_error)
            .finish()
    }
}

/// Acceptor options bound to the listener they will accept on.
#[derive(Debug)]
pub(crate) struct ListenConfig {
    pub(crate) options: AcceptorConfig,
    pub(crate) server: ServerInfo,
}
