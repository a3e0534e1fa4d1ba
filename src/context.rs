//! Per-connection state threaded through the middleware chain.

use std::collections::HashMap;

use http::Extensions;

use crate::request::Request;
use crate::socket::WebSocket;

/// The mutable record one connection's middleware share.
///
/// Created when the upgrade completes and dropped when the chain settles.
/// Each connection gets its own; nothing in it is visible to other
/// connections.
#[derive(Debug)]
pub struct Context {
    request: Request,
    socket: WebSocket,
    path: String,
    params: HashMap<String, String>,
    extensions: Extensions,
}

impl Context {
    /// Builds the context for a freshly upgraded connection from the request
    /// that opened it.
    pub(crate) fn from_upgrade(request: Request, socket: WebSocket) -> Self {
        let path = request.path().to_owned();
        Self {
            request,
            socket,
            path,
            params: HashMap::new(),
            extensions: Extensions::new(),
        }
    }

    /// The upgrade request, with its original headers and query string.
    pub fn request(&self) -> &Request { &self.request }

    pub fn socket(&self) -> &WebSocket { &self.socket }

    /// Path of the upgrade URL; `/abc?foo=bar` is seen as `/abc`.
    pub fn path(&self) -> &str { &self.path }

    /// Parameters captured by the most recent matching route.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> { &self.params }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Stores a middleware-defined value, returning any previous value of
    /// the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.extensions.get_mut()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions.remove()
    }
}

#[cfg(test)]
pub(crate) fn test_context(uri: &str) -> Context {
    let (socket, _) = WebSocket::detached();
    Context::from_upgrade(crate::request::test_request(uri), socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct User(&'static str);

    #[test]
    fn path_drops_query_string() {
        let ctx = test_context("/abc?foo=bar");
        assert_eq!(ctx.path(), "/abc");
        assert_eq!(ctx.request().query(), Some("foo=bar"));
    }

    #[test]
    fn extensions_are_typed_slots() {
        let mut ctx = test_context("/");
        assert_eq!(ctx.insert(User("ana")), None);
        assert_eq!(ctx.insert(User("bo")), Some(User("ana")));
        assert_eq!(ctx.get::<User>(), Some(&User("bo")));
        assert_eq!(ctx.get::<u32>(), None);
        assert_eq!(ctx.remove::<User>(), Some(User("bo")));
    }

    #[test]
    fn contexts_do_not_share_state() {
        let mut a = test_context("/a");
        let b = test_context("/b");
        a.insert(User("ana"));
        assert!(b.get::<User>().is_none());
    }
}
