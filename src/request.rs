//! Incoming request type, shared by HTTP handlers and WebSocket contexts.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, request::Parts};

/// An incoming request.
///
/// HTTP handlers receive one per request. A WebSocket [`Context`](crate::Context)
/// carries the upgrade request that opened the connection, so middleware can
/// inspect its headers and query string the same way a handler would.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: SocketAddr,
}

impl Request {
    pub(crate) fn from_parts(
        parts: Parts,
        body: Bytes,
        params: HashMap<String, String>,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params,
            remote_addr,
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }

    /// Path portion of the URI. Never includes the query string.
    pub fn path(&self) -> &str { self.uri.path() }

    /// Raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> { self.uri.query() }

    /// Case-insensitive header lookup. Non-UTF-8 values are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[cfg(test)]
pub(crate) fn test_request(uri: &str) -> Request {
    let (parts, ()) = http::Request::get(uri)
        .header("host", "localhost")
        .body(())
        .unwrap()
        .into_parts();
    Request::from_parts(parts, Bytes::new(), HashMap::new(), ([127, 0, 0, 1], 9).into())
}
