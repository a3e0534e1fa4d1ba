//! Radix-tree HTTP router.
//!
//! One tree per HTTP method, O(path-length) lookup. Requests that are not
//! WebSocket upgrades land here, on the same port as the upgrade acceptor.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::handler::{BoxedHandler, Handler};
use crate::middleware::BoxFuture;
use crate::request::Request;
use crate::response::Response;
use crate::server::Dispatch;

/// The HTTP application router.
///
/// Build it once at startup; hand it to [`Server::serve`](crate::Server::serve)
/// or to [`attach`](crate::attach). Every registration returns `self`.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with an existing one.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let matched = self.routes.get(method)?.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((Arc::clone(matched.value), params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl Dispatch for Router {
    fn dispatch(
        self: Arc<Self>,
        req: hyper::Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> BoxFuture<'static, http::Response<Full<Bytes>>> {
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let Some((handler, params)) = self.lookup(&parts.method, parts.uri.path()) else {
                return Response::status(StatusCode::NOT_FOUND).into_http();
            };
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    debug!(peer = %remote_addr, "failed to read request body: {e}");
                    return Response::status(StatusCode::BAD_REQUEST).into_http();
                }
            };
            handler.call(Request::from_parts(parts, body, params, remote_addr)).await.into_http()
        })
    }
}
