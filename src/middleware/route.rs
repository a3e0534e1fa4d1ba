//! Path-matching middleware.
//!
//! ```rust
//! use astor_ws::middleware::{from_fn, route};
//!
//! let chat = route::all("/rooms/{room}", from_fn(|ctx, _next| Box::pin(async move {
//!     let room = ctx.param("room").unwrap_or_default().to_owned();
//!     tracing::info!(%room, "joined");
//!     Ok(())
//! })));
//! ```

use std::collections::HashMap;

use matchit::Router as MatchitRouter;

use crate::context::Context;
use crate::error::Error;
use crate::middleware::{BoxFuture, Middleware, Next};

/// Runs `handler` for connections whose path matches `pattern`; every other
/// connection continues down the chain untouched.
///
/// The handler receives the chain's `next` and decides whether to continue.
/// A handler that never calls it takes the connection exclusively.
/// Captured parameters are available through [`Context::param`].
///
/// # Panics
///
/// Panics if `pattern` is not a valid matchit route.
pub fn all(pattern: &str, handler: impl Middleware) -> Route {
    let mut tree = MatchitRouter::new();
    tree.insert(pattern, ())
        .unwrap_or_else(|e| panic!("invalid route `{pattern}`: {e}"));
    Route {
        pattern: pattern.to_owned(),
        tree,
        handler: Box::new(handler),
    }
}

/// Middleware returned by [`all`].
pub struct Route {
    pattern: String,
    tree: MatchitRouter<()>,
    handler: Box<dyn Middleware>,
}

impl Route {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let matched = self.tree.at(path).ok()?;
        Some(matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect())
    }
}

impl Middleware for Route {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        match self.matches(ctx.path()) {
            Some(params) => {
                ctx.set_params(params);
                self.handler.call(ctx, next)
            }
            None => next.run(ctx),
        }
    }
}
