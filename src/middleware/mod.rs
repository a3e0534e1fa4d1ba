//! WebSocket middleware and the chain that runs it.
//!
//! Every accepted connection runs the registered middleware in order against
//! its own [`Context`]. Each one receives a [`Next`] continuation:
//!
//! ```text
//! chain.run(ctx)
//!   └─ mw[0].call(ctx, next ─┐)
//!                            └─ mw[1].call(ctx, next ─┐)
//!                                                     └─ … last: next.run() == Ok(())
//! ```
//!
//! - Calling `next.run(ctx).await` continues with the rest of the chain and
//!   resumes afterwards, so code after it sees what later middleware did.
//! - Returning without calling `next` ends the chain. Later middleware never
//!   see the connection; this is how a route takes a connection for itself.
//! - Returning `Err` ends the chain and the error is reported for this
//!   connection only.
//!
//! `Next::run` takes `self` by value and `Next` is neither `Clone` nor
//! `Copy`: continuing twice from the same middleware does not compile.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;

pub mod route;

/// A heap-allocated, type-erased future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stage of a connection's pipeline.
///
/// Implement this for reusable middleware types; wrap closures with
/// [`from_fn`].
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>>;
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        (**self).call(ctx, next)
    }
}

impl<M: Middleware + ?Sized> Middleware for Box<M> {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        (**self).call(ctx, next)
    }
}

/// The remainder of the chain after the current middleware.
#[must_use = "the chain ends here unless `run` is awaited"]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Runs the remaining middleware against `ctx`.
    ///
    /// Resolves to `Ok(())` immediately when this is the end of the chain.
    pub fn run<'c>(self, ctx: &'c mut Context) -> BoxFuture<'c, Result<(), Error>>
    where
        'a: 'c,
    {
        match self.rest.split_first() {
            Some((head, rest)) => head.call(ctx, Next { rest }),
            None => Box::pin(async { Ok(()) }),
        }
    }

    /// Number of middleware still ahead.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

/// Registered middleware, frozen in registration order.
#[derive(Clone)]
pub(crate) struct Chain {
    stack: Arc<[Arc<dyn Middleware>]>,
}

impl Chain {
    pub(crate) fn compose(stack: Vec<Arc<dyn Middleware>>) -> Self {
        Self { stack: stack.into() }
    }

    pub(crate) fn len(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn run<'c>(&'c self, ctx: &'c mut Context) -> BoxFuture<'c, Result<(), Error>> {
        Next { rest: &self.stack }.run(ctx)
    }
}

/// Turns a closure into [`Middleware`].
///
/// ```rust
/// use astor_ws::middleware::{self, Middleware};
///
/// let log_path = middleware::from_fn(|ctx, next| Box::pin(async move {
///     tracing::info!(path = ctx.path(), "connection");
///     next.run(ctx).await
/// }));
/// # fn assert_middleware(_: impl Middleware) {}
/// # assert_middleware(log_path);
/// ```
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    FromFn(f)
}

/// Middleware built by [`from_fn`].
pub struct FromFn<F>(F);

impl<F> Middleware for FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        (self.0)(ctx, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;

    #[derive(Clone, Default)]
    struct Trail(Vec<&'static str>);

    fn mark(name: &'static str) -> Arc<dyn Middleware> {
        Arc::new(from_fn(move |ctx, next| Box::pin(async move {
            ctx.get_mut::<Trail>().unwrap().0.push(name);
            next.run(ctx).await
        })))
    }

    fn stop(name: &'static str) -> Arc<dyn Middleware> {
        Arc::new(from_fn(move |ctx, _next| Box::pin(async move {
            ctx.get_mut::<Trail>().unwrap().0.push(name);
            Ok(())
        })))
    }

    fn fail() -> Arc<dyn Middleware> {
        Arc::new(from_fn(|_ctx, _next| Box::pin(async {
            Err(Error::middleware("boom"))
        })))
    }

    async fn trail_of(chain: &Chain) -> (Result<(), Error>, Vec<&'static str>) {
        let mut ctx = test_context("/");
        ctx.insert(Trail::default());
        let outcome = chain.run(&mut ctx).await;
        (outcome, ctx.remove::<Trail>().unwrap().0)
    }

    #[tokio::test]
    async fn runs_in_registration_order() {
        let chain = Chain::compose(vec![mark("a"), mark("b"), mark("c")]);
        let (outcome, trail) = trail_of(&chain).await;
        assert!(outcome.is_ok());
        assert_eq!(trail, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn not_calling_next_short_circuits() {
        let chain = Chain::compose(vec![mark("a"), stop("b"), mark("c")]);
        let (outcome, trail) = trail_of(&chain).await;
        assert!(outcome.is_ok());
        assert_eq!(trail, ["a", "b"]);
    }

    #[tokio::test]
    async fn failure_stops_chain_and_propagates() {
        let chain = Chain::compose(vec![mark("a"), fail(), mark("c")]);
        let (outcome, trail) = trail_of(&chain).await;
        assert!(matches!(outcome, Err(Error::Middleware(_))));
        assert_eq!(trail, ["a"]);
    }

    #[tokio::test]
    async fn code_after_next_sees_downstream_changes() {
        let wrap: Arc<dyn Middleware> = Arc::new(from_fn(|ctx, next| Box::pin(async move {
            next.run(ctx).await?;
            ctx.get_mut::<Trail>().unwrap().0.push("after");
            Ok(())
        })));
        let chain = Chain::compose(vec![wrap, mark("inner")]);
        let (_, trail) = trail_of(&chain).await;
        assert_eq!(trail, ["inner", "after"]);
    }

    #[tokio::test]
    async fn empty_chain_succeeds() {
        let chain = Chain::compose(Vec::new());
        assert_eq!(chain.len(), 0);
        let mut ctx = test_context("/");
        assert!(chain.run(&mut ctx).await.is_ok());
    }

    #[tokio::test]
    async fn remaining_counts_what_is_ahead() {
        let probe: Arc<dyn Middleware> = Arc::new(from_fn(|ctx, next| Box::pin(async move {
            ctx.insert(next.remaining());
            next.run(ctx).await
        })));
        let chain = Chain::compose(vec![probe, mark("x"), mark("y")]);
        let mut ctx = test_context("/");
        ctx.insert(Trail::default());
        chain.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.get::<usize>(), Some(&2));
    }
}
