//! HTTP handler trait and type erasure.
//!
//! The router stores handlers of different concrete types in one table, so
//! each is hidden behind `Arc<dyn ErasedHandler>`:
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }
//!        ↓ router.get("/", hello)
//! Arc::new(FnHandler(hello))            ← BoxedHandler
//!        ↓ at request time
//! Box::pin(async { hello(req).await.into_response() })
//! ```
//!
//! A request costs one `Arc` clone to take the handler out of the tree and
//! one virtual call to run it. WebSocket middleware use a separate trait
//! ([`Middleware`](crate::Middleware)) because they receive a context and a
//! continuation instead of a request.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A boxed handler future.
///
/// Boxing gives every handler the same return type; pinning lets the runtime
/// poll it in place. `Send + 'static` because hyper may move it to another
/// worker thread between polls.
pub(crate) type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Object-safe form of [`Handler`], stored in the router.
///
/// Public but hidden only because it appears in the return type of
/// `Handler::into_boxed_handler`.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> ResponseFuture;
}

/// Shared handler; concurrent requests to the same route clone the `Arc`.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid HTTP route handler:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// Sealed; the blanket impl below is the only implementation.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

// Outside crates cannot name `Sealed`, so they cannot implement `Handler`.
mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler function to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> ResponseFuture {
        // Call the function now, convert its output once it resolves.
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
