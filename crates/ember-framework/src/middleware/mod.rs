//! Priority-ordered onion middleware.
//!
//! A [`MiddlewarePipeline`] holds [`Middleware`] sorted by descending
//! priority (ties keep registration order). Running it calls the outermost
//! middleware, which hands control inward by calling [`Next::run`]:
//!
//! ```text
//!  run(ctx)
//!    │
//!    ▼
//!  ┌─ logger (100) ─────────────────────────────┐
//!  │ before ─▶ ┌─ auth (10) ─────────────────┐  │
//!  │           │ before ─▶ terminal ─▶ after │  │
//!  │           └─────────────────────────────┘  │
//!  │ ◀─ after                                   │
//!  └────────────────────────────────────────────┘
//! ```
//!
//! A middleware that returns without calling `next` short-circuits every
//! link inward of it, terminal handler included. Errors and panics are
//! converted to [`MiddlewareError`](crate::error::MiddlewareError) naming the
//! failing link; outer links see the error as the result of `next.run` and
//! their after-logic still runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use ember_framework::middleware::{middleware_fn, MiddlewarePipeline};
//!
//! let pipeline = MiddlewarePipeline::new();
//! pipeline.add(middleware_fn("timer", 50, |ctx: Arc<EngineContext>, next| async move {
//!     let started = Instant::now();
//!     let result = next.run(ctx).await;
//!     tracing::debug!(elapsed = ?started.elapsed(), "request finished");
//!     result
//! }));
//! pipeline.run(ctx).await?;
//! ```

mod next;
mod pipeline;
mod service;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use ember_core::EngineContext;
use tower::BoxError;

pub use next::{Next, Terminal};
pub use pipeline::{MiddlewarePipeline, TERMINAL_NAME};
pub use service::{PipelineLayer, PipelineService, terminal_fn};

/// An interceptor in the onion chain.
///
/// `C` is the context type shared by every link; it defaults to the engine
/// context.
#[async_trait]
pub trait Middleware<C = EngineContext>: Send + Sync + 'static {
    /// Name used in errors, logs and timing records.
    fn name(&self) -> &str;

    /// Higher priorities run further out.
    fn priority(&self) -> i32 {
        0
    }

    /// Runs this link. Call `next.run(ctx)` to continue inward.
    async fn execute(&self, ctx: Arc<C>, next: Next<C>) -> Result<(), BoxError>;
}

/// A [`Middleware`] backed by an async closure. Created by [`middleware_fn`].
pub struct MiddlewareFn<C, F> {
    name: String,
    priority: i32,
    f: F,
    _context: PhantomData<fn(Arc<C>)>,
}

/// Builds a middleware from a name, a priority and an async closure.
pub fn middleware_fn<C, F, Fut>(name: impl Into<String>, priority: i32, f: F) -> MiddlewareFn<C, F>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Next<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    MiddlewareFn {
        name: name.into(),
        priority,
        f,
        _context: PhantomData,
    }
}

#[async_trait]
impl<C, F, Fut> Middleware<C> for MiddlewareFn<C, F>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Next<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn execute(&self, ctx: Arc<C>, next: Next<C>) -> Result<(), BoxError> {
        (self.f)(ctx, next).await
    }
}
