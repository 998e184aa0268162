//! Tower integration for [`MiddlewarePipeline`].
//!
//! [`PipelineService`] implements `tower::Service<Arc<C>>`, so a pipeline and
//! its terminal handler can be stacked with ordinary tower layers.
//! [`PipelineLayer`] goes the other way: it turns any inner service into the
//! terminal of a pipeline.
//!
//! ```text
//! ServiceBuilder::new()
//!     .layer(PipelineLayer::new(pipeline))   ← middleware chain
//!     .service(handler)                      ← terminal
//! ```

use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use ember_core::EngineContext;
use futures::future::BoxFuture;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Layer, Service};

use super::next::Terminal;
use super::pipeline::MiddlewarePipeline;

/// Builds a [`Terminal`] from an async closure.
pub fn terminal_fn<C, F, Fut>(f: F) -> Terminal<C>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    BoxCloneSyncService::new(tower::service_fn(f))
}

/// A pipeline plus optional terminal, usable as a tower service.
pub struct PipelineService<C = EngineContext> {
    pipeline: Arc<MiddlewarePipeline<C>>,
    terminal: Option<Terminal<C>>,
}

impl<C: Send + Sync + 'static> PipelineService<C> {
    /// Wraps `pipeline` with no terminal handler.
    pub fn new(pipeline: Arc<MiddlewarePipeline<C>>) -> Self {
        Self {
            pipeline,
            terminal: None,
        }
    }

    /// Sets the terminal handler.
    pub fn with_terminal(mut self, terminal: Terminal<C>) -> Self {
        self.terminal = Some(terminal);
        self
    }

    /// The wrapped pipeline.
    pub fn pipeline(&self) -> &Arc<MiddlewarePipeline<C>> {
        &self.pipeline
    }
}

impl<C> Clone for PipelineService<C> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            terminal: self.terminal.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> Service<Arc<C>> for PipelineService<C> {
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<C>) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);
        let terminal = self.terminal.clone();
        Box::pin(async move {
            pipeline
                .execute(ctx, terminal)
                .await
                .map_err(|e| Box::new(e) as BoxError)
        })
    }
}

/// Tower layer that runs a pipeline in front of the wrapped service.
pub struct PipelineLayer<C = EngineContext> {
    pipeline: Arc<MiddlewarePipeline<C>>,
}

impl<C> PipelineLayer<C> {
    pub fn new(pipeline: Arc<MiddlewarePipeline<C>>) -> Self {
        Self { pipeline }
    }
}

impl<C> Clone for PipelineLayer<C> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<C, S> Layer<S> for PipelineLayer<C>
where
    C: Send + Sync + 'static,
    S: Service<Arc<C>, Response = (), Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PipelineService<C>;

    fn layer(&self, inner: S) -> Self::Service {
        PipelineService::new(Arc::clone(&self.pipeline)).with_terminal(BoxCloneSyncService::new(inner))
    }
}
