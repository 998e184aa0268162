use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use ember_core::{EngineContext, Probe, RecordPayload, Timing, TimingCategory};
use parking_lot::RwLock;
use tower::BoxError;
use tracing::{debug, info};

use super::next::{Next, Terminal};
use super::Middleware;
use crate::error::{MiddlewareError, MiddlewareResult};

/// Name reported in [`MiddlewareError`] when the terminal handler fails.
pub const TERMINAL_NAME: &str = "terminal";

pub(crate) struct Entry<C> {
    pub(crate) middleware: Arc<dyn Middleware<C>>,
    pub(crate) name: String,
    pub(crate) priority: i32,
    seq: u64,
    owner: Option<String>,
}

impl<C> Clone for Entry<C> {
    fn clone(&self) -> Self {
        Self {
            middleware: Arc::clone(&self.middleware),
            name: self.name.clone(),
            priority: self.priority,
            seq: self.seq,
            owner: self.owner.clone(),
        }
    }
}

/// Ordered collection of middleware run as an onion chain.
///
/// Adding and removing middleware while a run is in flight is allowed; the
/// run keeps the chain it started with.
pub struct MiddlewarePipeline<C = EngineContext> {
    entries: RwLock<Vec<Entry<C>>>,
    next_seq: AtomicU64,
    probe: Probe,
}

impl<C: Send + Sync + 'static> MiddlewarePipeline<C> {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::with_probe(Probe::disabled())
    }

    /// Creates an empty pipeline that records a timing for every link.
    pub fn with_probe(probe: Probe) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            probe,
        }
    }

    /// Adds a middleware.
    pub fn add<M: Middleware<C>>(&self, middleware: M) {
        self.insert(Arc::new(middleware), None);
    }

    /// Adds an already shared middleware.
    pub fn add_shared(&self, middleware: Arc<dyn Middleware<C>>) {
        self.insert(middleware, None);
    }

    /// Adds a middleware on behalf of the plugin `owner`.
    pub(crate) fn add_owned(&self, middleware: Arc<dyn Middleware<C>>, owner: &str) {
        self.insert(middleware, Some(owner.to_string()));
    }

    fn insert(&self, middleware: Arc<dyn Middleware<C>>, owner: Option<String>) {
        let entry = Entry {
            name: middleware.name().to_string(),
            priority: middleware.priority(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            owner,
            middleware,
        };
        debug!(
            middleware = %entry.name,
            priority = entry.priority,
            owner = entry.owner.as_deref().unwrap_or("-"),
            "Middleware added"
        );

        let mut entries = self.entries.write();
        entries.push(entry);
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Removes every middleware named `name`. Returns `true` if any was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(middleware = %name, "Middleware removed");
        }
        removed > 0
    }

    /// Removes every middleware added on behalf of `owner`.
    pub(crate) fn remove_owned_by(&self, owner: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.owner.as_deref() != Some(owner));
        let removed = before - entries.len();
        if removed > 0 {
            info!(plugin = %owner, count = removed, "Removed plugin middleware");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Middleware names in execution order (outermost first).
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Runs the chain with no terminal handler.
    pub async fn run(&self, ctx: Arc<C>) -> MiddlewareResult<()> {
        self.execute(ctx, None).await
    }

    /// Runs the chain, invoking `terminal` after the innermost middleware
    /// calls `next`.
    pub async fn run_with(&self, ctx: Arc<C>, terminal: Terminal<C>) -> MiddlewareResult<()> {
        self.execute(ctx, Some(terminal)).await
    }

    pub(crate) async fn execute(&self, ctx: Arc<C>, terminal: Option<Terminal<C>>) -> MiddlewareResult<()> {
        let chain: Arc<[Entry<C>]> = self.entries.read().iter().cloned().collect();
        let links = chain.len();
        let started = Instant::now();

        let result = Next::start(chain, terminal, self.probe.clone())
            .run(ctx)
            .await
            .map_err(|e: BoxError| MiddlewareError::attribute(TERMINAL_NAME, e));

        self.probe.record_with(|| {
            RecordPayload::Performance(Timing::new(
                "pipeline",
                TimingCategory::Pipeline,
                started.elapsed(),
                result.is_ok(),
            ))
        });
        if let Err(e) = &result {
            debug!(links, middleware = %e.middleware, error = %e.source, "Pipeline run failed");
        }
        result
    }
}

impl<C: Send + Sync + 'static> Default for MiddlewarePipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for MiddlewarePipeline<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.entries.read().iter().map(|e| e.name.clone()).collect();
        f.debug_struct("MiddlewarePipeline")
            .field("middleware", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{middleware_fn, terminal_fn};
    use ember_core::{ConfigManager, DevToolsRecorder};
    use parking_lot::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Ctx {
        log: Log,
    }

    fn ctx() -> Arc<Ctx> {
        Arc::new(Ctx {
            log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn tracing_mw(name: &'static str, priority: i32) -> impl Middleware<Ctx> {
        middleware_fn(name, priority, move |ctx: Arc<Ctx>, next: Next<Ctx>| async move {
            ctx.log.lock().push(format!("{name}-before"));
            let result = next.run(Arc::clone(&ctx)).await;
            ctx.log.lock().push(format!("{name}-after"));
            result
        })
    }

    fn recording_terminal() -> Terminal<Ctx> {
        terminal_fn(|ctx: Arc<Ctx>| async move {
            ctx.log.lock().push("terminal".to_string());
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_onion_order() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(tracing_mw("B", 5));
        pipeline.add(tracing_mw("A", 10));

        let ctx = ctx();
        pipeline.run(Arc::clone(&ctx)).await.unwrap();
        assert_eq!(
            *ctx.log.lock(),
            vec!["A-before", "B-before", "B-after", "A-after"]
        );
        assert_eq!(pipeline.names(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_registration_order() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(tracing_mw("first", 0));
        pipeline.add(tracing_mw("second", 0));
        pipeline.add(tracing_mw("outer", 1));
        assert_eq!(pipeline.names(), vec!["outer", "first", "second"]);
    }

    #[tokio::test]
    async fn test_terminal_runs_innermost() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(tracing_mw("A", 1));

        let ctx = ctx();
        pipeline
            .run_with(Arc::clone(&ctx), recording_terminal())
            .await
            .unwrap();
        assert_eq!(*ctx.log.lock(), vec!["A-before", "terminal", "A-after"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_links_and_terminal() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(tracing_mw("outer", 10));
        pipeline.add(middleware_fn("gate", 5, |ctx: Arc<Ctx>, _next: Next<Ctx>| async move {
            ctx.log.lock().push("gate".to_string());
            Ok(())
        }));
        pipeline.add(tracing_mw("inner", 1));

        let ctx = ctx();
        pipeline
            .run_with(Arc::clone(&ctx), recording_terminal())
            .await
            .unwrap();
        assert_eq!(*ctx.log.lock(), vec!["outer-before", "gate", "outer-after"]);
    }

    #[tokio::test]
    async fn test_error_propagates_after_outer_after_logic() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(tracing_mw("outer", 10));
        pipeline.add(middleware_fn("auth", 5, |_: Arc<Ctx>, _: Next<Ctx>| async move {
            Err::<(), BoxError>("denied".into())
        }));
        pipeline.add(tracing_mw("inner", 1));

        let ctx = ctx();
        let err = pipeline.run(Arc::clone(&ctx)).await.unwrap_err();
        assert_eq!(err.middleware, "auth");
        assert_eq!(err.source.to_string(), "denied");
        assert_eq!(*ctx.log.lock(), vec!["outer-before", "outer-after"]);
    }

    #[tokio::test]
    async fn test_panic_is_converted() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(tracing_mw("outer", 10));
        pipeline.add(middleware_fn("explodes", 1, |_: Arc<Ctx>, _: Next<Ctx>| async move {
            if true {
                panic!("kaboom");
            }
            Ok(())
        }));

        let ctx = ctx();
        let err = pipeline.run(Arc::clone(&ctx)).await.unwrap_err();
        assert_eq!(err.middleware, "explodes");
        assert!(err.source.to_string().contains("kaboom"));
        assert_eq!(*ctx.log.lock(), vec!["outer-before", "outer-after"]);
    }

    #[tokio::test]
    async fn test_terminal_error_is_attributed() {
        let pipeline: MiddlewarePipeline<Ctx> = MiddlewarePipeline::new();
        let failing = terminal_fn(|_: Arc<Ctx>| async move { Err::<(), BoxError>("no route".into()) });
        let err = pipeline.run_with(ctx(), failing).await.unwrap_err();
        assert_eq!(err.middleware, TERMINAL_NAME);
    }

    #[tokio::test]
    async fn test_terminal_panic_is_attributed() {
        let exploding = || {
            terminal_fn(|_: Arc<Ctx>| async move {
                if true {
                    panic!("handler blew up");
                }
                Ok::<(), BoxError>(())
            })
        };

        let empty: MiddlewarePipeline<Ctx> = MiddlewarePipeline::new();
        let err = empty.run_with(ctx(), exploding()).await.unwrap_err();
        assert_eq!(err.middleware, TERMINAL_NAME);
        assert!(err.source.to_string().contains("handler blew up"));

        let pipeline = MiddlewarePipeline::new();
        pipeline.add(tracing_mw("A", 1));
        let ctx = ctx();
        let err = pipeline.run_with(Arc::clone(&ctx), exploding()).await.unwrap_err();
        assert_eq!(err.middleware, TERMINAL_NAME);
        assert_eq!(*ctx.log.lock(), vec!["A-before", "A-after"]);
    }

    #[tokio::test]
    async fn test_remove_and_owner_cleanup() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(tracing_mw("keep", 0));
        pipeline.add_owned(Arc::new(tracing_mw("owned-a", 0)), "plugin");
        pipeline.add_owned(Arc::new(tracing_mw("owned-b", 0)), "plugin");

        assert_eq!(pipeline.remove_owned_by("plugin"), 2);
        assert!(pipeline.remove("keep"));
        assert!(!pipeline.remove("keep"));
        assert!(pipeline.is_empty());
    }

    #[tokio::test]
    async fn test_timings_recorded_per_link() {
        let recorder = Arc::new(DevToolsRecorder::new(16));
        let pipeline: MiddlewarePipeline<EngineContext> =
            MiddlewarePipeline::with_probe(Probe::new(Arc::clone(&recorder)));
        pipeline.add(middleware_fn(
            "slow",
            0,
            |ctx: Arc<EngineContext>, next: Next<EngineContext>| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                next.run(ctx).await
            },
        ));

        let ctx = Arc::new(EngineContext::new(Arc::new(ConfigManager::new())));
        pipeline.run(ctx).await.unwrap();

        let snapshot = recorder.snapshot();
        let labels: Vec<(&str, TimingCategory)> = snapshot
            .performance
            .iter()
            .map(|r| (r.data.label.as_str(), r.data.category))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("slow", TimingCategory::Middleware),
                ("pipeline", TimingCategory::Pipeline)
            ]
        );
        assert!(snapshot.performance[0].data.duration_ms >= 5.0);
    }
}
