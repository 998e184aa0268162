use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use ember_core::{EngineContext, Probe, RecordPayload, Timing, TimingCategory};
use futures::FutureExt;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, ServiceExt};
use tracing::{Instrument, debug_span, trace};

use super::pipeline::Entry;
use crate::error::{MiddlewareError, PanicError};

/// Handler invoked after the innermost middleware calls `next`.
///
/// Any tower service over `Arc<C>` can be boxed into a terminal; see
/// [`terminal_fn`](super::terminal_fn) for closures.
pub type Terminal<C = EngineContext> = BoxCloneSyncService<Arc<C>, (), BoxError>;

/// Continuation handed to each middleware.
///
/// Consumed by [`run`](Self::run), so a link can continue the chain at most
/// once.
pub struct Next<C = EngineContext> {
    chain: Arc<[Entry<C>]>,
    index: usize,
    terminal: Option<Terminal<C>>,
    probe: Probe,
}

impl<C: Send + Sync + 'static> Next<C> {
    pub(crate) fn start(chain: Arc<[Entry<C>]>, terminal: Option<Terminal<C>>, probe: Probe) -> Self {
        Self {
            chain,
            index: 0,
            terminal,
            probe,
        }
    }

    /// Number of middleware still to run inward of this point.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.index)
    }

    /// Transfers control to the next link, or to the terminal handler once
    /// the chain is exhausted.
    ///
    /// Errors coming back are [`MiddlewareError`]s naming the failing link.
    pub async fn run(self, ctx: Arc<C>) -> Result<(), BoxError> {
        let Self {
            chain,
            index,
            terminal,
            probe,
        } = self;

        let Some(entry) = chain.get(index) else {
            let Some(terminal) = terminal else {
                return Ok(());
            };
            trace!("Running terminal handler");
            let outcome = AssertUnwindSafe(terminal.oneshot(ctx))
                .catch_unwind()
                .instrument(debug_span!("terminal"))
                .await;
            return match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(MiddlewareError::attribute(super::TERMINAL_NAME, e)),
                Err(payload) => Err(MiddlewareError::new(
                    super::TERMINAL_NAME,
                    PanicError::from_payload(payload),
                )),
            }
            .map_err(|e| Box::new(e) as BoxError);
        };

        let middleware = Arc::clone(&entry.middleware);
        let name = entry.name.clone();
        let next = Self {
            chain: Arc::clone(&chain),
            index: index + 1,
            terminal,
            probe: probe.clone(),
        };

        let span = debug_span!("middleware", name = %name, priority = entry.priority);
        let started = Instant::now();
        let outcome = AssertUnwindSafe(middleware.execute(ctx, next))
            .catch_unwind()
            .instrument(span)
            .await;

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MiddlewareError::attribute(&name, e)),
            Err(payload) => Err(MiddlewareError::new(
                name.clone(),
                PanicError::from_payload(payload),
            )),
        };

        probe.record_with(|| {
            RecordPayload::Performance(Timing::new(
                name,
                TimingCategory::Middleware,
                started.elapsed(),
                result.is_ok(),
            ))
        });

        result.map_err(|e| Box::new(e) as BoxError)
    }
}
