//! Plugin registration and lifecycle management.
//!
//! [`PluginRegistry`] is the owner of all registered plugins. It:
//!
//! - Keeps plugins in registration order with their [`PluginState`].
//! - Installs a plugin together with its transitive dependencies, in
//!   dependency order, via [`install`](PluginRegistry::install).
//! - Installs everything at once with [`install_all`](PluginRegistry::install_all),
//!   collecting failures in an [`InstallReport`] instead of stopping at the
//!   first one.
//! - Isolates failures: a failing install hook only marks that plugin
//!   [`PluginState::Failed`] and removes the middleware it added.
//!
//! Lifecycle operations are serialized; registration and queries are not.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = PluginRegistry::new(ctx, pipeline);
//! registry.register(Database)?;
//! registry.register(Api)?;            // depends_on: ["database"]
//! registry.install("api", None).await?; // installs database, then api
//! registry.uninstall_all().await;
//! ```

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use ember_core::{EngineContext, PluginAction, Probe, RecordPayload};
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tower::BoxError;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::context::PluginContext;
use super::graph::{Dependency, DependencyGraph, ResolveError};
use super::{ErasedAdapter, ErasedPlugin, InstallFailure, Plugin, PluginInfo, PluginState};
use crate::error::{PanicError, PluginError, PluginResult};
use crate::middleware::MiddlewarePipeline;

// =============================================================================
// InstallReport
// =============================================================================

/// Outcome of [`PluginRegistry::install_all`].
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Plugins installed by this call, in install order.
    pub installed: Vec<String>,
    /// Plugins that could not be installed, in the order they were attempted.
    pub failed: Vec<PluginError>,
}

impl InstallReport {
    /// Returns `true` if nothing failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// The failure recorded for `plugin`, if any.
    pub fn failure(&self, plugin: &str) -> Option<&PluginError> {
        self.failed.iter().find(|e| e.plugin() == plugin)
    }
}

// =============================================================================
// PluginEntry (internal)
// =============================================================================

struct PluginEntry {
    plugin: Arc<dyn ErasedPlugin>,
    state: PluginState,
}

/// Removes the middleware a plugin added unless disarmed.
///
/// Dropped without [`disarm`](Self::disarm) when an install fails or its
/// future is cancelled.
struct MiddlewareGuard<'a> {
    pipeline: &'a MiddlewarePipeline,
    owner: &'a str,
    armed: bool,
}

impl MiddlewareGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for MiddlewareGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pipeline.remove_owned_by(self.owner);
        }
    }
}

// =============================================================================
// PluginRegistry
// =============================================================================

/// Registry of plugins and driver of their lifecycle.
pub struct PluginRegistry {
    plugins: RwLock<Vec<PluginEntry>>,
    lifecycle: AsyncMutex<()>,
    context: Arc<EngineContext>,
    pipeline: Arc<MiddlewarePipeline>,
    idempotent: bool,
}

impl PluginRegistry {
    /// Creates an empty registry installing plugins against `context` and
    /// `pipeline`. Devtools records go to the context's probe.
    pub fn new(context: Arc<EngineContext>, pipeline: Arc<MiddlewarePipeline>) -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
            lifecycle: AsyncMutex::new(()),
            context,
            pipeline,
            idempotent: false,
        }
    }

    /// When enabled, registering an already registered name is a no-op
    /// instead of [`PluginError::Duplicate`].
    pub fn idempotent_register(mut self, enabled: bool) -> Self {
        self.idempotent = enabled;
        self
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn pipeline(&self) -> &Arc<MiddlewarePipeline> {
        &self.pipeline
    }

    fn probe(&self) -> &Probe {
        self.context.probe()
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers a plugin in state [`PluginState::Registered`].
    pub fn register<P: Plugin>(&self, plugin: P) -> PluginResult<()> {
        let plugin: Arc<dyn ErasedPlugin> = Arc::new(ErasedAdapter(plugin));
        let name = plugin.name().to_string();
        let version = plugin.version().to_string();

        {
            let mut plugins = self.plugins.write();
            if plugins.iter().any(|e| e.plugin.name() == name) {
                if self.idempotent {
                    debug!(plugin = %name, "Plugin already registered, ignoring");
                    return Ok(());
                }
                return Err(PluginError::Duplicate(name));
            }
            plugins.push(PluginEntry {
                plugin,
                state: PluginState::Registered,
            });
        }

        info!(plugin = %name, version = %version, "Plugin registered");
        self.probe()
            .record_with(|| RecordPayload::plugin(name, version, PluginAction::Registered).build());
        Ok(())
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// Returns the state of the named plugin, or `None` if not registered.
    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.plugins
            .read()
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| e.state)
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.state(name) == Some(PluginState::Installed)
    }

    /// All registered plugins in registration order.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.plugins
            .read()
            .iter()
            .map(|e| PluginInfo {
                name: e.plugin.name().to_string(),
                version: e.plugin.version().to_string(),
                depends_on: e.plugin.depends_on(),
                state: e.state,
            })
            .collect()
    }

    /// Number of registered plugins (in any state).
    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    fn snapshot(&self) -> (Vec<Arc<dyn ErasedPlugin>>, Vec<PluginState>, DependencyGraph) {
        let plugins = self.plugins.read();
        let graph = DependencyGraph::new(
            plugins
                .iter()
                .map(|e| (e.plugin.name(), e.plugin.depends_on())),
        );
        (
            plugins.iter().map(|e| Arc::clone(&e.plugin)).collect(),
            plugins.iter().map(|e| e.state).collect(),
            graph,
        )
    }

    fn set_state(&self, index: usize, state: PluginState) {
        if let Some(entry) = self.plugins.write().get_mut(index) {
            entry.state = state;
        }
    }

    fn names(plugins: &[Arc<dyn ErasedPlugin>], indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| plugins[i].name().to_string()).collect()
    }

    // ─── Install ─────────────────────────────────────────────────────────────

    /// Installs `name` and every plugin it transitively depends on.
    ///
    /// Dependencies that are already installed are left alone. `options`
    /// applies to `name` only; dependencies resolve theirs from
    /// configuration.
    ///
    /// # Errors
    ///
    /// - [`PluginError::NotFound`] if `name` is not registered
    /// - [`PluginError::MissingDependency`] / [`PluginError::CyclicDependency`]
    ///   if resolution fails; nothing is installed
    /// - [`PluginError::InvalidOptions`] / [`PluginError::Install`] /
    ///   [`PluginError::DependencyFailed`] for the first plugin that could not
    ///   be installed. A failure only skips the plugins that depend on it;
    ///   independent dependencies still install.
    pub async fn install(&self, name: &str, options: Option<Value>) -> PluginResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let (plugins, states, graph) = self.snapshot();

        let root = plugins
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        let order = graph.closure(root).map_err(|e| match e {
            ResolveError::Missing { plugin, dependency } => PluginError::MissingDependency {
                plugin: plugins[plugin].name().to_string(),
                dependency,
            },
            ResolveError::Cycle(cycle) => PluginError::CyclicDependency {
                cycle: Self::names(&plugins, &cycle),
            },
        })?;

        let mut options = options;
        let mut failed: HashSet<usize> = HashSet::new();
        let mut first_error: Option<PluginError> = None;

        for index in order {
            if states[index] == PluginState::Installed {
                continue;
            }

            let failed_dep = graph.dependencies(index).iter().find_map(|dep| match dep {
                Dependency::Known(j) if failed.contains(j) => Some(plugins[*j].name().to_string()),
                _ => None,
            });
            if let Some(dependency) = failed_dep {
                let plugin = plugins[index].name().to_string();
                warn!(plugin = %plugin, dependency = %dependency, "Skipping plugin, dependency failed");
                failed.insert(index);
                first_error.get_or_insert(PluginError::DependencyFailed { plugin, dependency });
                continue;
            }

            let explicit = if index == root { options.take() } else { None };
            if let Err(e) = self.install_one(index, &plugins[index], explicit).await {
                failed.insert(index);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Installs every plugin that is not installed yet, in dependency order.
    ///
    /// Never stops early; every plugin that could not be installed gets an
    /// entry in the report.
    pub async fn install_all(&self) -> InstallReport {
        let _lifecycle = self.lifecycle.lock().await;
        let (plugins, states, graph) = self.snapshot();
        let mut report = InstallReport::default();
        let mut failed: HashSet<usize> = HashSet::new();

        let (order, blocked) = graph.order(|i| states[i] != PluginState::Installed);

        for index in order {
            let name = plugins[index].name().to_string();

            let missing = graph.dependencies(index).iter().find_map(|dep| match dep {
                Dependency::Missing(dependency) => Some(dependency.clone()),
                Dependency::Known(_) => None,
            });
            if let Some(dependency) = missing {
                warn!(plugin = %name, dependency = %dependency, "Plugin dependency not registered");
                failed.insert(index);
                report.failed.push(PluginError::MissingDependency { plugin: name, dependency });
                continue;
            }

            let failed_dep = graph.dependencies(index).iter().find_map(|dep| match dep {
                Dependency::Known(j) if failed.contains(j) => Some(plugins[*j].name().to_string()),
                _ => None,
            });
            if let Some(dependency) = failed_dep {
                warn!(plugin = %name, dependency = %dependency, "Skipping plugin, dependency failed");
                failed.insert(index);
                report.failed.push(PluginError::DependencyFailed { plugin: name, dependency });
                continue;
            }

            match self.install_one(index, &plugins[index], None).await {
                Ok(()) => report.installed.push(name),
                Err(e) => {
                    failed.insert(index);
                    report.failed.push(e);
                }
            }
        }

        for index in blocked {
            let name = plugins[index].name().to_string();
            let error = match graph.cycle_through(index) {
                Some(cycle) => PluginError::CyclicDependency {
                    cycle: Self::names(&plugins, &cycle),
                },
                None => {
                    let dependency = graph
                        .dependencies(index)
                        .iter()
                        .find_map(|dep| match dep {
                            Dependency::Known(j) if states[*j] != PluginState::Installed => {
                                Some(plugins[*j].name().to_string())
                            }
                            _ => None,
                        })
                        .unwrap_or_default();
                    PluginError::DependencyFailed {
                        plugin: name.clone(),
                        dependency,
                    }
                }
            };
            error!(plugin = %name, error = %error, "Plugin not installed");
            report.failed.push(error);
        }

        info!(
            installed = report.installed.len(),
            failed = report.failed.len(),
            "Plugin installation finished"
        );
        report
    }

    async fn install_one(
        &self,
        index: usize,
        plugin: &Arc<dyn ErasedPlugin>,
        explicit: Option<Value>,
    ) -> PluginResult<()> {
        let name = plugin.name().to_string();
        let version = plugin.version().to_string();
        let options = explicit.or_else(|| self.context.config().get(&format!("plugins.{name}")).ok());

        let guard = MiddlewareGuard {
            pipeline: &self.pipeline,
            owner: &name,
            armed: true,
        };
        let ctx = PluginContext::new(&name, Arc::clone(&self.context), Arc::clone(&self.pipeline));
        let started = Instant::now();

        let outcome = AssertUnwindSafe(plugin.install(&ctx, options))
            .catch_unwind()
            .instrument(info_span!("install", plugin = %name))
            .await;
        let elapsed = started.elapsed();

        let error = match outcome {
            Ok(Ok(())) => {
                guard.disarm();
                self.set_state(index, PluginState::Installed);
                info!(plugin = %name, version = %version, elapsed_ms = elapsed.as_millis() as u64, "Plugin installed");
                self.probe().record_with(|| {
                    RecordPayload::plugin(&name, &version, PluginAction::Installed)
                        .elapsed(elapsed)
                        .build()
                });
                return Ok(());
            }
            Ok(Err(InstallFailure::Options(source))) => PluginError::InvalidOptions {
                plugin: name.clone(),
                source,
            },
            Ok(Err(InstallFailure::Hook(source))) => {
                self.set_state(index, PluginState::Failed);
                PluginError::Install {
                    plugin: name.clone(),
                    source,
                }
            }
            Err(payload) => {
                self.set_state(index, PluginState::Failed);
                PluginError::Install {
                    plugin: name.clone(),
                    source: Box::new(PanicError::from_payload(payload)),
                }
            }
        };

        drop(guard);
        error!(plugin = %name, error = %error, "Plugin install failed");
        self.probe().record_with(|| {
            RecordPayload::plugin(&name, &version, PluginAction::InstallFailed)
                .error(&error)
                .elapsed(elapsed)
                .build()
        });
        Err(error)
    }

    // ─── Uninstall ───────────────────────────────────────────────────────────

    /// Uninstalls an installed plugin.
    ///
    /// # Errors
    ///
    /// - [`PluginError::NotInstalled`] unless the plugin is installed
    /// - [`PluginError::DependentPlugin`] if installed plugins depend on it
    pub async fn uninstall(&self, name: &str) -> PluginResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let (plugins, states, _) = self.snapshot();

        let index = plugins
            .iter()
            .position(|p| p.name() == name)
            .filter(|&i| states[i] == PluginState::Installed)
            .ok_or_else(|| PluginError::NotInstalled(name.to_string()))?;

        let dependents: Vec<String> = plugins
            .iter()
            .zip(&states)
            .filter(|(p, state)| {
                **state == PluginState::Installed && p.depends_on().iter().any(|d| d == name)
            })
            .map(|(p, _)| p.name().to_string())
            .collect();
        if !dependents.is_empty() {
            return Err(PluginError::DependentPlugin {
                plugin: name.to_string(),
                dependents,
            });
        }

        self.uninstall_one(index, &plugins[index]).await;
        Ok(())
    }

    /// Uninstalls every installed plugin, dependents before their
    /// dependencies. Returns the names in uninstall order.
    pub async fn uninstall_all(&self) -> Vec<String> {
        let _lifecycle = self.lifecycle.lock().await;
        let (plugins, states, graph) = self.snapshot();

        let (mut order, blocked) = graph.order(|i| states[i] == PluginState::Installed);
        order.extend(blocked);
        order.reverse();

        let mut uninstalled = Vec::with_capacity(order.len());
        for index in order {
            self.uninstall_one(index, &plugins[index]).await;
            uninstalled.push(plugins[index].name().to_string());
        }
        uninstalled
    }

    async fn uninstall_one(&self, index: usize, plugin: &Arc<dyn ErasedPlugin>) {
        let name = plugin.name().to_string();
        let ctx = PluginContext::new(&name, Arc::clone(&self.context), Arc::clone(&self.pipeline));

        let outcome = AssertUnwindSafe(plugin.uninstall(&ctx))
            .catch_unwind()
            .instrument(info_span!("uninstall", plugin = %name))
            .await;
        let hook_error: Option<BoxError> = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(Box::new(PanicError::from_payload(payload))),
        };
        if let Some(e) = &hook_error {
            warn!(plugin = %name, error = %e, "Uninstall hook failed, continuing");
        }

        self.pipeline.remove_owned_by(&name);
        self.set_state(index, PluginState::Uninstalled);
        info!(plugin = %name, "Plugin uninstalled");
        self.probe().record_with(|| {
            let record = RecordPayload::plugin(&name, plugin.version(), PluginAction::Uninstalled);
            match hook_error {
                Some(e) => record.error(e).build(),
                None => record.build(),
            }
        });
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins())
            .field("idempotent", &self.idempotent)
            .finish_non_exhaustive()
    }
}
