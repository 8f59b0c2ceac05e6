//! Selects target plugins for a query and runs them concurrently.
//!
//! Each selected plugin runs as its own task under a per-plugin time budget.
//! A plugin that times out, returns an error or panics contributes an empty
//! batch carrying a [`PluginWarning`]; its siblings are unaffected.

use crate::generation::{CancellationCoordinator, GenerationToken};
use crate::registry::{RegisteredPlugin, RegistrySnapshot};
use futures_util::stream::{BoxStream, FuturesUnordered};
use futures_util::{StreamExt, future};
use kestrel_types::{Generation, PluginMetadata, PluginWarning, Query, ResultItem, WarningKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Output of one plugin for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginBatch {
    pub plugin_id: String,
    pub generation: Generation,
    pub results: Vec<ResultItem>,
    pub warning: Option<PluginWarning>,
}

impl PluginBatch {
    fn empty(plugin_id: String, generation: Generation, kind: WarningKind) -> Self {
        Self {
            warning: Some(PluginWarning {
                plugin_id: plugin_id.clone(),
                kind,
            }),
            plugin_id,
            generation,
            results: Vec::new(),
        }
    }

    /// No call was made; dropped downstream as stale.
    fn skipped(plugin_id: String, generation: Generation) -> Self {
        Self {
            plugin_id,
            generation,
            results: Vec::new(),
            warning: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Budget applied uniformly to every plugin task
    pub plugin_timeout: Duration,
    /// Do not query global plugins when the input is empty
    pub skip_empty_global_query: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            plugin_timeout: DEFAULT_PLUGIN_TIMEOUT,
            skip_empty_global_query: true,
        }
    }
}

/// Whether a plugin with this metadata receives the query.
///
/// Global plugins receive everything; keyword plugins receive queries scoped
/// to their keyword. An unmatched keyword never falls back to search text,
/// so such a query reaches global plugins only.
#[must_use]
pub fn is_target(metadata: &PluginMetadata, query: &Query, options: &DispatchOptions) -> bool {
    if metadata.disabled {
        return false;
    }
    if options.skip_empty_global_query && !query.is_keyword_scoped() && query.search.is_empty() {
        return false;
    }
    if metadata.is_global {
        return true;
    }
    query.is_keyword_scoped() && metadata.scoped_keyword() == Some(query.action_keyword.as_str())
}

/// Target set for a query, in configuration order.
#[must_use]
pub fn select_targets(
    snapshot: &RegistrySnapshot,
    query: &Query,
    options: &DispatchOptions,
) -> Vec<RegisteredPlugin> {
    snapshot
        .plugins()
        .filter(|p| is_target(&p.metadata, query, options))
        .cloned()
        .collect()
}

pub struct Dispatcher {
    coordinator: Arc<CancellationCoordinator>,
    options: DispatchOptions,
}

impl Dispatcher {
    #[must_use]
    pub fn new(coordinator: Arc<CancellationCoordinator>, options: DispatchOptions) -> Self {
        Self {
            coordinator,
            options,
        }
    }

    /// Run every target plugin for `query` under `token`.
    ///
    /// Batches arrive in completion order. Batches whose generation is no
    /// longer current when they arrive are dropped from the stream.
    pub fn dispatch(
        &self,
        snapshot: &RegistrySnapshot,
        query: &Query,
        token: &GenerationToken,
    ) -> BoxStream<'static, PluginBatch> {
        let targets = select_targets(snapshot, query, &self.options);
        debug!(
            "Generation {}: dispatching '{}' to [{}]",
            token.generation(),
            query.raw_text,
            targets
                .iter()
                .map(RegisteredPlugin::id)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let budget = self.options.plugin_timeout;
        let tasks: FuturesUnordered<_> = targets
            .into_iter()
            .map(|target| run_plugin(target, query.clone(), token.clone(), budget))
            .collect();

        let coordinator = Arc::clone(&self.coordinator);
        tasks
            .filter(move |batch| {
                let current = coordinator.is_current_generation(batch.generation);
                if !current {
                    debug!(
                        "Dropping stale batch from {} (generation {})",
                        batch.plugin_id, batch.generation
                    );
                }
                future::ready(current)
            })
            .boxed()
    }
}

/// Query one plugin with a deadline.
///
/// Calls into one plugin never overlap, so the call first waits for the
/// plugin's gate. A generation superseded while waiting never reaches the
/// plugin. Waiting and the call itself each get `budget`. At the deadline the
/// engine stops waiting; a running call is left to finish and its output is
/// never observed.
async fn run_plugin(
    target: RegisteredPlugin,
    query: Query,
    token: GenerationToken,
    budget: Duration,
) -> PluginBatch {
    let plugin_id = target.metadata.id.clone();
    let generation = token.generation();

    let waited = tokio::select! {
        () = token.cancellation().cancelled() => None,
        gate = tokio::time::timeout(budget, Arc::clone(&target.gate).lock_owned()) => Some(gate),
    };
    let gate = match waited {
        Some(Ok(gate)) if !token.is_cancelled() => gate,
        Some(Err(_)) => {
            warn!("Plugin {} still busy after {:?}", plugin_id, budget);
            return PluginBatch::empty(plugin_id, generation, timeout_kind(budget));
        }
        _ => {
            debug!(
                "Skipping {} for superseded generation {}",
                plugin_id, generation
            );
            return PluginBatch::skipped(plugin_id, generation);
        }
    };

    let task = tokio::spawn(async move {
        let _gate = gate;
        target.plugin.query(&query, token.cancellation()).await
    });

    match tokio::time::timeout(budget, task).await {
        Ok(Ok(Ok(results))) => {
            debug!("{} returned {} results", plugin_id, results.len());
            PluginBatch {
                plugin_id,
                generation,
                results,
                warning: None,
            }
        }
        Ok(Ok(Err(e))) => {
            warn!("Plugin {} failed: {:#}", plugin_id, e);
            PluginBatch::empty(
                plugin_id,
                generation,
                WarningKind::Fault {
                    message: format!("{e:#}"),
                },
            )
        }
        Ok(Err(join_err)) => {
            warn!("Plugin {} task aborted: {}", plugin_id, join_err);
            let message = if join_err.is_panic() {
                "plugin panicked".to_string()
            } else {
                join_err.to_string()
            };
            PluginBatch::empty(plugin_id, generation, WarningKind::Fault { message })
        }
        Err(_) => {
            warn!("Plugin {} timed out after {:?}", plugin_id, budget);
            PluginBatch::empty(plugin_id, generation, timeout_kind(budget))
        }
    }
}

fn timeout_kind(budget: Duration) -> WarningKind {
    #[allow(clippy::cast_possible_truncation)]
    // Budgets are configured in u64 milliseconds
    let budget_ms = budget.as_millis() as u64;
    WarningKind::Timeout { budget_ms }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PluginRegistry;
    use crate::tests::fixtures::{
        FailingPlugin, PanickingPlugin, SlowPlugin, StaticPlugin, ready_registry,
    };
    use kestrel_types::PluginMetadata;

    fn query(action_keyword: &str, search: &str) -> Query {
        Query {
            raw_text: format!("{action_keyword} {search}").trim().to_string(),
            action_keyword: action_keyword.to_string(),
            search: search.to_string(),
        }
    }

    fn dispatcher(timeout_ms: u64) -> (Arc<CancellationCoordinator>, Dispatcher) {
        let coordinator = Arc::new(CancellationCoordinator::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&coordinator),
            DispatchOptions {
                plugin_timeout: Duration::from_millis(timeout_ms),
                skip_empty_global_query: true,
            },
        );
        (coordinator, dispatcher)
    }

    #[test]
    fn test_is_target_rules() {
        let options = DispatchOptions::default();
        let global = PluginMetadata::new("web").global();
        let calc = PluginMetadata::new("calc").with_action_keyword(">");
        let files = PluginMetadata::new("files").with_action_keyword("f");

        let scoped = query(">", "2+2");
        assert!(is_target(&global, &scoped, &options));
        assert!(is_target(&calc, &scoped, &options));
        assert!(!is_target(&files, &scoped, &options));

        let plain = query("", "report");
        assert!(is_target(&global, &plain, &options));
        assert!(!is_target(&calc, &plain, &options));
    }

    #[test]
    fn test_disabled_global_is_never_target() {
        let options = DispatchOptions::default();
        let web = PluginMetadata::new("web").global().disabled();
        assert!(!is_target(&web, &query("", "x"), &options));
    }

    #[test]
    fn test_empty_unscoped_query_reaches_nobody() {
        let options = DispatchOptions::default();
        let web = PluginMetadata::new("web").global();
        assert!(!is_target(&web, &query("", ""), &options));

        let permissive = DispatchOptions {
            skip_empty_global_query: false,
            ..DispatchOptions::default()
        };
        assert!(is_target(&web, &query("", ""), &permissive));
    }

    #[test]
    fn test_keyword_with_empty_search_still_dispatched() {
        let options = DispatchOptions::default();
        let calc = PluginMetadata::new("calc").with_action_keyword(">");
        assert!(is_target(&calc, &query(">", ""), &options));
    }

    #[test]
    fn test_select_targets_keeps_configuration_order() {
        let registry = ready_registry(vec![
            (
                PluginMetadata::new("web").global(),
                StaticPlugin::empty(),
            ),
            (
                PluginMetadata::new("calc").with_action_keyword(">"),
                StaticPlugin::empty(),
            ),
            (
                PluginMetadata::new("files").with_action_keyword("f"),
                StaticPlugin::empty(),
            ),
        ]);
        let targets = select_targets(
            &registry.snapshot(),
            &query(">", "calc 2+2"),
            &DispatchOptions::default(),
        );
        let ids: Vec<&str> = targets.iter().map(RegisteredPlugin::id).collect();
        assert_eq!(ids, vec!["web", "calc"]);
    }

    #[tokio::test]
    async fn test_dispatch_tags_batches() {
        let registry = ready_registry(vec![(
            PluginMetadata::new("web").global(),
            StaticPlugin::titles(&["a", "b"]),
        )]);
        let (coordinator, dispatcher) = dispatcher(1000);
        let token = coordinator.begin_query();

        let batches: Vec<PluginBatch> = dispatcher
            .dispatch(&registry.snapshot(), &query("", "x"), &token)
            .collect()
            .await;

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].plugin_id, "web");
        assert_eq!(batches[0].generation, token.generation());
        assert_eq!(batches[0].results.len(), 2);
        assert!(batches[0].warning.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_empty_batch_with_warning() {
        let registry = ready_registry(vec![
            (
                PluginMetadata::new("calc").global(),
                SlowPlugin::new(Duration::from_secs(30), &["late"]),
            ),
            (
                PluginMetadata::new("web").global(),
                StaticPlugin::titles(&["fast"]),
            ),
        ]);
        let (coordinator, dispatcher) = dispatcher(200);
        let token = coordinator.begin_query();

        let started = tokio::time::Instant::now();
        let batches: Vec<PluginBatch> = dispatcher
            .dispatch(&registry.snapshot(), &query("", "x"), &token)
            .collect()
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));

        let calc = batches.iter().find(|b| b.plugin_id == "calc").unwrap();
        assert!(calc.results.is_empty());
        assert_eq!(
            calc.warning.as_ref().map(|w| w.kind.clone()),
            Some(WarningKind::Timeout { budget_ms: 200 })
        );
        let web = batches.iter().find(|b| b.plugin_id == "web").unwrap();
        assert_eq!(web.results.len(), 1);
    }

    #[tokio::test]
    async fn test_fault_is_isolated() {
        let registry = ready_registry(vec![
            (
                PluginMetadata::new("broken").global(),
                FailingPlugin::new("index corrupt"),
            ),
            (
                PluginMetadata::new("web").global(),
                StaticPlugin::titles(&["ok"]),
            ),
        ]);
        let (coordinator, dispatcher) = dispatcher(1000);
        let token = coordinator.begin_query();

        let batches: Vec<PluginBatch> = dispatcher
            .dispatch(&registry.snapshot(), &query("", "x"), &token)
            .collect()
            .await;

        let broken = batches.iter().find(|b| b.plugin_id == "broken").unwrap();
        assert!(broken.results.is_empty());
        assert!(matches!(
            &broken.warning.as_ref().unwrap().kind,
            WarningKind::Fault { message } if message.contains("index corrupt")
        ));
        let web = batches.iter().find(|b| b.plugin_id == "web").unwrap();
        assert_eq!(web.results.len(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let registry = ready_registry(vec![
            (PluginMetadata::new("crashy").global(), PanickingPlugin::new()),
            (
                PluginMetadata::new("web").global(),
                StaticPlugin::titles(&["ok"]),
            ),
        ]);
        let (coordinator, dispatcher) = dispatcher(1000);
        let token = coordinator.begin_query();

        let batches: Vec<PluginBatch> = dispatcher
            .dispatch(&registry.snapshot(), &query("", "x"), &token)
            .collect()
            .await;

        assert_eq!(batches.len(), 2);
        let crashy = batches.iter().find(|b| b.plugin_id == "crashy").unwrap();
        assert_eq!(
            crashy.warning.as_ref().map(|w| w.kind.clone()),
            Some(WarningKind::Fault {
                message: "plugin panicked".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_batches_are_dropped() {
        let registry = ready_registry(vec![(
            PluginMetadata::new("web").global(),
            SlowPlugin::new(Duration::from_millis(100), &["old"]),
        )]);
        let (coordinator, dispatcher) = dispatcher(1000);
        let old = coordinator.begin_query();

        let stream = dispatcher.dispatch(&registry.snapshot(), &query("", "x"), &old);
        let _newer = coordinator.begin_query();

        let batches: Vec<PluginBatch> = stream.collect().await;
        assert!(batches.is_empty());
        assert!(old.is_cancelled());
    }

    #[tokio::test]
    async fn test_no_targets_yields_empty_stream() {
        let registry = PluginRegistry::new();
        let (coordinator, dispatcher) = dispatcher(1000);
        let token = coordinator.begin_query();
        let batches: Vec<PluginBatch> = dispatcher
            .dispatch(&registry.snapshot(), &query("", "x"), &token)
            .collect()
            .await;
        assert!(batches.is_empty());
    }
}
