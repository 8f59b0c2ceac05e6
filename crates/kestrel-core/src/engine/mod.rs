mod lifecycle;

use crate::Result;
use crate::config::{Config, Directories};
use crate::dispatch::{Dispatcher, PluginBatch};
use crate::generation::{CancellationCoordinator, GenerationToken};
use crate::history::{HistoryEntry, HistoryStore};
use crate::query;
use crate::rank;
use crate::registry::PluginRegistry;
use futures_util::StreamExt;
use kestrel_types::{
    EngineUpdate, Generation, ListEntry, PluginWarning, Query, RankedResult, ResultItem,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Final list for one generation, as also sent to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub generation: Generation,
    pub query: Query,
    pub entries: Vec<ListEntry>,
    pub warnings: Vec<PluginWarning>,
}

/// Last list handed to the UI, kept for selection and "show more".
struct Delivered {
    generation: Generation,
    query: Query,
    full: Vec<RankedResult>,
}

struct Inner {
    registry: Arc<PluginRegistry>,
    coordinator: Arc<CancellationCoordinator>,
    dispatcher: Dispatcher,
    history: Mutex<HistoryStore>,
    max_results: usize,
    delivered: Mutex<Option<Delivered>>,

    /// Channel to send updates to UI
    update_tx: UnboundedSender<EngineUpdate>,
}

/// Query dispatch and ranking engine.
///
/// Cheap to clone; clones share all state. Query methods spawn onto the
/// current tokio runtime.
#[derive(Clone)]
pub struct Kestrel {
    inner: Arc<Inner>,
}

impl Kestrel {
    /// Create an engine over `registry` with a channel for updates.
    /// Returns the engine and a receiver for updates.
    ///
    /// Plugin settings from `config` are applied to the registry first.
    #[must_use]
    pub fn new(
        config: &Config,
        registry: Arc<PluginRegistry>,
        history: HistoryStore,
    ) -> (Self, UnboundedReceiver<EngineUpdate>) {
        registry.apply_settings(&config.plugins);

        let coordinator = Arc::new(CancellationCoordinator::new());
        let dispatcher =
            Dispatcher::new(Arc::clone(&coordinator), config.search.dispatch_options());
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                inner: Arc::new(Inner {
                    registry,
                    coordinator,
                    dispatcher,
                    history: Mutex::new(history),
                    max_results: config.search.max_results,
                    delivered: Mutex::new(None),
                    update_tx,
                }),
            },
            update_rx,
        )
    }

    /// Load config and history from `dirs` and build an engine.
    ///
    /// An unreadable history journal is logged and replaced by an empty
    /// in-memory store rather than failing startup.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or config fails to load.
    pub fn open(
        dirs: &Directories,
        registry: Arc<PluginRegistry>,
    ) -> Result<(Self, UnboundedReceiver<EngineUpdate>)> {
        dirs.ensure_exists()?;
        let config = Config::load(&dirs.config_file)?;
        for problem in config.validate() {
            warn!("Config: {}", problem);
        }

        debug!("Loading history from {}", dirs.history_file.display());
        let options = config.history.options();
        let history = match HistoryStore::open(&dirs.history_file, options) {
            Ok(store) => store,
            Err(e) => {
                warn!("Failed to load history: {}", e);
                HistoryStore::in_memory(options)
            }
        };

        info!("Engine configured with {} plugin settings", config.plugins.len());
        Ok(Self::new(&config, registry, history))
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.inner.registry
    }

    /// Start a query for `raw_text` in the background and return its generation.
    ///
    /// Any earlier query is superseded immediately. The ranked list arrives as
    /// [`EngineUpdate::Results`] unless a newer query is submitted first.
    pub fn submit_query(&self, raw_text: &str) -> Generation {
        let token = self.inner.coordinator.begin_query();
        let generation = token.generation();

        let engine = self.clone();
        let raw_text = raw_text.to_string();
        tokio::spawn(async move {
            engine.execute(&raw_text, token).await;
        });
        generation
    }

    /// Run a query to completion.
    ///
    /// Returns `None` when a newer query superseded this one before its list
    /// was ready; nothing is sent to the UI in that case.
    pub async fn run_query(&self, raw_text: &str) -> Option<QueryOutcome> {
        let token = self.inner.coordinator.begin_query();
        self.execute(raw_text, token).await
    }

    async fn execute(&self, raw_text: &str, token: GenerationToken) -> Option<QueryOutcome> {
        let inner = &self.inner;
        let snapshot = inner.registry.snapshot();
        let query = query::parse(raw_text, snapshot.keywords());

        let batches: Vec<PluginBatch> = inner
            .dispatcher
            .dispatch(&snapshot, &query, &token)
            .collect()
            .await;

        if !inner.coordinator.is_current(&token) {
            debug!("Generation {} superseded, discarding", token.generation());
            return None;
        }

        let warnings: Vec<PluginWarning> =
            batches.iter().filter_map(|b| b.warning.clone()).collect();
        let ranking = {
            let history = self.history();
            rank::merge(batches, &query, &snapshot, &history, inner.max_results)
        };

        {
            let mut delivered = self.delivered();
            // Checked under the lock so an older list never replaces a newer one
            if !inner.coordinator.is_current(&token) {
                debug!("Generation {} superseded after ranking", token.generation());
                return None;
            }
            *delivered = Some(Delivered {
                generation: token.generation(),
                query: query.clone(),
                full: ranking.full,
            });
        }

        let outcome = QueryOutcome {
            generation: token.generation(),
            query,
            entries: ranking.entries,
            warnings,
        };
        debug!(
            "Generation {}: delivering {} entries ({} plugins timed out)",
            outcome.generation,
            outcome.entries.len(),
            outcome.warnings.iter().filter(|w| w.is_timeout()).count()
        );
        self.send_update(EngineUpdate::Results {
            generation: outcome.generation,
            query: outcome.query.clone(),
            entries: outcome.entries.clone(),
            warnings: outcome.warnings.clone(),
        });
        Some(outcome)
    }

    /// Every ranked result of `generation`, without truncation.
    ///
    /// Only answers while `generation` is still the current one.
    #[must_use]
    pub fn show_more(&self, generation: Generation) -> Option<Vec<RankedResult>> {
        if !self.inner.coordinator.is_current_generation(generation) {
            return None;
        }
        self.delivered()
            .as_ref()
            .filter(|d| d.generation == generation)
            .map(|d| d.full.clone())
    }

    /// The user accepted `item` from `plugin_id` in the list of `generation`.
    ///
    /// Records the selection against that generation's query text and hands
    /// the item's context data back to the plugin. Selections from lists that
    /// were never delivered are passed to the plugin but not recorded.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPlugin` if `plugin_id` is not registered, or an error if
    /// the history journal cannot be written.
    pub async fn select(
        &self,
        generation: Generation,
        plugin_id: &str,
        item: &ResultItem,
    ) -> Result<()> {
        let target = self
            .inner
            .registry
            .handle(plugin_id)
            .ok_or_else(|| crate::Error::UnknownPlugin(plugin_id.to_string()))?;

        let query_text = self
            .delivered()
            .as_ref()
            .filter(|d| d.generation == generation)
            .map(|d| d.query.raw_text.clone());

        match query_text {
            Some(text) => {
                let count = self
                    .history()
                    .record_selection(&text, plugin_id, &item.key())?;
                debug!(
                    "Selected '{}' from {} for '{}' ({} times)",
                    item.title, plugin_id, text, count
                );
            }
            None => debug!(
                "Selection from generation {} not recorded: list unknown",
                generation
            ),
        }

        let _gate = target.gate.lock().await;
        if let Err(e) = target.plugin.on_result_selected(&item.context_data).await {
            warn!("Plugin {} failed to handle selection: {:#}", plugin_id, e);
        }
        Ok(())
    }

    /// History entries, most recently selected first.
    #[must_use]
    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.history().entries()
    }

    /// Drop history recorded for `query_text`.
    ///
    /// # Errors
    ///
    /// Returns an error if the history journal cannot be written.
    pub fn forget_history(&self, query_text: &str) -> Result<usize> {
        self.history().forget(query_text)
    }

    fn history(&self) -> MutexGuard<'_, HistoryStore> {
        self.inner.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivered(&self) -> MutexGuard<'_, Option<Delivered>> {
        self.inner.delivered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send an update to the UI
    fn send_update(&self, update: EngineUpdate) {
        if let Err(e) = self.inner.update_tx.send(update) {
            error!("Failed to send update: {}", e);
        }
    }
}
