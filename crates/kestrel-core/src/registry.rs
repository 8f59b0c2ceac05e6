//! Plugin registry: installed plugins, their metadata and lifecycle state.
//!
//! Mutation goes through a short exclusive lock. Dispatch never reads the
//! live registry; it works on a [`RegistrySnapshot`] taken once per query, so
//! an edit made while a query is in flight only affects the next query.

use crate::config::PluginSettings;
use crate::plugin::Plugin;
use crate::{Error, Result};
use kestrel_types::{PluginMetadata, PluginState};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct PluginEntry {
    metadata: PluginMetadata,
    state: PluginState,
    plugin: Arc<dyn Plugin>,
    /// Serializes calls into one plugin across generations
    gate: Arc<Mutex<()>>,
}

/// A Ready, enabled plugin as seen by one dispatch.
#[derive(Clone)]
pub struct RegisteredPlugin {
    pub metadata: PluginMetadata,
    /// Position in configuration order, used as a ranking tie-break
    pub order: usize,
    pub(crate) plugin: Arc<dyn Plugin>,
    pub(crate) gate: Arc<Mutex<()>>,
}

impl RegisteredPlugin {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("metadata", &self.metadata)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Immutable view of the dispatchable plugins at one instant.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    plugins: Arc<[RegisteredPlugin]>,
    keywords: Arc<BTreeSet<String>>,
}

impl RegistrySnapshot {
    /// Ready, enabled plugins in configuration order.
    pub fn plugins(&self) -> impl Iterator<Item = &RegisteredPlugin> {
        self.plugins.iter()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RegisteredPlugin> {
        self.plugins.iter().find(|p| p.id() == id)
    }

    /// Action keywords of every enabled plugin, ready or not.
    ///
    /// A keyword of a plugin that is still initializing is recognized by the
    /// parser but routes nowhere, rather than leaking into the search text.
    #[must_use]
    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.keywords
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Owns plugin metadata and lifecycle state.
#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<Vec<PluginEntry>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<PluginEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<PluginEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a plugin instance in the `Unloaded` state.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePlugin` if the id is already registered.
    pub fn register(&self, metadata: PluginMetadata, plugin: Arc<dyn Plugin>) -> Result<()> {
        let mut entries = self.write();
        if entries.iter().any(|e| e.metadata.id == metadata.id) {
            return Err(Error::DuplicatePlugin(metadata.id));
        }
        debug!("Registering plugin: {}", metadata.id);
        entries.push(PluginEntry {
            metadata,
            state: PluginState::Unloaded,
            plugin,
            gate: Arc::new(Mutex::new(())),
        });
        Ok(())
    }

    /// Every registered plugin's metadata in configuration order, disabled ones included.
    #[must_use]
    pub fn list(&self) -> Vec<PluginMetadata> {
        self.read().iter().map(|e| e.metadata.clone()).collect()
    }

    #[must_use]
    pub fn metadata(&self, id: &str) -> Option<PluginMetadata> {
        self.read()
            .iter()
            .find(|e| e.metadata.id == id)
            .map(|e| e.metadata.clone())
    }

    #[must_use]
    pub fn state(&self, id: &str) -> Option<PluginState> {
        self.read()
            .iter()
            .find(|e| e.metadata.id == id)
            .map(|e| e.state.clone())
    }

    /// The plugin with its call gate, regardless of state.
    pub(crate) fn handle(&self, id: &str) -> Option<RegisteredPlugin> {
        self.read()
            .iter()
            .enumerate()
            .find(|(_, e)| e.metadata.id == id)
            .map(|(order, e)| RegisteredPlugin {
                metadata: e.metadata.clone(),
                order,
                plugin: Arc::clone(&e.plugin),
                gate: Arc::clone(&e.gate),
            })
    }

    /// Ids of every plugin in the given state.
    #[must_use]
    pub fn ids_in_state(&self, state: &PluginState) -> Vec<String> {
        self.read()
            .iter()
            .filter(|e| &e.state == state)
            .map(|e| e.metadata.id.clone())
            .collect()
    }

    /// Enabled plugins that no query can ever reach.
    #[must_use]
    pub fn inaccessible(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|e| e.metadata.is_inaccessible())
            .map(|e| e.metadata.id.clone())
            .collect()
    }

    fn update_metadata<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut PluginMetadata),
    {
        let mut entries = self.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.metadata.id == id)
            .ok_or_else(|| Error::UnknownPlugin(id.to_string()))?;
        f(&mut entry.metadata);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `UnknownPlugin` if `id` is not registered.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.update_metadata(id, |m| m.disabled = !enabled)?;
        info!("Plugin {} {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `UnknownPlugin` if `id` is not registered.
    pub fn set_global(&self, id: &str, global: bool) -> Result<()> {
        self.update_metadata(id, |m| m.is_global = global)
    }

    /// # Errors
    ///
    /// Returns `UnknownPlugin` if `id` is not registered.
    pub fn set_action_keyword(&self, id: &str, keyword: &str) -> Result<()> {
        self.update_metadata(id, |m| m.action_keyword = keyword.trim().to_string())
    }

    /// # Errors
    ///
    /// Returns `UnknownPlugin` if `id` is not registered.
    pub fn set_weight_boost(&self, id: &str, boost: i64) -> Result<()> {
        self.update_metadata(id, |m| m.weight_boost = boost)
    }

    /// Push startup settings into the registry and adopt their order.
    ///
    /// Plugins named in `settings` move to the front in that order; the rest
    /// keep their relative registration order behind them. Settings for
    /// unknown ids are skipped.
    pub fn apply_settings(&self, settings: &[PluginSettings]) {
        let mut entries = self.write();

        for s in settings {
            let Some(entry) = entries.iter_mut().find(|e| e.metadata.id == s.id) else {
                warn!("Settings for unknown plugin {} ignored", s.id);
                continue;
            };
            entry.metadata.action_keyword = s.action_keyword.trim().to_string();
            entry.metadata.is_global = s.is_global;
            entry.metadata.weight_boost = s.weight_boost;
            entry.metadata.disabled = s.disabled;
        }

        let rank = |id: &str| {
            settings
                .iter()
                .position(|s| s.id == id)
                .unwrap_or(settings.len())
        };
        // Stable: unconfigured plugins share one rank and keep their order
        entries.sort_by_key(|e| rank(&e.metadata.id));
        debug!("Applied settings for {} plugins", settings.len());
    }

    fn transition(&self, id: &str, to: PluginState) -> Result<()> {
        let mut entries = self.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.metadata.id == id)
            .ok_or_else(|| Error::UnknownPlugin(id.to_string()))?;

        let legal = matches!(
            (&entry.state, &to),
            (PluginState::Unloaded, PluginState::Initializing)
                | (PluginState::Initializing, PluginState::Ready)
                | (
                    PluginState::Initializing | PluginState::Ready,
                    PluginState::Failed { .. }
                )
                | (
                    PluginState::Ready | PluginState::Failed { .. },
                    PluginState::Unloaded
                )
        );
        if !legal {
            return Err(Error::invalid_transition(id, &entry.state, &to));
        }

        debug!("Plugin {}: {} -> {}", id, entry.state, to);
        entry.state = to;
        Ok(())
    }

    /// `Unloaded -> Initializing`
    ///
    /// # Errors
    ///
    /// Returns `UnknownPlugin` or `InvalidTransition`.
    pub fn begin_initialize(&self, id: &str) -> Result<()> {
        self.transition(id, PluginState::Initializing)
    }

    /// `Initializing -> Ready`
    ///
    /// # Errors
    ///
    /// Returns `UnknownPlugin` or `InvalidTransition`.
    pub fn mark_ready(&self, id: &str) -> Result<()> {
        self.transition(id, PluginState::Ready)?;
        info!("Plugin ready: {}", id);
        Ok(())
    }

    /// `Initializing | Ready -> Failed`
    ///
    /// # Errors
    ///
    /// Returns `UnknownPlugin` or `InvalidTransition`.
    pub fn mark_failed(&self, id: &str, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        warn!("Plugin failed: {}: {}", id, error);
        self.transition(id, PluginState::Failed { error })
    }

    /// `Ready | Failed -> Unloaded`, the first step of an explicit reload.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPlugin` or `InvalidTransition`.
    pub fn reset(&self, id: &str) -> Result<()> {
        self.transition(id, PluginState::Unloaded)
    }

    /// Ready, enabled plugins with their current metadata.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries = self.read();

        let plugins: Vec<RegisteredPlugin> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.metadata.disabled && e.state.is_ready())
            .map(|(order, e)| RegisteredPlugin {
                metadata: e.metadata.clone(),
                order,
                plugin: Arc::clone(&e.plugin),
                gate: Arc::clone(&e.gate),
            })
            .collect();

        let keywords: BTreeSet<String> = entries
            .iter()
            .filter(|e| !e.metadata.disabled)
            .filter_map(|e| e.metadata.scoped_keyword().map(str::to_string))
            .collect();

        RegistrySnapshot {
            plugins: plugins.into(),
            keywords: Arc::new(keywords),
        }
    }
}
