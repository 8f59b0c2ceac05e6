use crate::Result;
use crate::dispatch::DispatchOptions;
use crate::history::{HistoryOptions, MIN_COMPACT_THRESHOLD};
use kestrel_types::PluginMetadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    /// Per-plugin settings; array order is the registry's configuration order
    #[serde(default)]
    pub plugins: Vec<PluginSettings>,
}

impl Config {
    /// Load config from file, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid config JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Human-readable problems with the plugin table. Empty when consistent.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let mut seen = HashSet::new();
        for p in &self.plugins {
            if !seen.insert(p.id.as_str()) {
                problems.push(format!("plugin '{}' is configured more than once", p.id));
            }
        }

        let mut owners: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for p in self.plugins.iter().filter(|p| !p.disabled) {
            if let Some(keyword) = p.metadata().scoped_keyword() {
                owners
                    .entry(keyword.to_string())
                    .or_default()
                    .push(p.id.as_str());
            }
        }
        for (keyword, ids) in owners.iter().filter(|(_, ids)| ids.len() > 1) {
            problems.push(format!(
                "action keyword '{keyword}' is claimed by {}",
                ids.join(", ")
            ));
        }

        for p in self.plugins.iter().filter(|p| p.metadata().is_inaccessible()) {
            problems.push(format!(
                "plugin '{}' is not accessible: not global and has no action keyword",
                p.id
            ));
        }

        let threshold = self.history.compact_threshold;
        if threshold.is_nan() || threshold < MIN_COMPACT_THRESHOLD {
            let used = self.history.options().compact_threshold;
            problems.push(format!(
                "history compactThreshold {threshold} is too low; using {used}"
            ));
        }

        problems
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    /// Results shown before the list is cut down (0 = unlimited)
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_plugin_timeout")]
    pub plugin_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub skip_empty_global_query: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            plugin_timeout_ms: default_plugin_timeout(),
            skip_empty_global_query: true,
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            plugin_timeout: Duration::from_millis(self.plugin_timeout_ms),
            skip_empty_global_query: self.skip_empty_global_query,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,

    #[serde(default = "default_boost_cap")]
    pub boost_cap: i64,

    #[serde(default = "default_boost_half_count")]
    pub boost_half_count: u32,

    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            boost_cap: default_boost_cap(),
            boost_half_count: default_boost_half_count(),
            compact_threshold: default_compact_threshold(),
        }
    }
}

impl HistoryConfig {
    #[must_use]
    pub fn options(&self) -> HistoryOptions {
        HistoryOptions {
            capacity: self.capacity,
            boost_cap: self.boost_cap,
            boost_half_count: self.boost_half_count,
            compact_threshold: self.compact_threshold,
        }
        .normalized()
    }
}

/// Operator overrides for one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSettings {
    pub id: String,

    #[serde(default)]
    pub action_keyword: String,

    #[serde(default)]
    pub is_global: bool,

    #[serde(default)]
    pub weight_boost: i64,

    #[serde(default)]
    pub disabled: bool,
}

impl PluginSettings {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Metadata for a plugin known only from configuration.
    #[must_use]
    pub fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            action_keyword: self.action_keyword.trim().to_string(),
            is_global: self.is_global,
            weight_boost: self.weight_boost,
            disabled: self.disabled,
            ..PluginMetadata::new(self.id.clone())
        }
    }
}

fn default_max_results() -> usize {
    25
}

fn default_plugin_timeout() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_history_capacity() -> usize {
    1000
}

fn default_boost_cap() -> i64 {
    300
}

fn default_boost_half_count() -> u32 {
    3
}

fn default_compact_threshold() -> f64 {
    2.0
}
