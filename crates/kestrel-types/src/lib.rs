//! Shared types for Kestrel launcher components.
//!
//! This crate holds the types that cross the boundary between the dispatch
//! engine and its collaborators (plugins, the UI shell, settings editors).
//! All of them are serializable so a UI can receive them over any transport.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Monotonically increasing identifier of one query's lifetime.
pub type Generation = u64;

/// Action keyword that never scopes a query (treated the same as an empty keyword).
pub const WILDCARD_ACTION_KEYWORD: &str = "*";

/// Deserialize a String that may be null or missing (both become empty string)
fn deserialize_null_as_empty_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Identity and ranking policy for one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Token that scopes a query to this plugin. Empty or `*` means global-only.
    #[serde(default, deserialize_with = "deserialize_null_as_empty_string")]
    pub action_keyword: String,

    /// Receives every query regardless of keyword
    #[serde(default)]
    pub is_global: bool,

    /// Added to every score this plugin produces
    #[serde(default)]
    pub weight_boost: i64,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path_light: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path_dark: Option<String>,
}

impl PluginMetadata {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_action_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.action_keyword = keyword.into();
        self
    }

    #[must_use]
    pub fn global(mut self) -> Self {
        self.is_global = true;
        self
    }

    #[must_use]
    pub fn with_weight_boost(mut self, boost: i64) -> Self {
        self.weight_boost = boost;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// The keyword this plugin can be addressed by, if any.
    #[must_use]
    pub fn scoped_keyword(&self) -> Option<&str> {
        let keyword = self.action_keyword.trim();
        if keyword.is_empty() || keyword == WILDCARD_ACTION_KEYWORD {
            None
        } else {
            Some(keyword)
        }
    }

    /// Enabled, but unreachable: neither global nor keyword-addressable.
    #[must_use]
    pub fn is_inaccessible(&self) -> bool {
        !self.disabled && !self.is_global && self.scoped_keyword().is_none()
    }
}

/// Lifecycle of a plugin instance inside the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PluginState {
    Unloaded,
    Initializing,
    Ready,
    Failed { error: String },
}

impl PluginState {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Input exactly as typed
    pub raw_text: String,

    /// Matched action keyword, empty when none matched
    #[serde(default)]
    pub action_keyword: String,

    /// Remainder after the keyword token, trimmed
    #[serde(default)]
    pub search: String,
}

impl Query {
    #[must_use]
    pub fn is_keyword_scoped(&self) -> bool {
        !self.action_keyword.is_empty()
    }

    /// Whitespace-separated words of the search text.
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.search.split_whitespace()
    }

    /// First word of the search text, or empty.
    #[must_use]
    pub fn first_search(&self) -> &str {
        self.terms().next().unwrap_or_default()
    }

    /// Search text after the first word, trimmed.
    #[must_use]
    pub fn second_to_end_search(&self) -> &str {
        let search = self.search.trim_start();
        match search.find(char::is_whitespace) {
            Some(idx) => search[idx..].trim(),
            None => "",
        }
    }
}

/// One candidate produced by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub title: String,

    #[serde(default)]
    pub sub_title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ico_path: Option<String>,

    /// Base relevance reported by the plugin
    #[serde(default)]
    pub score: i64,

    /// Completed query text shown when this result is accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_text_display: Option<String>,

    /// Opaque payload handed back to the plugin; never inspected by the engine
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context_data: serde_json::Value,
}

impl ResultItem {
    #[must_use]
    pub fn new(title: impl Into<String>, sub_title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            sub_title: sub_title.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_score(mut self, score: i64) -> Self {
        self.score = score;
        self
    }

    #[must_use]
    pub fn with_query_text_display(mut self, text: impl Into<String>) -> Self {
        self.query_text_display = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_context_data(mut self, data: serde_json::Value) -> Self {
        self.context_data = data;
        self
    }

    /// Identity within a plugin's output
    #[must_use]
    pub fn key(&self) -> ResultKey {
        ResultKey {
            title: self.title.clone(),
            sub_title: self.sub_title.clone(),
        }
    }

    /// Identity across all plugins
    #[must_use]
    pub fn identity(&self, plugin_id: &str) -> ResultIdentity {
        ResultIdentity {
            plugin_id: plugin_id.to_string(),
            key: self.key(),
        }
    }
}

/// `(title, subTitle)` pair identifying a result within one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultKey {
    pub title: String,
    #[serde(default)]
    pub sub_title: String,
}

/// `(pluginId, title, subTitle)`, the identity used for history and deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultIdentity {
    pub plugin_id: String,
    #[serde(flatten)]
    pub key: ResultKey,
}

/// A result after ranking, as delivered to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    pub plugin_id: String,
    pub item: ResultItem,
    /// `score + weightBoost + historyBoost`
    pub final_score: i64,
    /// Always filled in: plugin-supplied or synthesized
    pub query_text_display: String,
}

/// One row of the final list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListEntry {
    Result(RankedResult),
    /// Synthetic marker appended when the list was cut down
    Truncated {
        #[serde(rename = "preCount")]
        pre_count: usize,
        #[serde(rename = "postCount")]
        post_count: usize,
    },
}

impl ListEntry {
    #[must_use]
    pub fn as_result(&self) -> Option<&RankedResult> {
        match self {
            Self::Result(r) => Some(r),
            Self::Truncated { .. } => None,
        }
    }

    #[must_use]
    pub fn is_truncation_marker(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Why a plugin contributed nothing to a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarningKind {
    Timeout {
        #[serde(rename = "budgetMs")]
        budget_ms: u64,
    },
    Fault {
        message: String,
    },
}

/// Soft, non-blocking condition reported alongside a result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginWarning {
    pub plugin_id: String,
    #[serde(flatten)]
    pub kind: WarningKind,
}

impl PluginWarning {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, WarningKind::Timeout { .. })
    }
}

impl fmt::Display for PluginWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WarningKind::Timeout { budget_ms } => {
                write!(f, "{} did not answer within {budget_ms}ms", self.plugin_id)
            }
            WarningKind::Fault { message } => write!(f, "{} failed: {message}", self.plugin_id),
        }
    }
}

/// Notifications from the engine to the UI consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineUpdate {
    /// Final ordered list for one generation
    Results {
        generation: Generation,
        query: Query,
        entries: Vec<ListEntry>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<PluginWarning>,
    },

    /// A plugin changed lifecycle state
    PluginStateChanged { plugin_id: String, state: PluginState },
}
