//! Merges per-plugin batches into the final ordered list.

use crate::dispatch::PluginBatch;
use crate::history::HistoryStore;
use crate::registry::RegistrySnapshot;
use kestrel_types::{ListEntry, PluginMetadata, Query, RankedResult, ResultItem};
use std::cmp::Reverse;
use tracing::debug;

/// Output of [`merge`] for one generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    /// What the UI shows: the top results, plus a marker when cut down
    pub entries: Vec<ListEntry>,
    /// Every scored result in order, kept for "show more"
    pub full: Vec<RankedResult>,
}

impl Ranking {
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.entries.last().is_some_and(ListEntry::is_truncation_marker)
    }
}

/// Text the UI fills in when the user accepts `item`.
///
/// A non-empty value from the plugin wins. Otherwise a result from a plugin
/// addressed through its keyword completes to `"<keyword> <title>"`, anything
/// else to its title.
#[must_use]
pub fn display_text(item: &ResultItem, metadata: Option<&PluginMetadata>, query: &Query) -> String {
    if let Some(text) = item.query_text_display.as_deref().filter(|t| !t.is_empty()) {
        return text.to_string();
    }

    let scoped = query.is_keyword_scoped()
        && metadata.and_then(PluginMetadata::scoped_keyword) == Some(query.action_keyword.as_str());
    if scoped {
        format!("{} {}", query.action_keyword, item.title)
    } else {
        item.title.clone()
    }
}

/// Score, order and truncate one generation's batches.
///
/// `finalScore = score + weightBoost + historyBoost(rawText, identity)`.
/// Sorted by final score descending; ties keep registry order, then the
/// plugin's own order. The outcome depends only on batch contents, never on
/// the order batches completed in. `max_results == 0` disables truncation.
#[must_use]
pub fn merge(
    mut batches: Vec<PluginBatch>,
    query: &Query,
    snapshot: &RegistrySnapshot,
    history: &HistoryStore,
    max_results: usize,
) -> Ranking {
    let order_of = |plugin_id: &str| snapshot.get(plugin_id).map_or(usize::MAX, |p| p.order);
    batches.sort_by(|a, b| {
        order_of(&a.plugin_id)
            .cmp(&order_of(&b.plugin_id))
            .then_with(|| a.plugin_id.cmp(&b.plugin_id))
    });

    let mut full: Vec<RankedResult> = Vec::new();
    for batch in batches {
        let metadata = snapshot.get(&batch.plugin_id).map(|p| &p.metadata);
        let weight_boost = metadata.map_or(0, |m| m.weight_boost);

        for item in batch.results {
            let history_boost = history.boost(&query.raw_text, &item.identity(&batch.plugin_id));
            let final_score = item
                .score
                .saturating_add(weight_boost)
                .saturating_add(history_boost);
            let query_text_display = display_text(&item, metadata, query);

            full.push(RankedResult {
                plugin_id: batch.plugin_id.clone(),
                item,
                final_score,
                query_text_display,
            });
        }
    }

    // Stable: equal scores keep registry order, then within-plugin order
    full.sort_by_key(|r| Reverse(r.final_score));

    let total = full.len();
    let mut entries: Vec<ListEntry> = full
        .iter()
        .take(if max_results == 0 { total } else { max_results })
        .cloned()
        .map(ListEntry::Result)
        .collect();

    if max_results > 0 && total > max_results {
        debug!("Truncated {} results to {}", total, max_results);
        entries.push(ListEntry::Truncated {
            pre_count: total,
            post_count: max_results,
        });
    }

    Ranking { entries, full }
}
