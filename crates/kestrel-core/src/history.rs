//! Selection history: which result the user picked for which query text.
//!
//! Entries live in an LRU ordered by last selection. On disk the store is an
//! append-only JSON-lines journal: every selection appends the entry's new
//! state, so a single selection never rewrites the file. Replaying the
//! journal in order rebuilds both the entries and their recency (and applies
//! the same capacity evictions). The journal is compacted to the live
//! entries once it grows past a multiple of them.

use crate::utils::now_millis;
use crate::{Error, Result};
use kestrel_types::{ResultIdentity, ResultKey};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Journals shorter than this are never compacted automatically
const MIN_COMPACT_LINES: usize = 64;

/// Lowest accepted `compact_threshold`; smaller values are raised to it
pub const MIN_COMPACT_THRESHOLD: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryOptions {
    /// Maximum number of entries kept; least recently selected go first
    pub capacity: usize,
    /// Upper bound the history boost approaches
    pub boost_cap: i64,
    /// Selection count at which the boost reaches half of `boost_cap`
    pub boost_half_count: u32,
    /// Compact once journal lines exceed this multiple of live entries
    pub compact_threshold: f64,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            capacity: 1000,
            boost_cap: 300,
            boost_half_count: 3,
            compact_threshold: 2.0,
        }
    }
}

impl HistoryOptions {
    /// Raise a too small or NaN `compact_threshold` so a selection never
    /// forces a full rewrite.
    #[must_use]
    pub fn normalized(self) -> Self {
        let compact_threshold = if self.compact_threshold.is_nan() {
            Self::default().compact_threshold
        } else {
            self.compact_threshold.max(MIN_COMPACT_THRESHOLD)
        };
        Self {
            compact_threshold,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub query_text: String,
    pub plugin_id: String,
    pub result_key: ResultKey,
    pub selection_count: u32,
    /// Milliseconds since the Unix epoch
    pub last_selected_at: u64,
}

impl HistoryEntry {
    fn key(&self) -> HistoryKey {
        HistoryKey {
            query_text: self.query_text.clone(),
            identity: ResultIdentity {
                plugin_id: self.plugin_id.clone(),
                key: self.result_key.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HistoryKey {
    query_text: String,
    identity: ResultIdentity,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Select(HistoryEntry),
    Forget {
        #[serde(rename = "queryText")]
        query_text: String,
    },
}

pub struct HistoryStore {
    entries: LruCache<HistoryKey, HistoryEntry>,
    options: HistoryOptions,
    /// Journal file; `None` keeps history in memory only
    path: Option<PathBuf>,
    journal_lines: usize,
    /// The journal ends in a partial line that the next append must not extend
    torn_tail: bool,
}

impl HistoryStore {
    #[must_use]
    pub fn in_memory(options: HistoryOptions) -> Self {
        let options = options.normalized();
        Self {
            entries: LruCache::new(capacity(&options)),
            options,
            path: None,
            journal_lines: 0,
            torn_tail: false,
        }
    }

    /// Load history from a journal file, creating nothing if it is missing.
    ///
    /// Lines that fail to parse (a torn final write, for instance) are skipped,
    /// and the next append starts on a fresh line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn open(path: &Path, options: HistoryOptions) -> Result<Self> {
        let mut store = Self::in_memory(options);
        store.path = Some(path.to_path_buf());

        if !path.exists() {
            debug!("History journal not found at {}", path.display());
            return Ok(store);
        }

        let content = std::fs::read_to_string(path)?;
        store.torn_tail = !content.is_empty() && !content.ends_with('\n');
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            store.journal_lines += 1;
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) => store.apply(record),
                Err(e) => warn!(
                    "Skipping unreadable history line {} in {}: {}",
                    number + 1,
                    path.display(),
                    e
                ),
            }
        }

        info!(
            "Loaded {} history entries ({} journal lines)",
            store.entries.len(),
            store.journal_lines
        );
        Ok(store)
    }

    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Select(entry) => {
                self.entries.put(entry.key(), entry);
            }
            JournalRecord::Forget { query_text } => {
                self.remove_query(&query_text);
            }
        }
    }

    fn remove_query(&mut self, query_text: &str) -> usize {
        let doomed: Vec<HistoryKey> = self
            .entries
            .iter()
            .filter(|(k, _)| k.query_text == query_text)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.entries.pop(key);
        }
        doomed.len()
    }

    fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut line = if self.torn_tail {
            String::from("\n")
        } else {
            String::new()
        };
        line.push_str(&serde_json::to_string(record)?);
        line.push('\n');
        file.write_all(line.as_bytes())?;
        self.torn_tail = false;
        self.journal_lines += 1;
        Ok(())
    }

    fn needs_compaction(&self) -> bool {
        #[allow(clippy::cast_precision_loss)]
        // Entry counts are far below f64 precision limits
        let limit = self.entries.len().max(1) as f64 * self.options.compact_threshold;
        #[allow(clippy::cast_precision_loss)]
        let lines = self.journal_lines as f64;
        self.path.is_some() && self.journal_lines >= MIN_COMPACT_LINES && lines > limit
    }

    /// Record that `key` from `plugin_id` was picked for `query_text`.
    /// Returns the new selection count.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be appended to.
    pub fn record_selection(
        &mut self,
        query_text: &str,
        plugin_id: &str,
        key: &ResultKey,
    ) -> Result<u32> {
        self.record_selection_at(query_text, plugin_id, key, now_millis())
    }

    /// [`record_selection`](Self::record_selection) with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be appended to.
    pub fn record_selection_at(
        &mut self,
        query_text: &str,
        plugin_id: &str,
        key: &ResultKey,
        at: u64,
    ) -> Result<u32> {
        let history_key = HistoryKey {
            query_text: query_text.to_string(),
            identity: ResultIdentity {
                plugin_id: plugin_id.to_string(),
                key: key.clone(),
            },
        };

        let entry = match self.entries.peek(&history_key) {
            Some(existing) => HistoryEntry {
                selection_count: existing.selection_count.saturating_add(1),
                last_selected_at: at,
                ..existing.clone()
            },
            None => HistoryEntry {
                query_text: query_text.to_string(),
                plugin_id: plugin_id.to_string(),
                result_key: key.clone(),
                selection_count: 1,
                last_selected_at: at,
            },
        };
        let count = entry.selection_count;

        // Memory changes only after the journal accepted the record
        self.append(&JournalRecord::Select(entry.clone()))?;
        let evicted = self
            .entries
            .push(history_key.clone(), entry)
            .filter(|(k, _)| *k != history_key);
        if let Some((evicted, _)) = evicted {
            debug!("History full, evicted entry for '{}'", evicted.query_text);
        }

        if self.needs_compaction() {
            self.compact()?;
        }
        Ok(count)
    }

    /// Drop every entry recorded for `query_text`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be appended to.
    pub fn forget(&mut self, query_text: &str) -> Result<usize> {
        if !self.entries.iter().any(|(k, _)| k.query_text == query_text) {
            return Ok(0);
        }
        self.append(&JournalRecord::Forget {
            query_text: query_text.to_string(),
        })?;
        Ok(self.remove_query(query_text))
    }

    /// Rewrite the journal so it holds exactly the live entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be written or replaced.
    pub fn compact(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            // Oldest first, so replay restores recency order
            for (_, entry) in self.entries.iter().rev() {
                serde_json::to_writer(&mut writer, &JournalRecord::Select(entry.clone()))?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &path).map_err(|e| {
            Error::History(format!("failed to replace {}: {e}", path.display()))
        })?;

        debug!(
            "Compacted history journal from {} to {} lines",
            self.journal_lines,
            self.entries.len()
        );
        self.journal_lines = self.entries.len();
        self.torn_tail = false;
        Ok(())
    }

    /// Times `identity` was picked for exactly `query_text`.
    #[must_use]
    pub fn selection_count(&self, query_text: &str, identity: &ResultIdentity) -> u32 {
        let key = HistoryKey {
            query_text: query_text.to_string(),
            identity: identity.clone(),
        };
        self.entries.peek(&key).map_or(0, |e| e.selection_count)
    }

    /// Ranking bonus for `identity` under `query_text`.
    ///
    /// `boost = cap * n / (n + half)`: zero without history, rising with every
    /// selection and levelling off towards `cap`.
    #[must_use]
    pub fn boost(&self, query_text: &str, identity: &ResultIdentity) -> i64 {
        let count = self.selection_count(query_text, identity);
        history_boost(count, self.options.boost_cap, self.options.boost_half_count)
    }

    /// Entries, most recently selected first.
    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().map(|(_, e)| e.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn capacity(options: &HistoryOptions) -> NonZeroUsize {
    NonZeroUsize::new(options.capacity).unwrap_or(NonZeroUsize::MIN)
}

/// Saturating bonus curve shared by the store and its tests.
#[must_use]
pub fn history_boost(count: u32, cap: i64, half_count: u32) -> i64 {
    if count == 0 || cap <= 0 {
        return 0;
    }
    let n = i64::from(count);
    let half = i64::from(half_count.max(1));
    cap.saturating_mul(n) / (n + half)
}
