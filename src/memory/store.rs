//! Two-tier conversational memory.
//!
//! Short-term holds the recent conversation, bounded by `max_history`.
//! Long-term keeps every high-importance entry (deduplicated), bounded by
//! `long_term_max`. Both tiers persist as `{"log": [...]}` JSON and every
//! mutating call rewrites the affected file atomically.

use crate::config::MemoryConfig;
use crate::error::{Result, SageError};
use crate::memory::classify::{Collaborators, SummaryKind, local_summary};
use crate::memory::embedding::cosine_similarity;
use crate::memory::types::{
    ContextTurn, EntryMetadata, Interaction, MIN_IMPORTANCE, MemoryEntry, MemoryLog, Role,
    ScoredEntry, SearchQuery, TrimReport, clamp_importance,
};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Prefix of the synthetic entry that replaces summarized low-importance entries.
pub const SUMMARY_PREFIX: &str = "Summary of less important memories: ";

/// Returned by [`MemoryStore::summarize_long_term`] below the entry threshold.
pub const NOT_ENOUGH_LONG_TERM: &str = "Not enough long-term memory entries for a summary.";

#[derive(Debug, Default)]
struct Tiers {
    short: Vec<MemoryEntry>,
    long: Vec<MemoryEntry>,
}

/// Tiered memory store. All mutation is serialized by an internal mutex,
/// so a single store can be shared across threads behind an `Arc`.
pub struct MemoryStore {
    config: MemoryConfig,
    collaborators: Collaborators,
    tiers: Mutex<Tiers>,
}

fn read_log(path: &Path) -> Result<Vec<MemoryEntry>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(SageError::Memory(format!(
                "read {}: {e}",
                path.display()
            )));
        }
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: MemoryLog = serde_json::from_str(&content)
        .map_err(|e| SageError::Memory(format!("parse {}: {e}", path.display())))?;
    Ok(parsed.log)
}

/// Write `{"log": entries}` to a temporary file and rename it over `path`.
fn write_log_atomic(path: &Path, entries: &[MemoryEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SageError::Memory(format!("create memory dir: {e}")))?;
    }

    let log = MemoryLog {
        log: entries.to_vec(),
    };
    let json = serde_json::to_string_pretty(&log)
        .map_err(|e| SageError::Memory(format!("serialize memory log: {e}")))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)
        .map_err(|e| SageError::Memory(format!("write {}: {e}", tmp_path.display())))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| SageError::Memory(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

fn transcript(entries: &[&MemoryEntry]) -> String {
    entries
        .iter()
        .map(|entry| entry.transcript_line())
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(message: &str) -> String {
    let mut out: String = message.chars().take(60).collect();
    if message.chars().count() > 60 {
        out.push_str("...");
    }
    out
}

impl MemoryStore {
    /// Load both tiers from `config.root_dir`. Missing files are empty logs.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Config`] for an invalid config and
    /// [`SageError::Memory`] if either log exists but cannot be read or parsed.
    pub fn open(config: MemoryConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let short = read_log(&config.short_term_path())?;
        let long = read_log(&config.long_term_path())?;
        debug!(
            "memory loaded from {} ({} short-term, {} long-term)",
            config.root_dir.display(),
            short.len(),
            long.len()
        );
        Ok(Self {
            config,
            collaborators,
            tiers: Mutex::new(Tiers { short, long }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Tiers> {
        self.tiers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn save_short(&self, tiers: &Tiers) -> Result<()> {
        write_log_atomic(&self.config.short_term_path(), &tiers.short)
    }

    fn save_long(&self, tiers: &Tiers) -> Result<()> {
        write_log_atomic(&self.config.long_term_path(), &tiers.long)
    }

    fn rate(&self, message: &str) -> u8 {
        match self.collaborators.importance.classify_importance(message) {
            Ok(value) => clamp_importance(i64::from(value)),
            Err(e) => {
                warn!("importance classification failed: {e}");
                MIN_IMPORTANCE
            }
        }
    }

    fn annotate(&self, message: &str) -> EntryMetadata {
        self.collaborators
            .mood
            .classify_mood_topic(message)
            .unwrap_or_else(|e| {
                warn!("mood/topic classification failed: {e}");
                EntryMetadata::default()
            })
    }

    /// Append one interaction, deriving whatever the caller left out.
    ///
    /// Classifier and embedder failures degrade to defaults. Trims when the
    /// short-term log grows past `max_history`. Returns the stored entry.
    ///
    /// # Errors
    ///
    /// Returns an error only if persisting fails; the entry is then not kept
    /// in memory either, so a retry does not duplicate it.
    pub fn log_interaction(&self, interaction: Interaction) -> Result<MemoryEntry> {
        let Interaction {
            role,
            message,
            tags,
            metadata,
            importance,
            context_snapshot,
        } = interaction;
        let message = message.trim().to_owned();

        // Collaborators run before the lock so slow backends never block readers.
        let importance = match importance {
            Some(value) => clamp_importance(i64::from(value)),
            None => self.rate(&message),
        };

        let derived = if metadata.is_none() || tags.is_none() {
            self.annotate(&message)
        } else {
            EntryMetadata::default()
        };

        let mut entry = MemoryEntry::new(role, message, importance);
        for tag in tags.unwrap_or_default() {
            entry.add_tag(&tag);
        }
        if let Some(mood) = &derived.mood {
            entry.add_tag(mood);
        }
        if let Some(topic) = &derived.topic {
            entry.add_tag(topic);
        }
        entry.metadata = metadata.unwrap_or_default();
        entry.metadata.fill_missing(derived);

        if importance >= self.config.high_threshold {
            entry.context_snapshot = context_snapshot;
        }

        entry.embedding = match self.collaborators.embedder.embed(&entry.message) {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!("embedding failed, will retry on semantic search: {e}");
                None
            }
        };

        let mut tiers = self.lock();
        tiers.short.push(entry.clone());
        let persisted = if tiers.short.len() > self.config.max_history {
            self.trim_locked(&mut tiers).map(drop)
        } else {
            self.save_short(&tiers)
        };
        if let Err(e) = persisted {
            // A failed trim has already restored short-term, new entry last.
            tiers.short.pop();
            return Err(e);
        }
        info!(
            "interaction logged: {} '{}' (importance={})",
            entry.role,
            preview(&entry.message),
            entry.importance
        );
        Ok(entry)
    }

    /// Enforce the short-term bound: summarize low entries, drop the oldest
    /// medium entries, and migrate high entries to long-term.
    ///
    /// # Errors
    ///
    /// Returns an error if either tier cannot be persisted. Short-term is
    /// then left as it was; long-term keeps the migration only if it was
    /// written.
    pub fn trim(&self) -> Result<TrimReport> {
        let mut tiers = self.lock();
        self.trim_locked(&mut tiers)
    }

    fn trim_locked(&self, tiers: &mut Tiers) -> Result<TrimReport> {
        let high_threshold = self.config.high_threshold;
        let low_threshold = self.config.low_threshold;
        let is_high = |e: &MemoryEntry| e.importance >= high_threshold;
        let is_low = |e: &MemoryEntry| e.importance <= low_threshold;

        let entries = std::mem::take(&mut tiers.short);
        let previous_short = entries.clone();
        let previous_long = tiers.long.clone();
        let low: Vec<&MemoryEntry> = entries.iter().filter(|e| is_low(e)).collect();
        let high_count = entries.iter().filter(|e| is_high(e)).count();
        let medium_count = entries.len() - high_count - low.len();

        // The summary takes one slot of the cap.
        let summary_slots = usize::from(!low.is_empty());
        let cap = self.config.max_history - summary_slots;

        let mut drop_medium = 0;
        let mut evict_high = 0;
        if high_count + medium_count > cap {
            let medium_room = cap.saturating_sub(high_count);
            drop_medium = medium_count - medium_room.min(medium_count);
            evict_high = high_count.saturating_sub(cap);
        }

        let mut migrated = 0;
        for entry in entries.iter().filter(|e| is_high(e)) {
            if !tiers.long.iter().any(|existing| existing.same_memory(entry)) {
                tiers.long.push(entry.clone());
                migrated += 1;
            }
        }
        if tiers.long.len() > self.config.long_term_max {
            let excess = tiers.long.len() - self.config.long_term_max;
            tiers.long.drain(..excess);
        }
        if evict_high > 0 {
            warn!(
                "{high_count} high-importance entries exceed the short-term cap of {cap}; \
                 evicting the oldest {evict_high} from short-term (kept in long-term)"
            );
        }

        let summary = if low.is_empty() {
            None
        } else {
            let text = transcript(&low);
            let summary = self
                .collaborators
                .summarizer
                .summarize(SummaryKind::LowImportance, &text)
                .unwrap_or_else(|e| {
                    warn!("summarizer failed, using local summary: {e}");
                    local_summary(&text)
                });
            Some(MemoryEntry::new(
                Role::System,
                format!("{SUMMARY_PREFIX}{}", summary.trim()),
                MIN_IMPORTANCE,
            ))
        };
        let summarized_low = low.len();

        let mut kept = Vec::with_capacity(self.config.max_history);
        kept.extend(summary);
        let (mut medium_seen, mut high_seen) = (0, 0);
        for entry in entries {
            if is_low(&entry) {
                continue;
            }
            if is_high(&entry) {
                high_seen += 1;
                if high_seen <= evict_high {
                    continue;
                }
            } else {
                medium_seen += 1;
                if medium_seen <= drop_medium {
                    continue;
                }
            }
            kept.push(entry);
        }
        tiers.short = kept;

        // Long-term first: an evicted high entry must be durable before it
        // leaves short-term.
        if let Err(e) = self.save_long(tiers) {
            tiers.short = previous_short;
            tiers.long = previous_long;
            return Err(e);
        }
        if let Err(e) = self.save_short(tiers) {
            tiers.short = previous_short;
            return Err(e);
        }

        let report = TrimReport {
            kept: tiers.short.len(),
            dropped_medium: drop_medium,
            evicted_high: evict_high,
            summarized_low,
            summary_added: summarized_low > 0,
            migrated,
            long_term_len: tiers.long.len(),
        };
        info!(
            "memory trimmed: {} entries remain, {} migrated to long-term",
            report.kept, report.migrated
        );
        Ok(report)
    }

    /// Set the importance of the short-term entry at `idx`.
    ///
    /// Migration happens on the next trim, not here.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Memory`] if `idx` is out of range or persisting fails.
    pub fn promote(&self, idx: usize, new_importance: u8) -> Result<()> {
        self.set_importance(idx, new_importance, "promoted")
    }

    /// Same as [`promote`](Self::promote); kept separate for call-site clarity.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Memory`] if `idx` is out of range or persisting fails.
    pub fn demote(&self, idx: usize, new_importance: u8) -> Result<()> {
        self.set_importance(idx, new_importance, "demoted")
    }

    fn set_importance(&self, idx: usize, new_importance: u8, verb: &str) -> Result<()> {
        let mut tiers = self.lock();
        let len = tiers.short.len();
        let entry = tiers.short.get_mut(idx).ok_or_else(|| {
            SageError::Memory(format!("memory index {idx} out of range (len {len})"))
        })?;
        let previous = entry.importance;
        entry.importance = clamp_importance(i64::from(new_importance));
        let importance = entry.importance;
        if let Err(e) = self.save_short(&tiers) {
            tiers.short[idx].importance = previous;
            return Err(e);
        }
        debug!("memory at idx {idx} {verb} to importance {importance}");
        Ok(())
    }

    /// The whole short-term conversation, oldest first.
    #[must_use]
    pub fn context(&self) -> Vec<ContextTurn> {
        self.lock().short.iter().map(MemoryEntry::turn).collect()
    }

    /// The newest `limit` long-term turns, oldest first.
    #[must_use]
    pub fn long_term_context(&self, limit: usize) -> Vec<ContextTurn> {
        let tiers = self.lock();
        let start = tiers.long.len().saturating_sub(limit);
        tiers.long[start..].iter().map(MemoryEntry::turn).collect()
    }

    #[must_use]
    pub fn last_user_message(&self) -> Option<String> {
        self.lock()
            .short
            .iter()
            .rev()
            .find(|entry| entry.role == Role::User)
            .map(|entry| entry.message.clone())
    }

    /// Short-term entries matching every set field of `query`.
    #[must_use]
    pub fn search(&self, query: &SearchQuery) -> Vec<MemoryEntry> {
        self.lock()
            .short
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect()
    }

    /// Rank short-term entries by embedding similarity to `query`.
    ///
    /// Entries without a usable embedding are embedded first and the log is
    /// persisted if any were added.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be embedded or persisting the
    /// backfilled embeddings fails.
    pub fn semantic_search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredEntry>> {
        let embedder = &self.collaborators.embedder;
        let query_vector = embedder.embed(query)?;

        let mut tiers = self.lock();
        let mut replaced = Vec::new();
        for (idx, entry) in tiers.short.iter_mut().enumerate() {
            let usable = entry
                .embedding
                .as_ref()
                .is_some_and(|v| v.len() == embedder.dim());
            if usable || entry.message.is_empty() {
                continue;
            }
            match embedder.embed(&entry.message) {
                Ok(vector) => replaced.push((idx, entry.embedding.replace(vector))),
                Err(e) => warn!("embedding backfill failed: {e}"),
            }
        }
        if !replaced.is_empty() {
            debug!("backfilled {} embeddings", replaced.len());
            if let Err(e) = self.save_short(&tiers) {
                for (idx, old) in replaced {
                    tiers.short[idx].embedding = old;
                }
                return Err(e);
            }
        }

        let mut scored: Vec<ScoredEntry> = tiers
            .short
            .iter()
            .filter_map(|entry| {
                let vector = entry.embedding.as_ref()?;
                Some(ScoredEntry {
                    score: cosine_similarity(&query_vector, vector),
                    entry: entry.clone(),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// The last `limit` entries as `Role: message [tags: a, b]` lines.
    #[must_use]
    pub fn summarize_recent(&self, limit: usize) -> String {
        let tiers = self.lock();
        let start = tiers.short.len().saturating_sub(limit);
        tiers.short[start..]
            .iter()
            .map(|entry| {
                let mut line = entry.transcript_line();
                if !entry.tags.is_empty() {
                    line.push_str(&format!(" [tags: {}]", entry.tags.join(", ")));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Overview of the newest `min_entries` long-term entries, or
    /// [`NOT_ENOUGH_LONG_TERM`] when there are fewer (or `min_entries` is 0).
    #[must_use]
    pub fn summarize_long_term(&self, min_entries: usize) -> String {
        let text = {
            let tiers = self.lock();
            if min_entries == 0 || tiers.long.len() < min_entries {
                return NOT_ENOUGH_LONG_TERM.to_owned();
            }
            let start = tiers.long.len() - min_entries;
            let newest: Vec<&MemoryEntry> = tiers.long[start..].iter().collect();
            transcript(&newest)
        };
        self.collaborators
            .summarizer
            .summarize(SummaryKind::LongTermOverview, &text)
            .unwrap_or_else(|e| {
                warn!("long-term summary failed, using local summary: {e}");
                local_summary(&text)
            })
    }

    /// Empty short-term memory. Long-term is untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub fn clear(&self) -> Result<()> {
        let mut tiers = self.lock();
        let previous = std::mem::take(&mut tiers.short);
        if let Err(e) = self.save_short(&tiers) {
            tiers.short = previous;
            return Err(e);
        }
        info!("short-term memory cleared");
        Ok(())
    }

    #[must_use]
    pub fn entries(&self) -> Vec<MemoryEntry> {
        self.lock().short.clone()
    }

    #[must_use]
    pub fn long_term_entries(&self) -> Vec<MemoryEntry> {
        self.lock().long.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().short.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().short.is_empty()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("root_dir", &self.config.root_dir)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}
