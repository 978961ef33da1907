//! Entry types shared by the short-term and long-term tiers.

use crate::error::SageError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 5;

/// Clamp any integer rating into `[MIN_IMPORTANCE, MAX_IMPORTANCE]`.
#[must_use]
pub fn clamp_importance(value: i64) -> u8 {
    // Both bounds fit in u8, so the cast cannot truncate.
    value.clamp(i64::from(MIN_IMPORTANCE), i64::from(MAX_IMPORTANCE)) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "sage")]
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Capitalized form used in transcripts (`User: hi`).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::System => "System",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" | "sage" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(SageError::Memory(format!("unknown role: {other}"))),
        }
    }
}

/// Mood/topic/color annotation produced by the mood classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl EntryMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mood.is_none() && self.topic.is_none() && self.color.is_none()
    }

    /// Fill fields that are still `None` from `other`.
    pub fn fill_missing(&mut self, other: EntryMetadata) {
        if self.mood.is_none() {
            self.mood = other.mood;
        }
        if self.topic.is_none() {
            self.topic = other.topic;
        }
        if self.color.is_none() {
            self.color = other.color;
        }
    }
}

/// One `(role, message)` turn, as returned by context reads and stored in
/// context snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: Role,
    pub message: String,
}

impl ContextTurn {
    #[must_use]
    pub fn new(role: Role, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
        }
    }
}

fn deserialize_importance<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = i64::deserialize(deserializer)?;
    Ok(clamp_importance(raw))
}

fn default_importance() -> u8 {
    MIN_IMPORTANCE
}

/// Accepts RFC 3339 as well as naive ISO-8601 timestamps (read as UTC).
fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
}

/// A single logged interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub message: String,
    #[serde(
        default = "default_importance",
        deserialize_with = "deserialize_importance"
    )]
    pub importance: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "EntryMetadata::is_empty")]
    pub metadata: EntryMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_snapshot: Option<Vec<ContextTurn>>,
}

impl MemoryEntry {
    /// A bare entry stamped now, with importance clamped.
    #[must_use]
    pub fn new(role: Role, message: impl Into<String>, importance: u8) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            message: message.into(),
            importance: clamp_importance(i64::from(importance)),
            tags: Vec::new(),
            metadata: EntryMetadata::default(),
            embedding: None,
            context_snapshot: None,
        }
    }

    /// Value equality that ignores the derived embedding.
    #[must_use]
    pub fn same_memory(&self, other: &MemoryEntry) -> bool {
        self.timestamp == other.timestamp
            && self.role == other.role
            && self.message == other.message
            && self.importance == other.importance
            && self.tags == other.tags
            && self.metadata == other.metadata
            && self.context_snapshot == other.context_snapshot
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Add `tag` unless already present.
    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if !tag.is_empty() && !self.has_tag(tag) {
            self.tags.push(tag.to_owned());
        }
    }

    #[must_use]
    pub fn turn(&self) -> ContextTurn {
        ContextTurn::new(self.role, self.message.clone())
    }

    /// `Role: message` transcript line.
    #[must_use]
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.role.label(), self.message)
    }
}

/// On-disk shape of both tiers: `{"log": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryLog {
    #[serde(default)]
    pub log: Vec<MemoryEntry>,
}

/// Arguments to [`MemoryStore::log_interaction`](super::MemoryStore::log_interaction).
///
/// Anything left `None` is derived by the store's collaborators.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub role: Role,
    pub message: String,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<EntryMetadata>,
    pub importance: Option<u8>,
    pub context_snapshot: Option<Vec<ContextTurn>>,
}

impl Interaction {
    #[must_use]
    pub fn new(role: Role, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
            tags: None,
            metadata: None,
            importance: None,
            context_snapshot: None,
        }
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = Some(importance);
        self
    }

    /// Full conversation context, kept only if the entry ends up high-importance.
    #[must_use]
    pub fn with_context_snapshot(mut self, turns: Vec<ContextTurn>) -> Self {
        self.context_snapshot = Some(turns);
        self
    }
}

/// Conjunctive filter for [`MemoryStore::search`](super::MemoryStore::search).
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Case-insensitive substring of the message.
    pub text: Option<String>,
    pub tag: Option<String>,
    pub role: Option<Role>,
}

impl SearchQuery {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if let Some(text) = &self.text
            && !entry.message.to_lowercase().contains(&text.to_lowercase())
        {
            return false;
        }
        if let Some(tag) = &self.tag
            && !entry.has_tag(tag)
        {
            return false;
        }
        self.role.is_none_or(|role| entry.role == role)
    }
}

/// A semantic search result.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub score: f32,
    pub entry: MemoryEntry,
}

/// What a trim pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    /// Short-term length after the trim, summary included.
    pub kept: usize,
    pub dropped_medium: usize,
    /// High-importance entries evicted from short-term because high alone
    /// exceeded capacity. They remain in long-term.
    pub evicted_high: usize,
    /// Low-importance entries folded into the summary.
    pub summarized_low: usize,
    pub summary_added: bool,
    /// Entries newly copied into long-term.
    pub migrated: usize,
    pub long_term_len: usize,
}
