//! Collaborator seams used by the memory store: importance rating,
//! mood/topic tagging, summarization, and embeddings.
//!
//! The store treats every collaborator as best-effort. Failures are logged
//! and replaced by defaults (importance 1, no metadata, a local summary).

use crate::error::Result;
use crate::memory::embedding::{Embedder, HashingEmbedder};
use crate::memory::types::{EntryMetadata, MAX_IMPORTANCE, MIN_IMPORTANCE};
use std::sync::Arc;

/// Rates how much a message matters, 1 (not important) to 5 (very).
pub trait ImportanceClassifier: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable or its reply is unusable.
    fn classify_importance(&self, message: &str) -> Result<u8>;
}

/// Derives mood, topic, and a display color for a message.
pub trait MoodTopicClassifier: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable.
    fn classify_mood_topic(&self, message: &str) -> Result<EntryMetadata>;
}

/// What a summary is for; backends pick their prompt from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    /// Low-importance entries folded away by trim.
    LowImportance,
    /// Overview of long-term memory.
    LongTermOverview,
}

/// Condenses a `Role: message` transcript.
pub trait Summarizer: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable.
    fn summarize(&self, kind: SummaryKind, transcript: &str) -> Result<String>;
}

/// Everything the store delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub importance: Arc<dyn ImportanceClassifier>,
    pub mood: Arc<dyn MoodTopicClassifier>,
    pub summarizer: Arc<dyn Summarizer>,
    pub embedder: Arc<dyn Embedder>,
}

impl Collaborators {
    /// One backend serving all three classifier roles.
    pub fn from_classifier<C>(classifier: Arc<C>, embedder: Arc<dyn Embedder>) -> Self
    where
        C: ImportanceClassifier + MoodTopicClassifier + Summarizer + 'static,
    {
        Self {
            importance: Arc::clone(&classifier) as Arc<dyn ImportanceClassifier>,
            mood: Arc::clone(&classifier) as Arc<dyn MoodTopicClassifier>,
            summarizer: classifier,
            embedder,
        }
    }

    /// No network: importance 1, no metadata, local summaries, hashing
    /// embeddings of the given dimension.
    #[must_use]
    pub fn offline(embedding_dim: usize) -> Self {
        let embedder: Arc<dyn Embedder> = match HashingEmbedder::new(embedding_dim) {
            Ok(embedder) => Arc::new(embedder),
            Err(_) => Arc::new(HashingEmbedder::default()),
        };
        Self::from_classifier(Arc::new(OfflineClassifier), embedder)
    }

    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("embedding_dim", &self.embedder.dim())
            .finish_non_exhaustive()
    }
}

/// Collaborator used when no model endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineClassifier;

impl ImportanceClassifier for OfflineClassifier {
    fn classify_importance(&self, _message: &str) -> Result<u8> {
        Ok(MIN_IMPORTANCE)
    }
}

impl MoodTopicClassifier for OfflineClassifier {
    fn classify_mood_topic(&self, _message: &str) -> Result<EntryMetadata> {
        Ok(EntryMetadata::default())
    }
}

impl Summarizer for OfflineClassifier {
    fn summarize(&self, _kind: SummaryKind, transcript: &str) -> Result<String> {
        Ok(local_summary(transcript))
    }
}

/// Longest local summary, in characters.
pub const LOCAL_SUMMARY_MAX_CHARS: usize = 400;

/// Best-effort summary without a model: the transcript lines joined with
/// ` | ` and cut at [`LOCAL_SUMMARY_MAX_CHARS`].
#[must_use]
pub fn local_summary(transcript: &str) -> String {
    let joined = transcript
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    if joined.chars().count() <= LOCAL_SUMMARY_MAX_CHARS {
        return joined;
    }
    let mut out: String = joined.chars().take(LOCAL_SUMMARY_MAX_CHARS).collect();
    out.push_str("...");
    out
}

/// First digit 1-5 in a free-form reply.
#[must_use]
pub fn parse_importance(reply: &str) -> Option<u8> {
    reply
        .chars()
        .filter_map(|c| c.to_digit(10))
        .filter_map(|d| u8::try_from(d).ok())
        .find(|d| (MIN_IMPORTANCE..=MAX_IMPORTANCE).contains(d))
}

/// Outcome of reading a free-form mood/topic reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierReply {
    /// The `{...}` part was valid JSON.
    Parsed(EntryMetadata),
    /// Not JSON, but `key: value` pairs could be picked out.
    PartiallyParsed(EntryMetadata),
    Empty,
}

impl ClassifierReply {
    /// Read a reply such as `Sure! {"mood": "happy", "topic": "work"}`.
    #[must_use]
    pub fn parse(reply: &str) -> Self {
        let body = match (reply.find('{'), reply.rfind('}')) {
            (Some(start), Some(end)) if end > start => &reply[start..=end],
            _ => reply,
        };

        if body.starts_with('{')
            && let Ok(serde_json::Value::Object(map)) = serde_json::from_str(body)
        {
            let field = |key: &str| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .and_then(|(_, v)| match v {
                        serde_json::Value::String(s) => Some(s.trim().to_owned()),
                        serde_json::Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .filter(|s| !s.is_empty())
            };
            return Self::Parsed(EntryMetadata {
                mood: field("mood"),
                topic: field("topic"),
                color: field("color"),
            });
        }

        let metadata = EntryMetadata {
            mood: extract_field(body, "mood", is_word_char),
            topic: extract_field(body, "topic", is_word_char),
            color: extract_field(body, "color", is_color_char),
        };
        if metadata.is_empty() {
            Self::Empty
        } else {
            Self::PartiallyParsed(metadata)
        }
    }

    #[must_use]
    pub fn into_metadata(self) -> EntryMetadata {
        match self {
            Self::Parsed(metadata) | Self::PartiallyParsed(metadata) => metadata,
            Self::Empty => EntryMetadata::default(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == ' '
}

fn is_color_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '#' | '(' | ')' | ',' | ' ')
}

/// Find `key` (case-insensitive, optionally quoted) followed by `:` or `=`
/// and return the value made of `allowed` characters.
fn extract_field(text: &str, key: &str, allowed: fn(char) -> bool) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let mut from = 0;
    while let Some(offset) = lower[from..].find(key) {
        let key_end = from + offset + key.len();
        from = key_end;

        let rest = text[key_end..].strip_prefix('"').unwrap_or(&text[key_end..]);
        let rest = rest.trim_start();
        let Some(rest) = rest.strip_prefix([':', '=']) else {
            continue;
        };
        let rest = rest.trim_start();
        let rest = rest.strip_prefix('"').unwrap_or(rest);
        let value: String = rest.chars().take_while(|&c| allowed(c)).collect();
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_owned());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn strict_json_is_parsed() {
        let reply = r##"Here you go: {"mood": "happy", "topic": "work", "color": "#ffcc00"}"##;
        let parsed = ClassifierReply::parse(reply);
        assert_eq!(
            parsed,
            ClassifierReply::Parsed(EntryMetadata {
                mood: Some("happy".to_owned()),
                topic: Some("work".to_owned()),
                color: Some("#ffcc00".to_owned()),
            })
        );
    }

    #[test]
    fn key_value_reply_is_partially_parsed() {
        let parsed = ClassifierReply::parse("{mood: happy, topic = self-care, color: rgb(1, 2, 3)}");
        let ClassifierReply::PartiallyParsed(metadata) = parsed else {
            panic!("expected a partial parse, got {parsed:?}");
        };
        assert_eq!(metadata.mood.as_deref(), Some("happy"));
        assert_eq!(metadata.topic.as_deref(), Some("self-care"));
        assert_eq!(metadata.color.as_deref(), Some("rgb(1, 2, 3)"));
    }

    #[test]
    fn unbraced_key_value_reply_is_partially_parsed() {
        let parsed = ClassifierReply::parse("Mood: curious");
        assert_eq!(
            parsed.into_metadata().mood.as_deref(),
            Some("curious")
        );
    }

    #[test]
    fn prose_is_empty() {
        assert_eq!(
            ClassifierReply::parse("I cannot classify this message."),
            ClassifierReply::Empty
        );
        assert!(ClassifierReply::parse("").into_metadata().is_empty());
    }

    #[test]
    fn importance_takes_first_valid_digit() {
        assert_eq!(parse_importance("4"), Some(4));
        assert_eq!(parse_importance("Importance: 0 or maybe 3"), Some(3));
        assert_eq!(parse_importance("9 7 6"), None);
        assert_eq!(parse_importance("unsure"), None);
    }

    #[test]
    fn local_summary_joins_and_truncates() {
        assert_eq!(local_summary("User: hi\n\nAssistant: hello"), "User: hi | Assistant: hello");
        let long = "x".repeat(LOCAL_SUMMARY_MAX_CHARS * 2);
        let summary = local_summary(&long);
        assert_eq!(summary.chars().count(), LOCAL_SUMMARY_MAX_CHARS + 3);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn offline_collaborators_use_defaults() {
        let collaborators = Collaborators::offline(32);
        assert_eq!(collaborators.importance.classify_importance("x").unwrap(), 1);
        assert!(collaborators.mood.classify_mood_topic("x").unwrap().is_empty());
        assert_eq!(
            collaborators
                .summarizer
                .summarize(SummaryKind::LowImportance, "User: a\nUser: b")
                .unwrap(),
            "User: a | User: b"
        );
        assert_eq!(collaborators.embedder.dim(), 32);
    }
}
