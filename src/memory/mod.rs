//! Tiered conversational memory.
//!
//! Sub-modules:
//! - `types`: entries, roles, queries, and trim reports.
//! - `classify`: collaborator traits (importance, mood/topic, summarizer)
//!   and the tolerant classifier-reply parser.
//! - `embedding`: the `Embedder` seam and the deterministic hashing embedder.
//! - `store`: the two-tier `MemoryStore` with JSON persistence.
//! - `summarize`: summarization submitted through the task engine.

pub mod classify;
pub mod embedding;
pub mod store;
pub mod summarize;
pub mod types;

pub use classify::{
    ClassifierReply, Collaborators, ImportanceClassifier, MoodTopicClassifier, OfflineClassifier,
    Summarizer, SummaryKind, local_summary, parse_importance,
};
pub use embedding::{Embedder, HashingEmbedder, cosine_similarity};
pub use store::{MemoryStore, NOT_ENOUGH_LONG_TERM, SUMMARY_PREFIX};
pub use summarize::EngineSummarizer;
pub use types::{
    ContextTurn, EntryMetadata, Interaction, MemoryEntry, MemoryLog, Role, ScoredEntry,
    SearchQuery, TrimReport,
};
