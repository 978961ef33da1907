//! Sage: background task engine and tiered conversational memory.
//!
//! Two independent subsystems shared by the assistant's front ends:
//!
//! - **Task engine** ([`scheduler`]): prioritized, cancellable background
//!   work with status tracking. One dispatch thread feeds a bounded worker
//!   pool (daemon tasks) or dedicated joinable threads (non-daemon tasks).
//! - **Memory** ([`memory`]): a short-term conversation log with automatic
//!   importance rating, mood/topic tagging, embeddings, and a trim pass that
//!   summarizes low-importance entries and migrates high-importance ones to a
//!   long-term store.
//!
//! Classification and summarization are pluggable collaborators; [`llm`]
//! provides implementations over any OpenAI-compatible chat endpoint.

pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod sage_dirs;
pub mod scheduler;

pub use config::{LlmConfig, MemoryConfig, SageConfig, TaskEngineConfig};
pub use error::{Result, SageError};
pub use memory::{Collaborators, Interaction, MemoryEntry, MemoryStore, Role};
pub use scheduler::{SubmitOptions, TaskEngine, TaskId, TaskStatus};
