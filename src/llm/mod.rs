//! Language model collaborators.
//!
//! Memory classification and summarization against any OpenAI-compatible
//! chat endpoint. Requests are blocking (`ureq`); call them from worker
//! threads or `spawn_blocking`, never directly on an async runtime thread.

pub mod classifier;
pub mod client;

pub use classifier::LlmClassifier;
pub use client::{ChatClient, ChatOptions};
