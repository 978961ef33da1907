//! Configuration types for the task engine, memory store, and LLM collaborators.

use crate::error::{Result, SageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SageConfig {
    /// Background task engine settings.
    pub tasks: TaskEngineConfig,
    /// Tiered memory settings.
    pub memory: MemoryConfig,
    /// OpenAI-compatible endpoint used by the classifier and summarizer.
    pub llm: LlmConfig,
}

/// Background task engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskEngineConfig {
    /// Number of worker threads serving daemon tasks.
    pub workers: usize,
    /// How long the dispatch loop blocks waiting for work before re-checking
    /// the running flag (milliseconds).
    pub poll_interval_ms: u64,
    /// Per-thread bound when joining non-daemon threads at shutdown
    /// (milliseconds).
    pub join_timeout_ms: u64,
    /// Default age after which terminal tasks are evicted by cleanup (seconds).
    pub cleanup_max_age_secs: u64,
    /// Priority used when memory summarization is routed through the engine.
    pub summarize_priority: i32,
    /// How long a trim waits for an engine-routed summary (seconds).
    pub summarize_timeout_secs: u64,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 100,
            join_timeout_ms: 500,
            cleanup_max_age_secs: 3600,
            summarize_priority: 0,
            summarize_timeout_secs: 30,
        }
    }
}

impl TaskEngineConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    #[must_use]
    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_secs)
    }

    #[must_use]
    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_secs(self.summarize_timeout_secs)
    }
}

/// Tiered memory configuration.
///
/// Replaces the module-level `MAX_HISTORY` / threshold constants: the store
/// receives one of these at construction and never reads globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Directory holding `memory.json` and `long_term_memory.json`.
    pub root_dir: PathBuf,
    /// Short-term capacity enforced by trim.
    pub max_history: usize,
    /// Long-term capacity; oldest entries are dropped first.
    pub long_term_max: usize,
    /// Entries at or above this importance are migrated to long-term.
    pub high_threshold: u8,
    /// Entries at or below this importance are summarized away by trim.
    pub low_threshold: u8,
    /// Dimension of the default hashing embedder.
    pub embedding_dim: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            root_dir: crate::sage_dirs::memory_dir(),
            max_history: 50,
            long_term_max: 500,
            high_threshold: 4,
            low_threshold: 2,
            embedding_dim: 256,
        }
    }
}

impl MemoryConfig {
    /// Config rooted at `root_dir` with every other value at its default.
    #[must_use]
    pub fn with_root(root_dir: &Path) -> Self {
        Self {
            root_dir: root_dir.to_path_buf(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn short_term_path(&self) -> PathBuf {
        self.root_dir.join("memory.json")
    }

    #[must_use]
    pub fn long_term_path(&self) -> PathBuf {
        self.root_dir.join("long_term_memory.json")
    }

    /// Check threshold ordering and capacities.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.high_threshold) || !(1..=5).contains(&self.low_threshold) {
            return Err(SageError::Config(format!(
                "importance thresholds must be within 1..=5 (low={}, high={})",
                self.low_threshold, self.high_threshold
            )));
        }
        if self.low_threshold >= self.high_threshold {
            return Err(SageError::Config(format!(
                "low_threshold ({}) must be below high_threshold ({})",
                self.low_threshold, self.high_threshold
            )));
        }
        if self.max_history < 2 {
            return Err(SageError::Config(
                "max_history must leave room for at least one entry plus a summary".to_owned(),
            ));
        }
        if self.long_term_max == 0 {
            return Err(SageError::Config("long_term_max must be at least 1".to_owned()));
        }
        if self.embedding_dim == 0 {
            return Err(SageError::Config("embedding_dim must be at least 1".to_owned()));
        }
        Ok(())
    }
}

/// OpenAI-compatible chat endpoint configuration (LM Studio, Ollama, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL including `/v1`.
    pub api_url: String,
    /// Model identifier sent with each request.
    pub api_model: String,
    /// Bearer token; empty means no `Authorization` header.
    pub api_key: String,
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:1234/v1".to_owned(),
            api_model: "local-model".to_owned(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl SageConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SageError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SageError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`config_dir()/config.toml`).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::sage_dirs::config_file()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SageConfig::default();
        assert!(config.tasks.workers > 0);
        assert!(config.tasks.poll_interval_ms > 0);
        assert_eq!(config.memory.max_history, 50);
        assert_eq!(config.memory.long_term_max, 500);
        assert_eq!(config.memory.high_threshold, 4);
        assert_eq!(config.memory.low_threshold, 2);
        config.memory.validate().expect("defaults validate");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = SageConfig::default();
        config.tasks.workers = 2;
        config.memory.max_history = 20;
        config.llm.api_model = "qwen".to_owned();

        config.save_to_file(&path).unwrap();
        let loaded = SageConfig::from_file(&path).unwrap();
        assert_eq!(loaded.tasks.workers, 2);
        assert_eq!(loaded.memory.max_history, 20);
        assert_eq!(loaded.llm.api_model, "qwen");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: SageConfig = toml::from_str("[memory]\nmax_history = 10\n").unwrap();
        assert_eq!(config.memory.max_history, 10);
        assert_eq!(config.memory.long_term_max, 500);
        assert_eq!(config.tasks.join_timeout_ms, 500);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = SageConfig::from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            SageConfig::from_file(&path),
            Err(SageError::Config(_))
        ));
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let mut memory = MemoryConfig::default();
        memory.low_threshold = 4;
        memory.high_threshold = 3;
        assert!(memory.validate().is_err());

        memory.low_threshold = 0;
        memory.high_threshold = 4;
        assert!(memory.validate().is_err());
    }

    #[test]
    fn memory_paths_are_under_root() {
        let memory = MemoryConfig::with_root(Path::new("/tmp/sage-x"));
        assert_eq!(memory.short_term_path(), Path::new("/tmp/sage-x/memory.json"));
        assert_eq!(
            memory.long_term_path(),
            Path::new("/tmp/sage-x/long_term_memory.json")
        );
    }
}
