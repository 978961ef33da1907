//! Tiering, trimming, and persistence of the memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration as ChronoDuration, Utc};
use sage::config::{MemoryConfig, TaskEngineConfig};
use sage::memory::{
    Collaborators, EngineSummarizer, Embedder, HashingEmbedder, Interaction, MemoryEntry,
    MemoryLog, MemoryStore, OfflineClassifier, Role, SUMMARY_PREFIX, SearchQuery,
};
use sage::scheduler::TaskEngine;
use std::path::Path;
use std::sync::Arc;

fn entry(i: i64, importance: u8) -> MemoryEntry {
    let mut entry = MemoryEntry::new(Role::User, format!("message {i} (importance {importance})"), importance);
    entry.timestamp = Utc::now() - ChronoDuration::seconds(1000 - i);
    entry
}

fn write_short_term(root: &Path, entries: Vec<MemoryEntry>) {
    let log = MemoryLog { log: entries };
    std::fs::write(
        root.join("memory.json"),
        serde_json::to_string_pretty(&log).unwrap(),
    )
    .unwrap();
}

/// 60 entries: 5 high, 10 low, 45 medium, interleaved.
fn sixty_entries() -> Vec<MemoryEntry> {
    (0..60)
        .map(|i| {
            let importance = match i {
                i if i % 12 == 0 => 5,
                i if i % 6 == 3 => 1,
                _ => 3,
            };
            entry(i, importance)
        })
        .collect()
}

#[test]
fn sixty_entry_trim_keeps_cap_and_high_entries() {
    let dir = tempfile::tempdir().unwrap();
    let entries = sixty_entries();
    let high: Vec<MemoryEntry> = entries.iter().filter(|e| e.importance >= 4).cloned().collect();
    assert_eq!(high.len(), 5);
    assert_eq!(entries.iter().filter(|e| e.importance <= 2).count(), 10);
    write_short_term(dir.path(), entries);

    let store = MemoryStore::open(MemoryConfig::with_root(dir.path()), Collaborators::offline(64)).unwrap();
    assert_eq!(store.len(), 60);
    let report = store.trim().unwrap();

    let short = store.entries();
    assert!(short.len() <= 50);
    assert_eq!(report.kept, short.len());
    assert_eq!(report.evicted_high, 0);
    assert_eq!(report.summarized_low, 10);

    let summaries: Vec<&MemoryEntry> = short
        .iter()
        .filter(|e| e.message.starts_with(SUMMARY_PREFIX))
        .collect();
    assert_eq!(summaries.len(), 1);
    assert!(short[0].message.starts_with(SUMMARY_PREFIX));
    assert_eq!(short[0].role, Role::System);
    assert_eq!(short[0].importance, 1);

    let long = store.long_term_entries();
    for h in &high {
        assert_eq!(long.iter().filter(|e| e.same_memory(h)).count(), 1);
        assert!(short.iter().any(|e| e.same_memory(h)), "high entry dropped from short-term");
    }
    assert!(short.iter().all(|e| e.importance > 2 || e.message.starts_with(SUMMARY_PREFIX)));

    // Survivors stay in chronological order.
    assert!(short[1..].windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn logging_past_capacity_stays_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MemoryConfig::with_root(dir.path());
    config.max_history = 10;
    let store = MemoryStore::open(config, Collaborators::offline(32)).unwrap();

    for i in 0..40u8 {
        let importance = [1, 3, 3, 5][usize::from(i % 4)];
        store
            .log_interaction(Interaction::new(Role::User, format!("turn {i}")).with_importance(importance))
            .unwrap();
        assert!(store.len() <= 10);
    }
    store.trim().unwrap();
    assert!(store.len() <= 10);
    let long = store.long_term_entries();
    assert_eq!(long.len(), 10);
    assert!(long.iter().all(|e| e.importance == 5));
}

#[test]
fn log_interaction_appends_one_persisted_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(MemoryConfig::with_root(dir.path()), Collaborators::offline(32)).unwrap();
    let entry = store.log_interaction(Interaction::new(Role::User, "hello")).unwrap();
    assert!((1..=5).contains(&entry.importance));
    assert_eq!(store.len(), 1);

    let on_disk: MemoryLog =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("memory.json")).unwrap()).unwrap();
    assert_eq!(on_disk.log, vec![entry]);
}

#[test]
fn search_filters_by_text_and_role() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(MemoryConfig::with_root(dir.path()), Collaborators::offline(32)).unwrap();
    for (role, message) in [
        (Role::User, "Hello there"),
        (Role::Assistant, "hello! nice to meet you"),
        (Role::User, "say HELLO to mum"),
        (Role::User, "goodbye"),
    ] {
        store.log_interaction(Interaction::new(role, message)).unwrap();
    }

    let hits = store.search(&SearchQuery::text("hello").with_role(Role::User));
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|e| e.role == Role::User && e.message.to_lowercase().contains("hello")));
}

#[test]
fn persist_then_reload_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig::with_root(dir.path());
    let embedder = Arc::new(HashingEmbedder::new(48).unwrap());
    let collaborators = Collaborators::offline(48).with_embedder(embedder.clone());

    let store = MemoryStore::open(config.clone(), collaborators.clone()).unwrap();
    for (i, message) in ["I adopted a cat", "work was stressful", "we watched a film"].iter().enumerate() {
        store
            .log_interaction(
                Interaction::new(Role::User, *message)
                    .with_importance(if i == 0 { 5 } else { 3 })
                    .with_tags(["diary"]),
            )
            .unwrap();
    }
    store.trim().unwrap();
    let before = store.entries();
    let long_before = store.long_term_entries();
    drop(store);

    let reloaded = MemoryStore::open(config, collaborators).unwrap();
    assert_eq!(reloaded.entries(), before);
    assert_eq!(reloaded.long_term_entries(), long_before);
    for entry in reloaded.entries() {
        assert_eq!(entry.embedding, Some(embedder.embed(&entry.message).unwrap()));
    }
}

#[test]
fn legacy_log_without_embeddings_is_backfilled() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("memory.json"),
        r#"{
    "log": [
        {"timestamp": "2024-01-01T09:00:00.000001", "role": "user", "message": "planting tomatoes in the garden", "importance": 3},
        {"timestamp": "2024-01-01T09:00:05", "role": "sage", "message": "Tomatoes love sun.", "importance": 2, "tags": ["garden"]}
    ]
}"#,
    )
    .unwrap();

    let store = MemoryStore::open(MemoryConfig::with_root(dir.path()), Collaborators::offline(64)).unwrap();
    assert_eq!(store.entries()[1].role, Role::Assistant);
    let hits = store.semantic_search("tomatoes garden", 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score >= hits[1].score);

    let reloaded = MemoryStore::open(MemoryConfig::with_root(dir.path()), Collaborators::offline(64)).unwrap();
    assert!(reloaded.entries().iter().all(|e| e.embedding.is_some()));
}

#[test]
fn trim_summary_through_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(TaskEngine::new(TaskEngineConfig {
        workers: 1,
        poll_interval_ms: 10,
        ..TaskEngineConfig::default()
    }));
    engine.start().unwrap();

    let summarizer = EngineSummarizer::new(
        Arc::clone(&engine),
        Arc::new(OfflineClassifier),
        &TaskEngineConfig::default(),
    );
    let collaborators = Collaborators::offline(32).with_summarizer(Arc::new(summarizer));
    let store = MemoryStore::open(MemoryConfig::with_root(dir.path()), collaborators).unwrap();
    store
        .log_interaction(Interaction::new(Role::User, "nice weather").with_importance(1))
        .unwrap();
    store
        .log_interaction(Interaction::new(Role::Assistant, "indeed").with_importance(2))
        .unwrap();

    let report = store.trim().unwrap();
    assert!(report.summary_added);
    assert_eq!(
        store.entries()[0].message,
        format!("{SUMMARY_PREFIX}User: nice weather | Assistant: indeed")
    );
    assert_eq!(engine.all_tasks().len(), 1);
    engine.stop();
}
