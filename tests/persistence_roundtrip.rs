//! State persistence round-trip tests: what the engine saves, a fresh
//! engine restores — with validation applied to everything read back.

use std::collections::HashMap;

use briefwire::analytics::AnalyticsWriter;
use briefwire::config::ConfigSet;
use briefwire::Engine;

fn configs_with_state_dir(dir: &std::path::Path) -> ConfigSet {
    let mut configs = ConfigSet::builtin();
    configs.pipeline.persistence.enabled = true;
    configs.pipeline.persistence.state_dir = dir.to_string_lossy().into_owned();
    configs
}

#[tokio::test]
async fn preferences_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let engine = Engine::new(configs_with_state_dir(dir.path()), AnalyticsWriter::disabled());
        engine.apply_user_feedback("alice", "more geopolitics, tone: analyst");
        engine.save_state();
    }

    let engine = Engine::new(configs_with_state_dir(dir.path()), AnalyticsWriter::disabled());
    let profile = engine.preferences.get_or_create("alice");
    assert!((profile.topic_weights["geopolitics"] - 0.2).abs() < 1e-9);
    assert_eq!(profile.tone, "analyst");
}

#[tokio::test]
async fn corrupt_preference_entries_are_repaired_on_restore() {
    let dir = tempfile::tempdir().unwrap();

    // A snapshot with an oversized tracked list and a garbage float, as an
    // older or buggy build might have written it.
    let tracked: Vec<serde_json::Value> = (0..1000)
        .map(|i| {
            serde_json::json!({
                "topic": format!("t{i}"),
                "keywords": ["alpha", "beta"],
                "headline": format!("Headline {i}"),
                "tracked_at": 0.0,
            })
        })
        .collect();
    let snapshot = serde_json::json!({
        "alice": {
            "user_id": "alice",
            "tracked_stories": tracked,
            "confidence_min": "nan",
            "topic_weights": {"markets": 0.5},
        }
    });
    std::fs::write(
        dir.path().join("preferences.json"),
        serde_json::to_vec_pretty(&snapshot).unwrap(),
    )
    .unwrap();

    let engine = Engine::new(configs_with_state_dir(dir.path()), AnalyticsWriter::disabled());
    let profile = engine.preferences.get_or_create("alice");
    assert_eq!(profile.tracked_stories.len(), 20);
    assert_eq!(profile.confidence_min, 0.0);
    assert!((profile.topic_weights["markets"] - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn unreadable_profile_is_discarded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = serde_json::json!({
        "good": {"user_id": "good", "tone": "analyst"},
        "bad": "this is not a profile object",
    });
    std::fs::write(
        dir.path().join("preferences.json"),
        serde_json::to_vec(&snapshot).unwrap(),
    )
    .unwrap();

    let engine = Engine::new(configs_with_state_dir(dir.path()), AnalyticsWriter::disabled());
    assert_eq!(engine.preferences.get_or_create("good").tone, "analyst");
    // "bad" comes back as a fresh default profile.
    assert_eq!(engine.preferences.get_or_create("bad").tone, "concise");
}

#[tokio::test]
async fn corrupt_state_files_never_block_startup() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["preferences", "credibility", "georisk", "trends", "optimizer", "debate_chair"] {
        std::fs::write(dir.path().join(format!("{name}.json")), "{broken json!").unwrap();
    }

    // Startup succeeds with defaults everywhere.
    let engine = Engine::new(configs_with_state_dir(dir.path()), AnalyticsWriter::disabled());
    assert_eq!(engine.preferences.get_or_create("anyone").version, 0);
}

#[tokio::test]
async fn credibility_and_trends_roundtrip() {
    let dir = tempfile::tempdir().unwrap();

    {
        let engine = Engine::new(configs_with_state_dir(dir.path()), AnalyticsWriter::disabled());
        engine.credibility.record_corroboration("reuters", "bbc");
        engine.save_state();
    }

    let engine = Engine::new(configs_with_state_dir(dir.path()), AnalyticsWriter::disabled());
    let reuters = engine.credibility.get_source("reuters");
    assert!(reuters.corroboration_rate > 0.5);

    let snapshot: HashMap<String, serde_json::Value> = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("credibility.json")).unwrap(),
    )
    .unwrap();
    assert!(snapshot.contains_key("reuters"));
    assert!(snapshot.contains_key("bbc"));
}
