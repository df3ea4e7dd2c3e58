//! Configuration loading and validation against realistic JSON files.

use briefwire::config::ConfigSet;

fn write(dir: &std::path::Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).unwrap();
}

#[test]
fn full_config_set_loads() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "pipelines.json",
        r#"{
            "version": "2.3",
            "scoring": {
                "composite_weights": {
                    "evidence": 0.35, "novelty": 0.20,
                    "preference_fit": 0.30, "prediction_signal": 0.15
                }
            },
            "limits": {"default_max_items": 8},
            "intelligence": {
                "enabled_stages": ["credibility", "urgency", "clustering"],
                "breaking_source_threshold": 4
            },
            "engine": {"max_concurrent_requests": 2, "pipeline_timeout_seconds": 60},
            "api_keys": {"anthropic_api_key": ""}
        }"#,
    );
    write(
        dir.path(),
        "agents.json",
        r#"{
            "research_agents": [
                {"id": "agent_reuters", "source": "reuters", "topics": ["geopolitics"]},
                {"id": "agent_custom", "source": "myfeed", "kind": "feed",
                 "endpoint": "https://feed.example.org/v1/items", "enabled": false}
            ],
            "expert_agents": [
                {"id": "expert_quality_agent"},
                {"id": "expert_relevance_agent"},
                {"id": "expert_preference_fit_agent"}
            ]
        }"#,
    );
    write(
        dir.path(),
        "personas.json",
        r#"{
            "default_personas": ["intel_analyst"],
            "persona_notes": {"intel_analyst": "Measured, evidence-first framing."}
        }"#,
    );

    let configs = ConfigSet::load_dir(dir.path()).unwrap();
    assert_eq!(configs.pipeline.version, "2.3");
    assert_eq!(configs.pipeline.limits.default_max_items, 8);
    assert_eq!(configs.pipeline.engine.max_concurrent_requests, 2);
    assert!(configs.pipeline.stage_enabled("clustering"));
    assert!(!configs.pipeline.stage_enabled("georisk"));
    assert_eq!(configs.agents.research_agents.len(), 2);
    assert!(!configs.agents.research_agents[1].enabled);
    assert_eq!(configs.agents.expert_agents.len(), 3);
    assert_eq!(configs.personas.default_personas, vec!["intel_analyst"]);
}

#[test]
fn composite_weights_must_sum_to_one() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "pipelines.json",
        r#"{"scoring": {"composite_weights": {
            "evidence": 0.50, "novelty": 0.30,
            "preference_fit": 0.30, "prediction_signal": 0.15
        }}}"#,
    );
    let err = ConfigSet::load_dir(dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("validation"));
}

#[test]
fn malformed_json_is_a_hard_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pipelines.json", "{not json");
    assert!(ConfigSet::load_dir(dir.path()).is_err());
}

#[test]
fn absent_files_fall_back_to_builtin_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let configs = ConfigSet::load_dir(dir.path()).unwrap();
    assert_eq!(configs.pipeline.engine.max_concurrent_requests, 4);
    assert_eq!(configs.pipeline.engine.pipeline_timeout_seconds, 120);
    assert!(!configs.agents.research_agents.is_empty());
}
