//! End-to-end pipeline regression tests.
//!
//! Exercises the engine with scripted research agents: dead-agent routing,
//! circuit breaker recovery, the pipeline deadline, backpressure, and
//! feedback propagation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use briefwire::agents::ResearchAgent;
use briefwire::analytics::AnalyticsWriter;
use briefwire::config::ConfigSet;
use briefwire::orchestration::CircuitState;
use briefwire::types::{CandidateItem, ResearchTask, StoryLifecycle, UrgencyLevel};
use briefwire::{Engine, EngineError};

/// A research agent with scripted behavior: can fail on demand, sleep to
/// simulate slow sources, and yields strong candidates otherwise.
struct ScriptedAgent {
    id: String,
    source: String,
    failing: Arc<AtomicBool>,
    delay: Duration,
    yield_count: usize,
}

impl ScriptedAgent {
    fn healthy(id: &str, source: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            source: source.to_string(),
            failing: Arc::new(AtomicBool::new(false)),
            delay: Duration::ZERO,
            yield_count: 3,
        })
    }

    fn switchable(id: &str, source: &str) -> (Arc<Self>, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(false));
        let agent = Arc::new(Self {
            id: id.to_string(),
            source: source.to_string(),
            failing: failing.clone(),
            delay: Duration::ZERO,
            yield_count: 3,
        });
        (agent, failing)
    }

    fn slow(id: &str, source: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            source: source.to_string(),
            failing: Arc::new(AtomicBool::new(false)),
            delay,
            yield_count: 3,
        })
    }
}

#[async_trait]
impl ResearchAgent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn source(&self) -> &str {
        &self.source
    }

    async fn search(&self, task: &ResearchTask, top_k: usize) -> anyhow::Result<Vec<CandidateItem>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("scripted failure");
        }
        let topic = task
            .weighted_topics
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(t, _)| t.clone())
            .unwrap_or_else(|| "tech".to_string());
        Ok((0..self.yield_count.min(top_k))
            .map(|i| CandidateItem {
                candidate_id: format!("{}-{i}", self.id),
                title: format!("{} exclusive {i} on {topic} policy shift", self.source),
                source: self.source.clone(),
                summary: format!("Detailed reporting {i} from {}.", self.source),
                url: format!("https://{}.newsdesk.test/{i}", self.source),
                topic: topic.clone(),
                evidence_score: 0.9,
                novelty_score: 0.85,
                preference_fit: 0.9,
                prediction_signal: 0.8,
                discovered_by: self.id.clone(),
                created_at: Utc::now(),
                lifecycle: StoryLifecycle::Developing,
                urgency: UrgencyLevel::Routine,
                regions: Vec::new(),
                corroborated_by: Vec::new(),
                contrarian_signal: String::new(),
            })
            .collect())
    }
}

fn engine_with_agents(agents: Vec<Arc<dyn ResearchAgent>>) -> Engine {
    let mut configs = ConfigSet::builtin();
    configs.pipeline.engine.semaphore_wait_ms = 50;
    Engine::new(configs, AnalyticsWriter::disabled()).with_research_agents(agents)
}

fn tech_topics() -> HashMap<String, f64> {
    HashMap::from([("tech".to_string(), 0.9)])
}

#[tokio::test]
async fn dead_agent_is_routed_around() {
    let agent_a = ScriptedAgent::healthy("agent_a", "reuters");
    let (agent_b, b_failing) = ScriptedAgent::switchable("agent_b", "bbc");
    let agent_c = ScriptedAgent::healthy("agent_c", "ft");
    b_failing.store(true, Ordering::SeqCst);

    let engine = engine_with_agents(vec![agent_a, agent_b, agent_c]);
    let payload = engine
        .handle_request_payload("u1", "", tech_topics(), Some(10))
        .await
        .unwrap();

    assert!(!payload.items.is_empty());
    let sources: Vec<&str> = payload
        .items
        .iter()
        .map(|i| i.candidate.source.as_str())
        .collect();
    assert!(sources.contains(&"reuters"));
    assert!(sources.contains(&"ft"));
    assert!(!sources.contains(&"bbc"));

    let health = &payload.metadata.pipeline_health;
    assert_eq!(health.agents_total, 3);
    assert_eq!(health.agents_contributing, 2);
    assert_eq!(health.agents_failed, vec!["agent_b".to_string()]);

    assert_eq!(
        engine.optimizer.circuit_breaker.consecutive_failures("agent_b"),
        1
    );
}

#[tokio::test]
async fn circuit_breaker_trips_skips_and_recovers() {
    let (agent_x, x_failing) = ScriptedAgent::switchable("agent_x", "reuters");
    x_failing.store(true, Ordering::SeqCst);

    let mut configs = ConfigSet::builtin();
    configs.pipeline.optimizer.circuit_failure_threshold = 2;
    configs.pipeline.optimizer.circuit_recovery_seconds = 0.3;
    let engine = Engine::new(configs, AnalyticsWriter::disabled())
        .with_research_agents(vec![agent_x]);

    // Two failing requests trip the breaker.
    for _ in 0..2 {
        let _ = engine
            .handle_request_payload("u1", "", tech_topics(), Some(5))
            .await
            .unwrap();
    }
    assert_eq!(
        engine.optimizer.circuit_breaker.state("agent_x"),
        CircuitState::Open
    );

    // While OPEN the agent is skipped entirely: no new failures recorded.
    let payload = engine
        .handle_request_payload("u1", "", tech_topics(), Some(5))
        .await
        .unwrap();
    assert!(payload.metadata.pipeline_health.agents_failed.is_empty());
    assert_eq!(
        engine.optimizer.circuit_breaker.consecutive_failures("agent_x"),
        2
    );

    // Recovery window passes; agent is healthy again — probe succeeds.
    tokio::time::sleep(Duration::from_millis(400)).await;
    x_failing.store(false, Ordering::SeqCst);
    let payload = engine
        .handle_request_payload("u1", "", tech_topics(), Some(5))
        .await
        .unwrap();
    assert!(!payload.items.is_empty());
    assert_eq!(
        engine.optimizer.circuit_breaker.state("agent_x"),
        CircuitState::Closed
    );
    assert_eq!(
        engine.optimizer.circuit_breaker.consecutive_failures("agent_x"),
        0
    );

    // A single fresh failure does not re-open the breaker.
    x_failing.store(true, Ordering::SeqCst);
    let _ = engine
        .handle_request_payload("u1", "", tech_topics(), Some(5))
        .await
        .unwrap();
    assert_eq!(
        engine.optimizer.circuit_breaker.state("agent_x"),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn pipeline_deadline_fires_with_no_partial_payload() {
    let slow = ScriptedAgent::slow("agent_slow", "reuters", Duration::from_secs(5));

    let mut configs = ConfigSet::builtin();
    configs.pipeline.engine.pipeline_timeout_seconds = 1;
    configs.pipeline.engine.per_agent_timeout_secs = 30;
    let engine = Engine::new(configs, AnalyticsWriter::disabled())
        .with_research_agents(vec![slow]);

    let result = engine
        .handle_request_payload("u1", "", tech_topics(), Some(5))
        .await;

    let err = result.err().expect("deadline must produce an error, not a payload");
    assert!(matches!(err, EngineError::Timeout(1)));
    assert!(err.to_string().contains("1s"));
}

#[tokio::test]
async fn backpressure_rejects_when_slots_exhausted() {
    let slow = ScriptedAgent::slow("agent_slow", "reuters", Duration::from_secs(2));

    let mut configs = ConfigSet::builtin();
    configs.pipeline.engine.max_concurrent_requests = 1;
    configs.pipeline.engine.semaphore_wait_ms = 50;
    configs.pipeline.engine.per_agent_timeout_secs = 30;
    let engine = Arc::new(
        Engine::new(configs, AnalyticsWriter::disabled()).with_research_agents(vec![slow]),
    );

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .handle_request_payload("u1", "", tech_topics(), Some(5))
                .await
        })
    };
    // Let the first request take the only slot.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = engine
        .handle_request_payload("u2", "", tech_topics(), Some(5))
        .await;
    assert!(matches!(second, Err(EngineError::Busy)));

    let first = first.await.unwrap();
    assert!(first.is_ok());
}

#[tokio::test]
async fn feedback_updates_propagate_to_next_briefing() {
    let agent = ScriptedAgent::healthy("agent_a", "reuters");
    let engine = engine_with_agents(vec![agent]);

    let version_before = engine.preferences.get_or_create("u1").version;
    let changes = engine.apply_user_feedback("u1", "more geopolitics, less crypto");

    assert_eq!(changes.get("topic:geopolitics"), Some(&"0.2".to_string()));
    assert_eq!(changes.get("topic:crypto"), Some(&"-0.2".to_string()));

    let profile = engine.preferences.get_or_create("u1");
    assert_eq!(profile.version, version_before + 2);

    // Applying the same feedback twice stacks the deltas.
    engine.apply_user_feedback("u1", "more geopolitics, less crypto");
    let profile = engine.preferences.get_or_create("u1");
    assert!((profile.topic_weights["geopolitics"] - 0.4).abs() < 1e-9);
    assert!((profile.topic_weights["crypto"] + 0.4).abs() < 1e-9);

    // Next briefing with no explicit topics uses the learned weights:
    // geopolitics now dominates, crypto is negative.
    let payload = engine
        .handle_request_payload("u1", "", HashMap::new(), Some(5))
        .await
        .unwrap();
    assert!(!payload.items.is_empty());
    assert!(payload.items.iter().all(|i| i.candidate.topic == "geopolitics"));
}

#[tokio::test]
async fn report_items_satisfy_invariants() {
    let agent_a = ScriptedAgent::healthy("agent_a", "reuters");
    let agent_b = ScriptedAgent::healthy("agent_b", "bbc");
    let engine = engine_with_agents(vec![agent_a, agent_b]);

    let payload = engine
        .handle_request_payload("u1", "tech briefing", tech_topics(), Some(10))
        .await
        .unwrap();

    assert!(!payload.items.is_empty());
    for item in &payload.items {
        // Analysis text never duplicates the feed summary.
        assert_ne!(item.why_it_matters, item.candidate.summary);
        // Confidence bands are ordered and bounded.
        let band = item.confidence.as_ref().unwrap();
        assert!(band.low <= band.mid && band.mid <= band.high && band.high <= 1.0);
        // Scores all valid after the pipeline.
        for score in [
            item.candidate.evidence_score,
            item.candidate.novelty_score,
            item.candidate.preference_fit,
            item.candidate.prediction_signal,
        ] {
            assert!(score.is_finite() && (0.0..=1.0).contains(&score));
        }
    }

    // Items ranked by composite score.
    for pair in payload.items.windows(2) {
        assert!(pair[0].candidate.composite_score() >= pair[1].candidate.composite_score() - 1e-9);
    }
}

#[tokio::test]
async fn muted_topics_are_filtered() {
    let agent = ScriptedAgent::healthy("agent_a", "reuters");
    let engine = engine_with_agents(vec![agent]);
    engine.preferences.mute_topic("u1", "tech");

    let payload = engine
        .handle_request_payload("u1", "", tech_topics(), Some(10))
        .await
        .unwrap();
    assert!(payload.items.is_empty());
}
