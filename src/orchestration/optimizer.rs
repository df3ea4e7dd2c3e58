//! System optimizer — pipeline health tracking and self-tuning.
//!
//! Tracks per-agent performance (latency, yield, keep rate, errors,
//! zero-yield streaks) and per-stage health, generates tuning
//! recommendations, and runs the per-agent circuit breaker that keeps
//! persistently failing agents from burning latency budget every request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::OptimizerConfig;

/// Minimum runs before an agent's metrics are judged.
const MIN_RUNS_FOR_ANALYSIS: u64 = 3;
/// Consecutive zero-yield runs before flagging a silently broken source.
const ZERO_YIELD_STREAK_THRESHOLD: u64 = 5;

/// Performance counters for a single research agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetric {
    pub agent_id: String,
    pub source: String,
    pub total_runs: u64,
    pub total_candidates: u64,
    pub total_selected: u64,
    pub total_latency_ms: f64,
    pub error_count: u64,
    pub zero_yield_streak: u64,
    pub total_zero_yields: u64,
}

impl AgentMetric {
    pub fn avg_latency_ms(&self) -> f64 {
        self.total_latency_ms / self.total_runs.max(1) as f64
    }

    pub fn avg_yield(&self) -> f64 {
        self.total_candidates as f64 / self.total_runs.max(1) as f64
    }

    pub fn keep_rate(&self) -> f64 {
        self.total_selected as f64 / self.total_candidates.max(1) as f64
    }

    pub fn error_rate(&self) -> f64 {
        self.error_count as f64 / self.total_runs.max(1) as f64
    }
}

/// Health counters for a pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetric {
    pub stage_name: String,
    pub total_runs: u64,
    pub total_latency_ms: f64,
    pub failure_count: u64,
}

impl StageMetric {
    pub fn avg_latency_ms(&self) -> f64 {
        self.total_latency_ms / self.total_runs.max(1) as f64
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_count as f64 / self.total_runs.max(1) as f64
    }
}

/// A recommendation from the optimizer.
#[derive(Debug, Clone, Serialize)]
pub struct TuningRecommendation {
    pub agent_id: String,
    /// "disable", "reduce_weight", or "investigate".
    pub action: String,
    pub reason: String,
    /// "low", "medium", or "high".
    pub severity: String,
}

// ============================================================================
// Circuit breaker
// ============================================================================

/// Per-agent circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
        }
    }
}

/// Per-agent circuit breaker with automatic recovery.
///
/// CLOSED: agent runs every request. OPEN: skipped, entered after
/// `failure_threshold` consecutive failures. After `recovery_seconds` the
/// breaker moves to HALF_OPEN and admits one probe; success returns to
/// CLOSED with the consecutive-failure counter reset to zero, failure
/// re-opens.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_seconds: f64,
    breakers: Mutex<HashMap<String, BreakerEntry>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_seconds: f64) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_seconds,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the agent should run this cycle. OPEN breakers transition to
    /// HALF_OPEN once the recovery window has elapsed.
    pub fn allow_request(&self, agent_id: &str) -> bool {
        let mut breakers = lock_breakers(&self.breakers);
        let entry = breakers.entry(agent_id.to_string()).or_default();
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = entry
                    .last_failure
                    .is_some_and(|t| t.elapsed().as_secs_f64() >= self.recovery_seconds);
                if recovered {
                    entry.state = CircuitState::HalfOpen;
                    tracing::debug!(agent_id, "Circuit breaker HALF_OPEN (probing)");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful run — return to CLOSED and reset the
    /// consecutive-failure counter so the next trip requires a full run of
    /// fresh failures.
    pub fn record_success(&self, agent_id: &str) {
        let mut breakers = lock_breakers(&self.breakers);
        let entry = breakers.entry(agent_id.to_string()).or_default();
        if entry.state != CircuitState::Closed {
            tracing::info!(agent_id, "Circuit breaker CLOSED (recovered)");
        }
        *entry = BreakerEntry::default();
    }

    /// Record a failure — may trip to OPEN. Only consecutive failures since
    /// the last success count.
    pub fn record_failure(&self, agent_id: &str) {
        let mut breakers = lock_breakers(&self.breakers);
        let entry = breakers.entry(agent_id.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.last_failure = Some(Instant::now());
        if entry.consecutive_failures >= self.failure_threshold {
            if entry.state != CircuitState::Open {
                tracing::warn!(
                    agent_id,
                    failures = entry.consecutive_failures,
                    "Circuit breaker OPEN"
                );
            }
            entry.state = CircuitState::Open;
        }
    }

    pub fn state(&self, agent_id: &str) -> CircuitState {
        lock_breakers(&self.breakers)
            .get(agent_id)
            .map_or(CircuitState::Closed, |e| e.state)
    }

    pub fn consecutive_failures(&self, agent_id: &str) -> u32 {
        lock_breakers(&self.breakers)
            .get(agent_id)
            .map_or(0, |e| e.consecutive_failures)
    }

    /// Non-closed breaker states for reporting.
    pub fn snapshot(&self) -> HashMap<String, (CircuitState, u32)> {
        lock_breakers(&self.breakers)
            .iter()
            .filter(|(_, e)| e.state != CircuitState::Closed || e.consecutive_failures > 0)
            .map(|(id, e)| (id.clone(), (e.state, e.consecutive_failures)))
            .collect()
    }
}

fn lock_breakers(
    m: &Mutex<HashMap<String, BreakerEntry>>,
) -> std::sync::MutexGuard<'_, HashMap<String, BreakerEntry>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// System optimizer
// ============================================================================

#[derive(Debug, Default)]
struct OptimizerState {
    agents: HashMap<String, AgentMetric>,
    stages: HashMap<String, StageMetric>,
    disabled_agents: Vec<String>,
    weight_overrides: HashMap<String, f64>,
}

/// Compact snapshot for persistence (`optimizer.json`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OptimizerSnapshot {
    pub disabled: Vec<String>,
    pub weights: HashMap<String, f64>,
    pub agent_stats: HashMap<String, AgentMetric>,
}

pub struct SystemOptimizer {
    cfg: OptimizerConfig,
    state: Mutex<OptimizerState>,
    pub circuit_breaker: CircuitBreaker,
}

impl SystemOptimizer {
    pub fn new(cfg: OptimizerConfig) -> Self {
        let circuit_breaker =
            CircuitBreaker::new(cfg.circuit_failure_threshold, cfg.circuit_recovery_seconds);
        Self {
            cfg,
            state: Mutex::new(OptimizerState::default()),
            circuit_breaker,
        }
    }

    /// Record a single agent research run.
    pub fn record_agent_run(
        &self,
        agent_id: &str,
        source: &str,
        candidate_count: usize,
        latency_ms: f64,
        error: bool,
    ) {
        let mut state = lock_state(&self.state);
        let m = state
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentMetric {
                agent_id: agent_id.to_string(),
                source: source.to_string(),
                ..AgentMetric::default()
            });
        m.total_runs += 1;
        m.total_candidates += candidate_count as u64;
        m.total_latency_ms += latency_ms;
        if error {
            m.error_count += 1;
        }
        // Zero-yield: the agent ran clean but produced nothing.
        if candidate_count == 0 && !error {
            m.zero_yield_streak += 1;
            m.total_zero_yields += 1;
        } else {
            m.zero_yield_streak = 0;
        }
    }

    /// Record how many of an agent's candidates survived expert selection.
    pub fn record_agent_selection(&self, agent_id: &str, selected_count: usize) {
        let mut state = lock_state(&self.state);
        if let Some(m) = state.agents.get_mut(agent_id) {
            m.total_selected += selected_count as u64;
        }
    }

    pub fn record_stage_run(&self, stage_name: &str, latency_ms: f64, failed: bool) {
        let mut state = lock_state(&self.state);
        let m = state
            .stages
            .entry(stage_name.to_string())
            .or_insert_with(|| StageMetric {
                stage_name: stage_name.to_string(),
                ..StageMetric::default()
            });
        m.total_runs += 1;
        m.total_latency_ms += latency_ms;
        if failed {
            m.failure_count += 1;
        }
    }

    /// Analyze all metrics and generate tuning recommendations.
    pub fn analyze(&self) -> Vec<TuningRecommendation> {
        let state = lock_state(&self.state);
        let mut recommendations = Vec::new();

        for (agent_id, m) in &state.agents {
            if m.total_runs < MIN_RUNS_FOR_ANALYSIS {
                continue;
            }

            if m.error_rate() > self.cfg.error_rate_threshold {
                recommendations.push(TuningRecommendation {
                    agent_id: agent_id.clone(),
                    action: "investigate".to_string(),
                    reason: format!(
                        "Error rate {:.0}% exceeds threshold ({:.0}%)",
                        m.error_rate() * 100.0,
                        self.cfg.error_rate_threshold * 100.0
                    ),
                    severity: if m.error_rate() > 0.5 { "high" } else { "medium" }.to_string(),
                });
            }

            if m.avg_yield() < self.cfg.min_yield_threshold {
                recommendations.push(TuningRecommendation {
                    agent_id: agent_id.clone(),
                    action: "investigate".to_string(),
                    reason: format!(
                        "Average yield {:.1} below minimum ({:.1})",
                        m.avg_yield(),
                        self.cfg.min_yield_threshold
                    ),
                    severity: "medium".to_string(),
                });
            }

            if m.total_candidates > 10 && m.keep_rate() < self.cfg.keep_rate_threshold {
                recommendations.push(TuningRecommendation {
                    agent_id: agent_id.clone(),
                    action: "reduce_weight".to_string(),
                    reason: format!(
                        "Keep rate {:.0}% — experts consistently rejecting this agent's candidates",
                        m.keep_rate() * 100.0
                    ),
                    severity: "medium".to_string(),
                });
            }

            if m.avg_latency_ms() > self.cfg.latency_threshold_ms {
                recommendations.push(TuningRecommendation {
                    agent_id: agent_id.clone(),
                    action: "investigate".to_string(),
                    reason: format!(
                        "Average latency {:.0}ms exceeds threshold ({:.0}ms)",
                        m.avg_latency_ms(),
                        self.cfg.latency_threshold_ms
                    ),
                    severity: "low".to_string(),
                });
            }

            if m.zero_yield_streak >= ZERO_YIELD_STREAK_THRESHOLD {
                recommendations.push(TuningRecommendation {
                    agent_id: agent_id.clone(),
                    action: "investigate".to_string(),
                    reason: format!(
                        "Agent has returned 0 candidates for {} consecutive runs without error — source may be silently broken",
                        m.zero_yield_streak
                    ),
                    severity: "high".to_string(),
                });
            }
        }

        for (stage_name, m) in &state.stages {
            if m.total_runs >= MIN_RUNS_FOR_ANALYSIS
                && m.failure_rate() > self.cfg.error_rate_threshold
            {
                recommendations.push(TuningRecommendation {
                    agent_id: format!("stage:{stage_name}"),
                    action: "investigate".to_string(),
                    reason: format!(
                        "Pipeline stage '{stage_name}' failure rate {:.0}%",
                        m.failure_rate() * 100.0
                    ),
                    severity: "high".to_string(),
                });
            }
        }

        recommendations
    }

    /// Apply recommendations. Returns descriptions of actions taken.
    pub fn apply_recommendations(&self) -> Vec<String> {
        let recommendations = self.analyze();
        let mut state = lock_state(&self.state);
        let mut actions = Vec::new();

        for rec in recommendations {
            if rec.severity == "high"
                && rec.action == "investigate"
                && self.cfg.auto_disable
                && !rec.agent_id.starts_with("stage:")
                && !state.disabled_agents.contains(&rec.agent_id)
            {
                state.disabled_agents.push(rec.agent_id.clone());
                actions.push(format!("Disabled {}: {}", rec.agent_id, rec.reason));
            }

            if rec.action == "reduce_weight" {
                let current = state
                    .weight_overrides
                    .get(&rec.agent_id)
                    .copied()
                    .unwrap_or(1.0);
                let reduced = (current * 0.7).max(0.1);
                state.weight_overrides.insert(rec.agent_id.clone(), reduced);
                actions.push(format!("Reduced weight for {} to {reduced:.2}", rec.agent_id));
            }
        }

        if !actions.is_empty() {
            tracing::info!(count = actions.len(), actions = ?actions, "Optimization actions applied");
        }
        actions
    }

    pub fn is_agent_disabled(&self, agent_id: &str) -> bool {
        lock_state(&self.state)
            .disabled_agents
            .iter()
            .any(|a| a == agent_id)
    }

    pub fn weight_override(&self, agent_id: &str) -> f64 {
        lock_state(&self.state)
            .weight_overrides
            .get(agent_id)
            .copied()
            .unwrap_or(1.0)
    }

    pub fn agent_metric(&self, agent_id: &str) -> Option<AgentMetric> {
        lock_state(&self.state).agents.get(agent_id).cloned()
    }

    pub fn snapshot(&self) -> OptimizerSnapshot {
        let state = lock_state(&self.state);
        OptimizerSnapshot {
            disabled: state.disabled_agents.clone(),
            weights: state.weight_overrides.clone(),
            agent_stats: state.agents.clone(),
        }
    }

    /// Restore a persisted snapshot, discarding invalid weight overrides.
    pub fn restore(&self, snapshot: OptimizerSnapshot) {
        let mut state = lock_state(&self.state);
        state.disabled_agents = snapshot.disabled;
        for (agent_id, weight) in snapshot.weights {
            if weight.is_finite() && (0.0..=1.0).contains(&weight) {
                state.weight_overrides.insert(agent_id, weight);
            } else {
                tracing::warn!(agent_id = %agent_id, weight, "Discarding invalid weight override");
            }
        }
        for (agent_id, metric) in snapshot.agent_stats {
            state.agents.insert(agent_id, metric);
        }
    }
}

fn lock_state(m: &Mutex<OptimizerState>) -> std::sync::MutexGuard<'_, OptimizerState> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimizer() -> SystemOptimizer {
        SystemOptimizer::new(OptimizerConfig::default())
    }

    #[test]
    fn breaker_trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, 120.0);
        assert!(breaker.allow_request("agent_x"));
        breaker.record_failure("agent_x");
        breaker.record_failure("agent_x");
        assert_eq!(breaker.state("agent_x"), CircuitState::Closed);
        breaker.record_failure("agent_x");
        assert_eq!(breaker.state("agent_x"), CircuitState::Open);
        assert!(!breaker.allow_request("agent_x"));
    }

    #[test]
    fn breaker_recovers_through_half_open_probe() {
        let breaker = CircuitBreaker::new(2, 0.0); // zero-second recovery for the test
        breaker.record_failure("agent_x");
        breaker.record_failure("agent_x");
        assert_eq!(breaker.state("agent_x"), CircuitState::Open);

        // Recovery window elapsed — probe admitted.
        assert!(breaker.allow_request("agent_x"));
        assert_eq!(breaker.state("agent_x"), CircuitState::HalfOpen);

        breaker.record_success("agent_x");
        assert_eq!(breaker.state("agent_x"), CircuitState::Closed);
        // Counter reset: a single new failure must not re-open.
        assert_eq!(breaker.consecutive_failures("agent_x"), 0);
        breaker.record_failure("agent_x");
        assert_eq!(breaker.state("agent_x"), CircuitState::Closed);
    }

    #[test]
    fn breaker_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(2, 0.0);
        breaker.record_failure("agent_x");
        breaker.record_failure("agent_x");
        assert!(breaker.allow_request("agent_x")); // HALF_OPEN probe
        breaker.record_failure("agent_x");
        assert_eq!(breaker.state("agent_x"), CircuitState::Open);
    }

    #[test]
    fn zero_yield_streak_flagged_as_high() {
        let opt = optimizer();
        for _ in 0..5 {
            opt.record_agent_run("agent_quiet", "quiet", 0, 100.0, false);
        }
        let recs = opt.analyze();
        let rec = recs
            .iter()
            .find(|r| r.agent_id == "agent_quiet" && r.reason.contains("silently broken"))
            .unwrap();
        assert_eq!(rec.severity, "high");
    }

    #[test]
    fn yield_resets_zero_streak() {
        let opt = optimizer();
        for _ in 0..4 {
            opt.record_agent_run("agent_a", "a", 0, 100.0, false);
        }
        opt.record_agent_run("agent_a", "a", 3, 100.0, false);
        let m = opt.agent_metric("agent_a").unwrap();
        assert_eq!(m.zero_yield_streak, 0);
        assert_eq!(m.total_zero_yields, 4);
    }

    #[test]
    fn too_few_runs_produce_no_recommendations() {
        let opt = optimizer();
        opt.record_agent_run("agent_new", "new", 0, 50_000.0, true);
        assert!(opt.analyze().is_empty());
    }

    #[test]
    fn low_keep_rate_reduces_weight() {
        let opt = optimizer();
        for _ in 0..3 {
            opt.record_agent_run("agent_spam", "spam", 10, 100.0, false);
        }
        // 30 candidates, 1 selected — keep rate 3.3%.
        opt.record_agent_selection("agent_spam", 1);
        let actions = opt.apply_recommendations();
        assert!(actions.iter().any(|a| a.contains("Reduced weight")));
        assert!(opt.weight_override("agent_spam") < 1.0);
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let opt = optimizer();
        opt.record_agent_run("agent_a", "a", 5, 120.0, false);
        let snap = opt.snapshot();

        let restored = optimizer();
        restored.restore(snap);
        let m = restored.agent_metric("agent_a").unwrap();
        assert_eq!(m.total_runs, 1);
        assert_eq!(m.total_candidates, 5);
    }

    #[test]
    fn restore_discards_bad_weights() {
        let opt = optimizer();
        let snap = OptimizerSnapshot {
            disabled: Vec::new(),
            weights: HashMap::from([("bad".to_string(), f64::NAN)]),
            agent_stats: HashMap::new(),
        };
        opt.restore(snap);
        assert_eq!(opt.weight_override("bad"), 1.0);
    }
}
