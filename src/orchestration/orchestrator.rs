//! Orchestrator — brief compilation, lifecycle state machine, and
//! capability-based agent routing.
//!
//! The orchestrator translates user intent plus profile memory into a
//! weighted research brief, tracks each request through its lifecycle
//! stages, and keeps aggregate metrics over completed requests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::AgentConfig;
use crate::types::{ResearchTask, UserProfile};

/// Completed-request history kept for metrics.
const MAX_COMPLETED_HISTORY: usize = 100;

/// Lifecycle stages for a request — an observable state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStage {
    Queued,
    CompilingBrief,
    Researching,
    Enriching,
    ExpertReview,
    EditorialReview,
    Formatting,
    Delivering,
    Complete,
    Failed,
}

impl std::fmt::Display for RequestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestStage::Queued => "queued",
            RequestStage::CompilingBrief => "compiling_brief",
            RequestStage::Researching => "researching",
            RequestStage::Enriching => "enriching",
            RequestStage::ExpertReview => "expert_review",
            RequestStage::EditorialReview => "editorial_review",
            RequestStage::Formatting => "formatting",
            RequestStage::Delivering => "delivering",
            RequestStage::Complete => "complete",
            RequestStage::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Tracks a single request through its lifecycle stages.
#[derive(Debug)]
pub struct RequestLifecycle {
    pub request_id: String,
    pub user_id: String,
    pub stage: RequestStage,
    created_at: Instant,
    stage_entered_at: Instant,
    pub stage_times: Vec<(String, f64)>,
    pub candidate_count: usize,
    pub selected_count: usize,
    pub error: String,
}

impl RequestLifecycle {
    pub fn new(request_id: String, user_id: String) -> Self {
        let now = Instant::now();
        Self {
            request_id,
            user_id,
            stage: RequestStage::Queued,
            created_at: now,
            stage_entered_at: now,
            stage_times: Vec::new(),
            candidate_count: 0,
            selected_count: 0,
            error: String::new(),
        }
    }

    /// Move to the next lifecycle stage, recording elapsed seconds in the
    /// stage being left.
    pub fn advance(&mut self, new_stage: RequestStage) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.stage_entered_at).as_secs_f64();
        self.stage_times.push((self.stage.to_string(), elapsed));
        self.stage = new_stage;
        self.stage_entered_at = now;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = error.into();
        self.advance(RequestStage::Failed);
    }

    pub fn total_elapsed(&self) -> f64 {
        self.created_at.elapsed().as_secs_f64()
    }

    fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            request_id: self.request_id.clone(),
            user_id: self.user_id.clone(),
            stage: self.stage,
            elapsed_s: self.total_elapsed(),
            candidates: self.candidate_count,
            selected: self.selected_count,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleSnapshot {
    pub request_id: String,
    pub user_id: String,
    pub stage: RequestStage,
    pub elapsed_s: f64,
    pub candidates: usize,
    pub selected: usize,
    pub error: String,
}

/// Aggregate orchestrator metrics.
#[derive(Debug, Clone, Serialize, Default)]
pub struct OrchestratorMetrics {
    pub total_requests: usize,
    pub avg_elapsed_s: f64,
    pub avg_candidates: f64,
    pub avg_selected: f64,
    pub failed_count: usize,
}

// ──────────────────────────────────────────────────────────────────────
// Agent capability routing
// ──────────────────────────────────────────────────────────────────────

fn topic_capabilities() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("geopolitics", &["reuters", "ap", "bbc", "guardian", "ft", "aljazeera", "gdelt", "x", "reddit", "web"]),
        ("ai_policy", &["arxiv", "hackernews", "x", "reddit", "guardian", "web", "reuters", "bbc"]),
        ("technology", &["hackernews", "arxiv", "x", "reddit", "web", "guardian", "bbc"]),
        ("markets", &["ft", "reuters", "x", "web", "reddit", "hackernews", "bbc"]),
        ("crypto", &["x", "reddit", "web", "hackernews", "ft"]),
        ("climate", &["guardian", "bbc", "reuters", "ap", "web", "reddit", "arxiv"]),
        ("science", &["arxiv", "hackernews", "guardian", "bbc", "reddit", "web"]),
        ("middle_east", &["aljazeera", "bbc", "reuters", "ap", "guardian", "gdelt", "x"]),
        ("africa", &["aljazeera", "bbc", "reuters", "gdelt", "guardian", "web"]),
    ]
}

fn source_priority(source: &str) -> f64 {
    match source {
        "reuters" => 0.95,
        "ap" => 0.93,
        "bbc" => 0.90,
        "ft" => 0.90,
        "guardian" => 0.88,
        "aljazeera" => 0.80,
        "arxiv" => 0.78,
        "hackernews" => 0.65,
        "gdelt" => 0.60,
        "reddit" => 0.58,
        "x" => 0.55,
        _ => 0.50,
    }
}

/// Central planner for the intelligence pipeline.
pub struct OrchestratorAgent {
    agent_configs: Vec<AgentConfig>,
    default_max_items: usize,
    completed: Mutex<VecDeque<LifecycleSnapshot>>,
}

impl OrchestratorAgent {
    pub fn new(agent_configs: Vec<AgentConfig>, default_max_items: usize) -> Self {
        Self {
            agent_configs,
            default_max_items,
            completed: Mutex::new(VecDeque::new()),
        }
    }

    /// Compile a weighted research brief from user intent and profile.
    pub fn compile_brief(
        &self,
        user_id: &str,
        prompt: &str,
        profile: &UserProfile,
        max_items: Option<usize>,
    ) -> (ResearchTask, RequestLifecycle) {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let user_prefix: String = user_id.chars().take(8).collect();
        let request_id = format!("req-{epoch}-{user_prefix}");

        let mut lifecycle = RequestLifecycle::new(request_id.clone(), user_id.to_string());
        lifecycle.advance(RequestStage::CompilingBrief);

        let mut weighted_topics: HashMap<String, f64> = profile.topic_weights.clone();
        if weighted_topics.is_empty() {
            weighted_topics = HashMap::from([
                ("geopolitics".to_string(), 0.8),
                ("ai_policy".to_string(), 0.7),
                ("technology".to_string(), 0.6),
                ("markets".to_string(), 0.5),
            ]);
        }

        // Boost topics whose keywords appear in the prompt.
        let prompt_lower = prompt.to_lowercase();
        let mut known: Vec<String> = weighted_topics.keys().cloned().collect();
        known.extend(topic_capabilities().iter().map(|(t, _)| (*t).to_string()));
        for topic in known {
            let mentioned = topic
                .split('_')
                .any(|kw| !kw.is_empty() && prompt_lower.contains(kw));
            if mentioned {
                let current = weighted_topics.get(&topic).copied().unwrap_or(0.3);
                weighted_topics.insert(topic, (current + 0.3).min(1.0));
            }
        }

        // Boost regions-of-interest entries that double as topics.
        for region in &profile.regions_of_interest {
            if topic_capabilities().iter().any(|(t, _)| t == region) {
                let current = weighted_topics.get(region).copied().unwrap_or(0.3);
                weighted_topics.insert(region.clone(), (current + 0.2).min(1.0));
            }
        }

        let task = ResearchTask {
            request_id: request_id.clone(),
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
            weighted_topics,
        };

        let mut top: Vec<(&String, &f64)> = task.weighted_topics.iter().collect();
        top.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        tracing::info!(
            request_id = %request_id,
            top_topics = ?top.iter().take(5).map(|(t, w)| format!("{t}={w:.2}")).collect::<Vec<_>>(),
            max_items = max_items.unwrap_or(self.default_max_items),
            "Brief compiled"
        );

        (task, lifecycle)
    }

    /// Order agents by relevance to the task's weighted topics. Selection
    /// is advisory — the engine may still call all agents.
    pub fn select_agents(&self, task: &ResearchTask) -> Vec<AgentConfig> {
        let mut top_topics: Vec<(&String, &f64)> = task.weighted_topics.iter().collect();
        top_topics.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        top_topics.truncate(5);

        let mut scored: Vec<(AgentConfig, f64)> = self
            .agent_configs
            .iter()
            .map(|cfg| {
                let mut score = 0.0;
                for (topic, weight) in &top_topics {
                    let capable = topic_capabilities()
                        .iter()
                        .find(|(t, _)| t == topic)
                        .map(|(_, sources)| *sources)
                        .unwrap_or(&[]);
                    if let Some(position) = capable.iter().position(|s| *s == cfg.source) {
                        let position_bonus =
                            1.0 - (position as f64 / capable.len().max(1) as f64) * 0.3;
                        score += **weight * position_bonus;
                    }
                }
                score += source_priority(&cfg.source) * 0.1;
                (cfg.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(cfg, _)| cfg).collect()
    }

    pub fn record_research_results(&self, lifecycle: &mut RequestLifecycle, candidate_count: usize) {
        lifecycle.candidate_count = candidate_count;
        lifecycle.advance(RequestStage::Enriching);
    }

    pub fn record_selection(&self, lifecycle: &mut RequestLifecycle, selected_count: usize) {
        lifecycle.selected_count = selected_count;
        lifecycle.advance(RequestStage::EditorialReview);
    }

    /// Archive a finished request (complete or failed) for metrics.
    pub fn record_completion(&self, lifecycle: &mut RequestLifecycle) {
        if lifecycle.stage != RequestStage::Failed {
            lifecycle.advance(RequestStage::Complete);
        }
        let snapshot = lifecycle.snapshot();
        tracing::info!(
            request_id = %snapshot.request_id,
            candidates = snapshot.candidates,
            selected = snapshot.selected,
            elapsed_s = format!("{:.2}", snapshot.elapsed_s),
            stage = %snapshot.stage,
            "Request archived"
        );
        let mut completed = lock_completed(&self.completed);
        completed.push_back(snapshot);
        while completed.len() > MAX_COMPLETED_HISTORY {
            completed.pop_front();
        }
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        let completed = lock_completed(&self.completed);
        if completed.is_empty() {
            return OrchestratorMetrics::default();
        }
        let n = completed.len() as f64;
        OrchestratorMetrics {
            total_requests: completed.len(),
            avg_elapsed_s: completed.iter().map(|r| r.elapsed_s).sum::<f64>() / n,
            avg_candidates: completed.iter().map(|r| r.candidates as f64).sum::<f64>() / n,
            avg_selected: completed.iter().map(|r| r.selected as f64).sum::<f64>() / n,
            failed_count: completed.iter().filter(|r| !r.error.is_empty()).count(),
        }
    }
}

fn lock_completed(
    m: &Mutex<VecDeque<LifecycleSnapshot>>,
) -> std::sync::MutexGuard<'_, VecDeque<LifecycleSnapshot>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
