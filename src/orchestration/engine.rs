//! The briefing engine — wires research, intelligence, expert voting,
//! editorial review, and delivery into one request pipeline.
//!
//! ## Request flow
//!
//! compile brief -> research fan-out (parallel) -> validate + clamp ->
//! user bias -> intelligence (credibility, corroboration, urgency,
//! diversity) -> expert council -> article enrichment -> clustering +
//! geo-risk + trends -> report assembly -> editorial review -> payload.
//!
//! ## Resource limits
//!
//! A counting semaphore caps concurrent pipelines (`Busy` when no permit
//! arrives inside the bounded wait). Each request runs under a hard
//! deadline (`Timeout` on expiry — partial results are discarded, never
//! delivered). Stage failures are logged, recorded in
//! `metadata.pipeline_health.stages_failed`, and the pipeline continues.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use lru::LruCache;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::agents::{create_agent, ResearchAgent};
use crate::analytics::AnalyticsWriter;
use crate::config::{self, ConfigSet};
use crate::delivery::{AlertDeduper, DeliveryError, WebhookDeliverer};
use crate::experts::ExpertCouncil;
use crate::intelligence::{
    credibility::{detect_cross_corroboration, enforce_source_diversity},
    narrative, ArticleEnricher, BreakingDetector, CredibilityTracker, GeoRiskIndex,
    StoryClustering, TrendDetector,
};
use crate::memory::{
    parse_preference_commands, CandidateCache, PreferenceCommand, PreferenceStore,
    StatePersistence,
};
use crate::orchestration::{AuditTrail, OrchestratorAgent, RequestLifecycle, RequestStage, SystemOptimizer};
use crate::review::{ClarityReviewAgent, StyleReviewAgent};
use crate::types::{
    validate_candidate, BriefingType, CandidateItem, ConfidenceBand, DeliveryPayload,
    PayloadMetadata, PipelineHealth, ReportItem, ResearchTask, UrgencyLevel, UserProfile,
};

/// Cap on per-user last-briefing tracking entries.
const LAST_BRIEFING_CAP: usize = 500;

#[derive(Debug, Error)]
pub enum EngineError {
    /// All pipeline slots are taken; retry later.
    #[error("engine busy: no pipeline slot available")]
    Busy,
    /// The request exceeded the pipeline deadline; partial state discarded.
    #[error("pipeline deadline exceeded after {0}s")]
    Timeout(u64),
}

struct FanOutResult {
    candidates: Vec<CandidateItem>,
    agents_total: usize,
    agents_failed: Vec<String>,
    by_agent: HashMap<String, usize>,
    research_ms: f64,
}

pub struct Engine {
    configs: ConfigSet,
    research_agents: Vec<Arc<dyn ResearchAgent>>,
    pub preferences: PreferenceStore,
    cache: CandidateCache,
    pub experts: ExpertCouncil,
    orchestrator: OrchestratorAgent,
    pub optimizer: SystemOptimizer,
    pub audit: AuditTrail,
    pub credibility: CredibilityTracker,
    breaking_detector: BreakingDetector,
    clustering: StoryClustering,
    georisk: GeoRiskIndex,
    trends: TrendDetector,
    enricher: ArticleEnricher,
    style_reviewer: StyleReviewAgent,
    clarity_reviewer: ClarityReviewAgent,
    analytics: AnalyticsWriter,
    webhooks: WebhookDeliverer,
    alerts: AlertDeduper,
    persistence: Option<StatePersistence>,
    semaphore: Arc<Semaphore>,
    last_report_items: Mutex<LruCache<String, Vec<ReportItem>>>,
}

impl Engine {
    pub fn new(configs: ConfigSet, analytics: AnalyticsWriter) -> Self {
        let pipeline = &configs.pipeline;
        tracing::info!(
            version = %pipeline.version,
            agents = configs.agents.research_agents.len(),
            experts = configs.agents.expert_agents.len(),
            stages = ?pipeline.intelligence.enabled_stages,
            "Initializing briefing engine"
        );

        // Inject the scoring table into the domain layer.
        config::swap_scoring(pipeline.scoring.clone());

        let research_agents: Vec<Arc<dyn ResearchAgent>> = configs
            .agents
            .research_agents
            .iter()
            .filter(|a| a.enabled)
            .map(create_agent)
            .collect();

        let expert_ids: Vec<String> = configs
            .agents
            .expert_agents
            .iter()
            .map(|e| e.id.clone())
            .filter(|id| !id.is_empty())
            .collect();
        let experts = ExpertCouncil::new(
            expert_ids,
            &pipeline.expert_council,
            pipeline.api_keys.anthropic_api_key.clone(),
        );

        let persona_context = configs
            .personas
            .default_personas
            .iter()
            .filter_map(|p| configs.personas.persona_notes.get(p))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");

        let persistence = if pipeline.persistence.enabled {
            match StatePersistence::new(pipeline.persistence.state_dir.clone()) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(error = %e, "State persistence unavailable");
                    None
                }
            }
        } else {
            None
        };

        let intel = &pipeline.intelligence;
        let cache = CandidateCache::new(pipeline.cache_policy.stale_after_minutes);
        let orchestrator = OrchestratorAgent::new(
            configs.agents.research_agents.clone(),
            pipeline.limits.default_max_items,
        );
        let optimizer = SystemOptimizer::new(pipeline.optimizer.clone());
        let breaking_detector = BreakingDetector::new(intel, pipeline.urgency_keywords.clone());
        let clustering = StoryClustering::new(
            intel.clustering_similarity,
            intel.cross_source_similarity_factor,
        );
        let trends = TrendDetector::new(
            intel.trend_window_minutes,
            intel.anomaly_threshold,
            intel.baseline_decay,
            intel.max_tracked_topics,
        );
        let enricher = ArticleEnricher::new(
            pipeline.enrichment.clone(),
            &pipeline.expert_council,
            &pipeline.api_keys,
        );
        let style_reviewer = StyleReviewAgent::new(
            persona_context,
            pipeline.api_keys.anthropic_api_key.clone(),
            pipeline.expert_council.llm_model.clone(),
            pipeline.expert_council.llm_base_url.clone(),
        );
        let clarity_reviewer = ClarityReviewAgent::new(pipeline.limits.adjacent_reads_per_item);
        let semaphore = Arc::new(Semaphore::new(pipeline.engine.max_concurrent_requests));

        let engine = Self {
            research_agents,
            preferences: PreferenceStore::new(),
            cache,
            experts,
            orchestrator,
            optimizer,
            audit: AuditTrail::default(),
            credibility: CredibilityTracker::new(),
            breaking_detector,
            clustering,
            georisk: GeoRiskIndex::new(),
            trends,
            enricher,
            style_reviewer,
            clarity_reviewer,
            analytics,
            webhooks: WebhookDeliverer::new(),
            alerts: AlertDeduper::default(),
            semaphore,
            last_report_items: Mutex::new(LruCache::new(
                NonZeroUsize::new(LAST_BRIEFING_CAP).unwrap_or(NonZeroUsize::MIN),
            )),
            persistence,
            configs,
        };

        engine.load_state();
        engine
    }

    /// Replace the research agent roster. Intended for tests that need
    /// scripted agent behavior.
    pub fn with_research_agents(mut self, agents: Vec<Arc<dyn ResearchAgent>>) -> Self {
        self.research_agents = agents;
        self
    }

    // ──────────────────────────────────────────────────────────────
    // Public entry points
    // ──────────────────────────────────────────────────────────────

    /// Run the full pipeline for one request.
    ///
    /// Applies backpressure (bounded wait for a pipeline slot -> `Busy`)
    /// and the pipeline deadline (`Timeout`; no partial payload escapes).
    pub async fn handle_request_payload(
        &self,
        user_id: &str,
        prompt: &str,
        weighted_topics: HashMap<String, f64>,
        max_items: Option<usize>,
    ) -> Result<DeliveryPayload, EngineError> {
        let engine_cfg = &self.configs.pipeline.engine;

        let permit = match tokio::time::timeout(
            Duration::from_millis(engine_cfg.semaphore_wait_ms),
            self.semaphore.acquire(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                tracing::warn!(user_id, "Request rejected: no pipeline slot");
                return Err(EngineError::Busy);
            }
        };

        let request_id_slot = Arc::new(Mutex::new(String::new()));
        let deadline = Duration::from_secs(engine_cfg.pipeline_timeout_seconds);
        let result = tokio::time::timeout(
            deadline,
            self.run_pipeline(user_id, prompt, weighted_topics, max_items, &request_id_slot),
        )
        .await;
        drop(permit);

        match result {
            Ok(payload) => Ok(payload),
            Err(_) => {
                let request_id = lock_slot(&request_id_slot).clone();
                let mut lifecycle = RequestLifecycle::new(
                    if request_id.is_empty() {
                        format!("req-timeout-{user_id}")
                    } else {
                        request_id
                    },
                    user_id.to_string(),
                );
                lifecycle.fail(format!(
                    "pipeline deadline exceeded after {}s",
                    engine_cfg.pipeline_timeout_seconds
                ));
                self.orchestrator.record_completion(&mut lifecycle);
                tracing::error!(
                    user_id,
                    deadline_s = engine_cfg.pipeline_timeout_seconds,
                    "Pipeline deadline exceeded, partial results discarded"
                );
                Err(EngineError::Timeout(engine_cfg.pipeline_timeout_seconds))
            }
        }
    }

    /// Apply free-text feedback to a user's profile. Returns the map of
    /// applied changes.
    pub fn apply_user_feedback(&self, user_id: &str, feedback_text: &str) -> HashMap<String, String> {
        tracing::info!(user_id, feedback = %feedback_text.chars().take(80).collect::<String>(), "Applying feedback");
        let mut results: HashMap<String, String> = HashMap::new();

        let commands =
            parse_preference_commands(feedback_text, &self.configs.pipeline.preference_deltas);
        for cmd in commands {
            match cmd {
                PreferenceCommand::TopicDelta { topic, delta } => {
                    let profile = self.preferences.apply_weight_adjustment(user_id, &topic, delta);
                    let updated = profile.topic_weights.get(&topic).copied().unwrap_or(0.0);
                    results.insert(format!("topic:{topic}"), format!("{updated}"));
                }
                PreferenceCommand::Tone(tone) => {
                    self.preferences.apply_style_update(user_id, Some(&tone), None);
                    results.insert("tone".to_string(), tone);
                }
                PreferenceCommand::Format(format) => {
                    self.preferences.apply_style_update(user_id, None, Some(&format));
                    results.insert("format".to_string(), format);
                }
                PreferenceCommand::Region(region) => {
                    self.preferences.apply_region(user_id, &region);
                    results.insert("region".to_string(), region);
                }
                PreferenceCommand::RemoveRegion(region) => {
                    self.preferences.remove_region(user_id, &region);
                    results.insert("remove_region".to_string(), region);
                }
                PreferenceCommand::Cadence(cadence) => {
                    self.preferences.apply_cadence(user_id, &cadence);
                    results.insert("cadence".to_string(), cadence);
                }
                PreferenceCommand::MaxItems(n) => {
                    self.preferences.apply_max_items(user_id, n);
                    results.insert("max_items".to_string(), n.to_string());
                }
                PreferenceCommand::SourceBoost(source) => {
                    self.preferences.apply_source_weight(user_id, &source, 1.0);
                    results.insert(format!("source:{source}"), "boosted".to_string());
                }
                PreferenceCommand::SourceDemote(source) => {
                    self.preferences.apply_source_weight(user_id, &source, -1.0);
                    results.insert(format!("source:{source}"), "demoted".to_string());
                }
                PreferenceCommand::Reset => {
                    self.preferences.reset(user_id);
                    results.insert("reset".to_string(), "all preferences reset to defaults".to_string());
                }
            }
        }

        if !results.is_empty() {
            let detail = {
                let mut pairs: Vec<String> =
                    results.iter().map(|(k, v)| format!("{k}={v}")).collect();
                pairs.sort();
                pairs.join("; ")
            };
            self.audit.record_preference(
                &format!("feedback-{user_id}"),
                user_id,
                "multi_update",
                &detail,
            );
            self.save_state();
        }

        self.analytics.record_feedback(
            user_id,
            feedback_text,
            &serde_json::to_value(&results).unwrap_or_default(),
        );

        tracing::info!(user_id, updates = results.len(), "Feedback applied");
        results
    }

    /// Cached reserve candidates the user hasn't seen yet.
    pub fn show_more(
        &self,
        user_id: &str,
        topic: &str,
        already_seen: &HashSet<String>,
        limit: usize,
    ) -> Vec<CandidateItem> {
        self.cache.get_more(user_id, topic, already_seen, limit)
    }

    /// A report item from the user's last briefing (1-indexed).
    pub fn get_report_item(&self, user_id: &str, index: usize) -> Option<ReportItem> {
        let mut items = lock_last_items(&self.last_report_items);
        items
            .get(user_id)
            .and_then(|list| (index >= 1 && index <= list.len()).then(|| list[index - 1].clone()))
    }

    // ──────────────────────────────────────────────────────────────
    // The pipeline
    // ──────────────────────────────────────────────────────────────

    async fn run_pipeline(
        &self,
        user_id: &str,
        prompt: &str,
        weighted_topics: HashMap<String, f64>,
        max_items: Option<usize>,
        request_id_slot: &Arc<Mutex<String>>,
    ) -> DeliveryPayload {
        let pipeline_cfg = &self.configs.pipeline;
        let profile = self.preferences.get_or_create(user_id);
        let limit = max_items
            .unwrap_or(profile.max_items)
            .min(pipeline_cfg.limits.default_max_items);

        let (mut task, mut lifecycle) =
            self.orchestrator.compile_brief(user_id, prompt, &profile, Some(limit));
        *lock_slot(request_id_slot) = task.request_id.clone();
        if !weighted_topics.is_empty() {
            task.weighted_topics = weighted_topics;
        }
        let request_id = task.request_id.clone();

        self.analytics
            .record_request_start(&request_id, user_id, prompt, limit);

        // Apply any pending optimizer recommendations before research.
        for action in self.optimizer.apply_recommendations() {
            self.audit.record_config_change(
                &request_id,
                "optimizer",
                "",
                &action,
                "system_optimization_agent",
            );
        }

        // Stage 1: research fan-out. The user's custom sources join the
        // roster for this request only.
        lifecycle.advance(RequestStage::Researching);
        let top_k = pipeline_cfg.limits.top_discoveries_per_research_agent;
        let custom_agents = custom_source_agents(&profile);
        let fan_out = self.run_research(&task, top_k, &custom_agents).await;
        self.orchestrator
            .record_research_results(&mut lifecycle, fan_out.candidates.len());
        self.optimizer
            .record_stage_run("research", fan_out.research_ms, false);
        tracing::info!(
            request_id = %request_id,
            candidates = fan_out.candidates.len(),
            failed_agents = fan_out.agents_failed.len(),
            research_ms = format!("{:.0}", fan_out.research_ms),
            "Research fan-out complete"
        );

        // Validate and clamp.
        let mut candidates: Vec<CandidateItem> = Vec::with_capacity(fan_out.candidates.len());
        for mut c in fan_out.candidates {
            c.sanitize();
            let issues = validate_candidate(&c);
            if issues.is_empty() {
                candidates.push(c);
            } else {
                tracing::warn!(
                    candidate_id = %c.candidate_id,
                    issues = %issues.join("; "),
                    "Dropping invalid candidate"
                );
            }
        }
        let total_candidates = candidates.len();

        // Region tagging happens before user bias so region boosts apply.
        self.georisk.tag_regions(&mut candidates);
        self.apply_user_bias(&profile, &mut candidates);

        // Stage 2: intelligence enrichment.
        let t0 = Instant::now();
        let mut stages_failed: Vec<String> = Vec::new();
        candidates = self.run_intelligence(&profile, candidates, &mut stages_failed);
        self.optimizer
            .record_stage_run("intelligence", t0.elapsed().as_secs_f64() * 1000.0, false);

        // Stage 3: expert council selection.
        lifecycle.advance(RequestStage::ExpertReview);
        let t0 = Instant::now();
        let (selected, reserve, debate) = self.experts.select(&candidates, limit).await;
        self.orchestrator.record_selection(&mut lifecycle, selected.len());
        self.optimizer
            .record_stage_run("expert_council", t0.elapsed().as_secs_f64() * 1000.0, false);

        let selected_ids: HashSet<String> =
            selected.iter().map(|c| c.candidate_id.clone()).collect();
        for vote in &debate.votes {
            self.audit.record_vote(
                &request_id,
                &vote.expert_id,
                &vote.candidate_id,
                vote.keep,
                vote.confidence,
                &vote.rationale,
                &vote.risk_note,
                vote.arbitrated,
            );
        }
        for c in &candidates {
            let is_selected = selected_ids.contains(&c.candidate_id);
            let reason = if is_selected {
                "Accepted by expert council"
            } else {
                "Below vote threshold or deduplicated"
            };
            self.audit.record_selection(
                &request_id,
                &c.candidate_id,
                &c.title,
                is_selected,
                reason,
                c.composite_score(),
            );
        }
        for c in &selected {
            self.optimizer.record_agent_selection(&c.discovered_by, 1);
        }
        self.analytics
            .record_candidates(&request_id, &candidates, &selected_ids);
        self.analytics.record_expert_votes(&request_id, &debate.votes);
        for (agent_id, count) in &fan_out.by_agent {
            let agent_selected = selected
                .iter()
                .filter(|c| &c.discovered_by == agent_id)
                .count();
            self.analytics.record_agent_performance(
                &request_id,
                agent_id,
                *count,
                agent_selected,
                fan_out.research_ms / fan_out.by_agent.len().max(1) as f64,
            );
        }

        // Cache the reserve for "show more".
        let dominant_topic = task
            .weighted_topics
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(t, _)| t.clone())
            .unwrap_or_else(|| "general".to_string());
        self.cache.put(user_id, &dominant_topic, reserve.clone());

        // Stage 3.5: article enrichment — only the selected stories.
        let t0 = Instant::now();
        let selected = self.enricher.enrich(selected).await;
        self.optimizer.record_stage_run(
            "article_enrichment",
            t0.elapsed().as_secs_f64() * 1000.0,
            false,
        );

        // Stage 4-6: clustering, geo-risk, trend analysis. Each tolerates
        // missing upstream enrichment and failure-isolates like the rest.
        let threads = if pipeline_cfg.stage_enabled("clustering") {
            run_stage("clustering", &mut stages_failed, &self.optimizer, || {
                self.clustering.cluster(&selected, Some(&self.credibility))
            })
            .unwrap_or_default()
        } else {
            Vec::new()
        };
        let geo_risks = if pipeline_cfg.stage_enabled("georisk") {
            run_stage("georisk", &mut stages_failed, &self.optimizer, || {
                self.georisk.assess(&candidates)
            })
            .unwrap_or_default()
        } else {
            Vec::new()
        };
        let trend_snapshots = if pipeline_cfg.stage_enabled("trends") {
            run_stage("trends", &mut stages_failed, &self.optimizer, || {
                self.trends.analyze(&candidates)
            })
            .unwrap_or_default()
        } else {
            Vec::new()
        };

        // Stage 7: report assembly with editorial review.
        lifecycle.advance(RequestStage::EditorialReview);
        let t0 = Instant::now();
        let report_items = self
            .assemble_report(&selected, &threads, &reserve, &profile, &request_id)
            .await;
        self.optimizer.record_stage_run(
            "editorial_review",
            t0.elapsed().as_secs_f64() * 1000.0,
            false,
        );

        // Stage 8: briefing type.
        let briefing_type = self.determine_briefing_type(&selected);

        let stages_enabled = pipeline_cfg.intelligence.enabled_stages.clone();
        let payload = DeliveryPayload {
            user_id: user_id.to_string(),
            generated_at: Utc::now(),
            metadata: PayloadMetadata {
                tone: profile.tone.clone(),
                format: profile.format.clone(),
                debate_vote_count: debate.votes.len(),
                selected_count: selected.len(),
                thread_count: threads.len(),
                geo_risk_regions: geo_risks.len(),
                emerging_trends: trend_snapshots.iter().filter(|t| t.is_emerging).count(),
                review_personas: self.configs.personas.default_personas.clone(),
                expert_influence: self
                    .experts
                    .chair_rankings()
                    .into_iter()
                    .map(|(id, influence, _)| (id, influence))
                    .collect(),
                pipeline_health: PipelineHealth {
                    agents_total: fan_out.agents_total,
                    agents_contributing: fan_out.by_agent.len(),
                    agents_failed: fan_out.agents_failed.clone(),
                    stages_enabled,
                    stages_failed,
                    total_candidates,
                },
                error: None,
            },
            items: report_items.clone(),
            briefing_type,
            threads,
            geo_risks,
            trends: trend_snapshots,
        };

        lock_last_items(&self.last_report_items).put(user_id.to_string(), report_items);

        // Completion bookkeeping.
        lifecycle.advance(RequestStage::Formatting);
        self.orchestrator.record_completion(&mut lifecycle);
        self.audit.record_delivery(
            &request_id,
            user_id,
            payload.items.len(),
            &briefing_type.to_string(),
            lifecycle.total_elapsed(),
        );
        self.analytics.record_briefing(&request_id, &payload);
        self.analytics.record_request_complete(
            &request_id,
            total_candidates,
            payload.items.len(),
            &briefing_type.to_string(),
            lifecycle.total_elapsed(),
        );
        if !payload.geo_risks.is_empty() {
            self.analytics.record_georisk_snapshot(&request_id, &payload.geo_risks);
        }
        if !payload.trends.is_empty() {
            self.analytics.record_trend_snapshot(&request_id, &payload.trends);
        }
        self.analytics.record_credibility_snapshot(
            &request_id,
            &serde_json::to_value(self.credibility.snapshot()).unwrap_or_default(),
        );
        self.analytics
            .record_expert_snapshot(&request_id, &self.experts.chair_snapshot());

        self.save_state();
        self.dispatch_outbound(&profile, &payload).await;

        tracing::info!(
            request_id = %request_id,
            items = payload.items.len(),
            briefing_type = %briefing_type,
            "Report generated"
        );
        payload
    }

    /// Run all admitted agents concurrently, isolating failures per agent.
    async fn run_research(
        &self,
        task: &ResearchTask,
        top_k: usize,
        custom_agents: &[Arc<dyn ResearchAgent>],
    ) -> FanOutResult {
        let per_agent_timeout =
            Duration::from_secs(self.configs.pipeline.engine.per_agent_timeout_secs);
        let t0 = Instant::now();

        let mut admitted: Vec<Arc<dyn ResearchAgent>> = Vec::new();
        for agent in self.research_agents.iter().chain(custom_agents) {
            if self.optimizer.is_agent_disabled(agent.id()) {
                tracing::debug!(agent_id = agent.id(), "Agent disabled by optimizer, skipping");
                continue;
            }
            if !self.optimizer.circuit_breaker.allow_request(agent.id()) {
                tracing::debug!(agent_id = agent.id(), "Circuit breaker OPEN, skipping agent");
                continue;
            }
            admitted.push(agent.clone());
        }

        let mut handles = Vec::with_capacity(admitted.len());
        let mut ids = Vec::with_capacity(admitted.len());
        for agent in admitted {
            ids.push(agent.id().to_string());
            let task = task.clone();
            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let result =
                    tokio::time::timeout(per_agent_timeout, agent.search(&task, top_k)).await;
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                (result, latency_ms)
            }));
        }

        let mut candidates = Vec::new();
        let mut agents_failed = Vec::new();
        let mut by_agent: HashMap<String, usize> = HashMap::new();

        for (agent_id, handle) in ids.into_iter().zip(handles) {
            let outcome = handle.await;
            match outcome {
                Ok((Ok(Ok(found)), latency_ms)) => {
                    self.optimizer.circuit_breaker.record_success(&agent_id);
                    self.optimizer
                        .record_agent_run(&agent_id, "", found.len(), latency_ms, false);
                    self.audit.record_research(
                        &task.request_id,
                        &agent_id,
                        found.len(),
                        latency_ms,
                    );
                    if !found.is_empty() {
                        by_agent.insert(agent_id, found.len());
                        candidates.extend(found);
                    }
                }
                Ok((Ok(Err(e)), latency_ms)) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "Research agent failed");
                    self.record_agent_failure(&task.request_id, &agent_id, latency_ms);
                    agents_failed.push(agent_id);
                }
                Ok((Err(_), latency_ms)) => {
                    tracing::warn!(agent_id = %agent_id, "Research agent timed out");
                    self.record_agent_failure(&task.request_id, &agent_id, latency_ms);
                    agents_failed.push(agent_id);
                }
                Err(join_error) => {
                    tracing::error!(agent_id = %agent_id, error = %join_error, "Research agent panicked");
                    self.record_agent_failure(&task.request_id, &agent_id, 0.0);
                    agents_failed.push(agent_id);
                }
            }
        }

        FanOutResult {
            candidates,
            agents_total: self.research_agents.len() + custom_agents.len(),
            agents_failed,
            by_agent,
            research_ms: t0.elapsed().as_secs_f64() * 1000.0,
        }
    }

    fn record_agent_failure(&self, request_id: &str, agent_id: &str, latency_ms: f64) {
        self.optimizer.circuit_breaker.record_failure(agent_id);
        self.optimizer
            .record_agent_run(agent_id, "", 0, latency_ms, true);
        self.audit.record_research(request_id, agent_id, 0, latency_ms);
    }

    /// Source weights, muted topics, and region-of-interest boosts.
    fn apply_user_bias(&self, profile: &UserProfile, candidates: &mut Vec<CandidateItem>) {
        if !profile.source_weights.is_empty() {
            for c in candidates.iter_mut() {
                let sw = profile.source_weights.get(&c.source).copied().unwrap_or(0.0);
                if sw != 0.0 {
                    c.preference_fit = (c.preference_fit + sw * 0.15).clamp(0.0, 1.0);
                }
            }
        }

        if !profile.muted_topics.is_empty() {
            let muted: HashSet<&String> = profile.muted_topics.iter().collect();
            candidates.retain(|c| !muted.contains(&c.topic));
        }

        if !profile.regions_of_interest.is_empty() {
            let roi: HashSet<String> = profile
                .regions_of_interest
                .iter()
                .map(|r| r.to_lowercase().replace(' ', "_"))
                .collect();
            for c in candidates.iter_mut() {
                let hits = c
                    .regions
                    .iter()
                    .any(|r| roi.contains(&r.to_lowercase().replace(' ', "_")));
                if hits {
                    c.preference_fit = (c.preference_fit + 0.15).min(1.0);
                }
            }
        }
    }

    /// Credibility, corroboration, urgency, and diversity stages, each
    /// individually enableable. A stage that panics is logged, recorded in
    /// `stages_failed`, and skipped — the pipeline continues with the
    /// candidates it has.
    fn run_intelligence(
        &self,
        profile: &UserProfile,
        mut candidates: Vec<CandidateItem>,
        stages_failed: &mut Vec<String>,
    ) -> Vec<CandidateItem> {
        let pipeline_cfg = &self.configs.pipeline;

        if pipeline_cfg.stage_enabled("credibility") {
            run_stage("credibility", stages_failed, &self.optimizer, || {
                for c in &candidates {
                    self.credibility.record_item(c);
                }
            });
        }

        if pipeline_cfg.stage_enabled("corroboration") {
            run_stage("corroboration", stages_failed, &self.optimizer, || {
                detect_cross_corroboration(
                    &mut candidates,
                    Some(&self.credibility),
                    pipeline_cfg.intelligence.corroboration_similarity,
                );
            });
        }

        if pipeline_cfg.stage_enabled("urgency") {
            run_stage("urgency", stages_failed, &self.optimizer, || {
                self.breaking_detector.assess(&mut candidates);
            });
        }

        if pipeline_cfg.stage_enabled("diversity") {
            let max_per_source = if profile.max_per_source > 0 {
                profile.max_per_source
            } else {
                pipeline_cfg.intelligence.max_items_per_source
            };
            let input = candidates.clone();
            if let Some(kept) = run_stage("diversity", stages_failed, &self.optimizer, || {
                enforce_source_diversity(input, max_per_source)
            }) {
                candidates = kept;
            }
        }

        candidates
    }

    async fn assemble_report(
        &self,
        selected: &[CandidateItem],
        threads: &[crate::types::NarrativeThread],
        reserve: &[CandidateItem],
        profile: &UserProfile,
        request_id: &str,
    ) -> Vec<ReportItem> {
        let pipeline_cfg = &self.configs.pipeline;
        let offset = pipeline_cfg.scoring.confidence_band_offset.0;
        let adjacent_limit = pipeline_cfg.limits.adjacent_reads_per_item;

        let mut thread_map: HashMap<&str, &str> = HashMap::new();
        for thread in threads {
            for c in &thread.candidates {
                thread_map.insert(c.candidate_id.as_str(), thread.thread_id.as_str());
            }
        }

        let mut report_items = Vec::with_capacity(selected.len());
        for c in selected {
            let cred_score = self.credibility.score_candidate(c);
            let confidence =
                ConfidenceBand::around(cred_score, offset, self.build_assumptions(c));

            // Filter by the user's thresholds before spending review effort.
            if profile.confidence_min > 0.0 && confidence.mid < profile.confidence_min {
                continue;
            }
            if let Some(min_urgency) = UrgencyLevel::parse_filter(&profile.urgency_min) {
                if c.urgency < min_urgency {
                    continue;
                }
            }

            let contrarian = if !c.contrarian_signal.is_empty() {
                c.contrarian_signal.clone()
            } else if c.novelty_score > pipeline_cfg.intelligence.contrarian_novelty_threshold
                && c.evidence_score < pipeline_cfg.intelligence.contrarian_evidence_threshold
            {
                "High novelty but limited evidence — monitor for confirmation.".to_string()
            } else {
                String::new()
            };

            let mut item = ReportItem {
                why_it_matters: narrative::generate_why(c, &self.credibility, Some(profile)),
                what_changed: narrative::generate_what_changed(c),
                predictive_outlook: narrative::generate_outlook(c),
                adjacent_reads: narrative::generate_adjacent_reads(
                    c,
                    threads,
                    reserve,
                    adjacent_limit,
                ),
                confidence: Some(confidence),
                thread_id: thread_map.get(c.candidate_id.as_str()).map(|t| (*t).to_string()),
                contrarian_note: contrarian,
                candidate: c.clone(),
            };

            // Style review with audit.
            let before_why = item.why_it_matters.clone();
            self.style_reviewer.review(&mut item, profile).await;
            self.audit.record_review(
                request_id,
                "review_agent_style",
                &item.candidate.candidate_id,
                "why_it_matters",
                &before_why,
                &item.why_it_matters,
            );

            // Clarity review with audit.
            let before_outlook = item.predictive_outlook.clone();
            self.clarity_reviewer.review(&mut item);
            self.audit.record_review(
                request_id,
                "review_agent_clarity",
                &item.candidate.candidate_id,
                "predictive_outlook",
                &before_outlook,
                &item.predictive_outlook,
            );

            report_items.push(item);
        }
        report_items
    }

    fn build_assumptions(&self, c: &CandidateItem) -> Vec<String> {
        let mut assumptions = Vec::new();
        if c.corroborated_by.is_empty() {
            assumptions.push("Awaiting independent corroboration".to_string());
        } else {
            assumptions.push(format!(
                "Corroborated by {} independent source(s)",
                c.corroborated_by.len()
            ));
        }
        let sr = self.credibility.get_source(&c.source);
        if sr.reliability_score >= 0.8 {
            assumptions.push(format!("Source ({}) rated high reliability", c.source));
        } else if sr.reliability_score < 0.6 {
            assumptions.push(format!(
                "Source ({}) rated lower reliability — verify independently",
                c.source
            ));
        }
        assumptions
    }

    fn determine_briefing_type(&self, selected: &[CandidateItem]) -> BriefingType {
        let thresholds = &self.configs.pipeline.briefing_type_thresholds;
        let critical = selected
            .iter()
            .filter(|c| c.urgency == UrgencyLevel::Critical)
            .count();
        let breaking = selected
            .iter()
            .filter(|c| c.urgency == UrgencyLevel::Breaking)
            .count();

        if critical >= thresholds.breaking_alert_critical_min
            || breaking >= thresholds.breaking_alert_breaking_min
        {
            BriefingType::BreakingAlert
        } else {
            BriefingType::MorningDigest
        }
    }

    /// Best-effort webhook delivery and threshold alerts. Never fails the
    /// pipeline.
    async fn dispatch_outbound(&self, profile: &UserProfile, payload: &DeliveryPayload) {
        if !profile.webhook_url.is_empty() {
            match self
                .webhooks
                .deliver(&profile.user_id, &profile.webhook_url, payload)
                .await
            {
                Ok(()) => {}
                Err(DeliveryError::Disabled) => {
                    // Clear the stored webhook so we stop trying.
                    self.preferences.set_webhook(&profile.user_id, "");
                    tracing::warn!(user_id = %profile.user_id, "Webhook removed after repeated failures");
                }
                Err(e) => {
                    tracing::warn!(user_id = %profile.user_id, error = %e, "Webhook delivery failed");
                }
            }
        }

        for risk in &payload.geo_risks {
            if risk.is_escalating()
                && risk.risk_level >= profile.alert_georisk_threshold
                && self.alerts.should_send(&profile.user_id, "georisk", &risk.region)
            {
                tracing::info!(
                    user_id = %profile.user_id,
                    region = %risk.region,
                    risk_level = format!("{:.2}", risk.risk_level),
                    "Geo-risk alert raised"
                );
            }
        }
        for trend in &payload.trends {
            if trend.is_emerging
                && trend.anomaly_score >= profile.alert_trend_threshold
                && self.alerts.should_send(&profile.user_id, "trend", &trend.topic)
            {
                tracing::info!(
                    user_id = %profile.user_id,
                    topic = %trend.topic,
                    anomaly = format!("{:.2}", trend.anomaly_score),
                    "Trend spike alert raised"
                );
            }
        }
    }

    // ──────────────────────────────────────────────────────────────
    // State persistence
    // ──────────────────────────────────────────────────────────────

    /// Persist all collections best-effort. Failures are logged, never fatal.
    pub fn save_state(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let saves: [(&str, Result<(), _>); 6] = [
            ("preferences", persistence.save("preferences", &self.preferences.snapshot())),
            ("credibility", persistence.save("credibility", &self.credibility.snapshot())),
            ("georisk", persistence.save("georisk", &self.georisk.snapshot())),
            ("trends", persistence.save("trends", &self.trends.snapshot())),
            ("optimizer", persistence.save("optimizer", &self.optimizer.snapshot())),
            ("debate_chair", persistence.save("debate_chair", &self.experts.chair_snapshot())),
        ];
        for (key, result) in saves {
            if let Err(e) = result {
                tracing::warn!(key, error = %e, "State save failed");
            }
        }
    }

    fn load_state(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Some(prefs) = persistence.load("preferences") {
            self.preferences.restore_snapshot(prefs);
        }
        if let Some(credibility) = persistence.load("credibility") {
            self.credibility.restore(credibility);
        }
        if let Some(georisk) = persistence.load("georisk") {
            self.georisk.restore(georisk);
        }
        if let Some(trends) = persistence.load("trends") {
            self.trends.restore(trends);
        }
        if let Some(optimizer) = persistence.load("optimizer") {
            self.optimizer.restore(optimizer);
        }
        if let Some(chair) = persistence.load("debate_chair") {
            self.experts.chair_restore(chair);
        }
        tracing::info!(state_dir = %persistence.state_dir().display(), "State loaded");
    }

    /// Engine status for operational surfaces.
    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "agent_count": self.research_agents.len(),
            "expert_count": self.experts.expert_count(),
            "stage_count": self.configs.pipeline.intelligence.enabled_stages.len(),
            "llm_backed": self.experts.llm_backed(),
            "cache_entries": self.cache.entry_count(),
            "orchestrator_metrics": serde_json::to_value(self.orchestrator.metrics()).unwrap_or_default(),
            "audit_stats": serde_json::to_value(self.audit.stats()).unwrap_or_default(),
        })
    }
}

/// Build request-scoped agents for the user's custom sources. Sources with
/// a feed URL become feed agents; the rest simulate.
fn custom_source_agents(profile: &UserProfile) -> Vec<Arc<dyn ResearchAgent>> {
    profile
        .custom_sources
        .iter()
        .filter(|cs| !cs.name.trim().is_empty())
        .map(|cs| {
            let cfg = crate::config::AgentConfig {
                id: format!("custom_{}", cs.name.trim().to_lowercase().replace(' ', "_")),
                source: cs.name.trim().to_lowercase(),
                kind: if cs.feed_url.is_empty() { "simulated" } else { "feed" }.to_string(),
                endpoint: cs.feed_url.clone(),
                topics: cs.topics.clone(),
                enabled: true,
            };
            create_agent(&cfg)
        })
        .collect()
}

/// Run one pipeline stage, catching panics so a single broken stage cannot
/// take down the request. Failures are logged, counted against the stage's
/// metrics, and appended to `stages_failed`.
fn run_stage<T>(
    name: &str,
    stages_failed: &mut Vec<String>,
    optimizer: &SystemOptimizer,
    stage: impl FnOnce() -> T,
) -> Option<T> {
    let t0 = Instant::now();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(stage));
    let latency_ms = t0.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(value) => {
            optimizer.record_stage_run(name, latency_ms, false);
            Some(value)
        }
        Err(_) => {
            tracing::error!(stage = name, "Pipeline stage failed, continuing without it");
            optimizer.record_stage_run(name, latency_ms, true);
            stages_failed.push(name.to_string());
            None
        }
    }
}

fn lock_slot(m: &Mutex<String>) -> std::sync::MutexGuard<'_, String> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_last_items(
    m: &Mutex<LruCache<String, Vec<ReportItem>>>,
) -> std::sync::MutexGuard<'_, LruCache<String, Vec<ReportItem>>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
