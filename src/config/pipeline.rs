//! Pipeline configuration — scoring weights, limits, stage thresholds.
//!
//! Every tunable the pipeline reads at runtime lives here so operators can
//! adjust behavior from `pipelines.json` without a rebuild. Serde defaults
//! mirror the shipped values; `validate()` rejects configs that would break
//! scoring invariants (weights must sum to 1).

use serde::{Deserialize, Serialize};

/// Composite score weights over the four candidate scores.
///
/// Must sum to 1.0 — enforced at load time, not silently renormalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeWeights {
    pub evidence: f64,
    pub novelty: f64,
    pub preference_fit: f64,
    pub prediction_signal: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            evidence: 0.30,
            novelty: 0.25,
            preference_fit: 0.30,
            prediction_signal: 0.15,
        }
    }
}

impl CompositeWeights {
    pub fn sum(&self) -> f64 {
        self.evidence + self.novelty + self.preference_fit + self.prediction_signal
    }
}

/// Weights for the per-source trust factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustFactorWeights {
    pub reliability: f64,
    pub historical_accuracy: f64,
    pub corroboration: f64,
}

impl Default for TrustFactorWeights {
    fn default() -> Self {
        Self {
            reliability: 0.50,
            historical_accuracy: 0.30,
            corroboration: 0.20,
        }
    }
}

impl TrustFactorWeights {
    pub fn sum(&self) -> f64 {
        self.reliability + self.historical_accuracy + self.corroboration
    }
}

/// Thread score bonuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadScoring {
    pub source_bonus_per: f64,
    pub source_bonus_cap: f64,
    pub urgency_bonus_elevated: f64,
    pub urgency_bonus_breaking: f64,
    pub urgency_bonus_critical: f64,
}

impl Default for ThreadScoring {
    fn default() -> Self {
        Self {
            source_bonus_per: 0.05,
            source_bonus_cap: 0.15,
            urgency_bonus_elevated: 0.03,
            urgency_bonus_breaking: 0.08,
            urgency_bonus_critical: 0.12,
        }
    }
}

/// Confidence band label thresholds, bucketed by the mid value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceLabels {
    pub high_threshold: f64,
    pub moderate_threshold: f64,
}

impl Default for ConfidenceLabels {
    fn default() -> Self {
        Self {
            high_threshold: 0.80,
            moderate_threshold: 0.55,
        }
    }
}

/// The scoring table read by domain types on every score computation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScoringConfig {
    pub composite_weights: CompositeWeights,
    pub trust_factor_weights: TrustFactorWeights,
    pub thread_scoring: ThreadScoring,
    pub confidence_labels: ConfidenceLabels,
    pub confidence_band_offset: ConfidenceBandOffset,
    pub georisk_escalation_threshold: GeoriskEscalation,
}

/// Newtype defaults keep `#[serde(default)]` on the parent honest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfidenceBandOffset(pub f64);

impl Default for ConfidenceBandOffset {
    fn default() -> Self {
        Self(0.15)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoriskEscalation(pub f64);

impl Default for GeoriskEscalation {
    fn default() -> Self {
        Self(0.05)
    }
}

/// Item-count limits for briefings and research.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub default_max_items: usize,
    pub top_discoveries_per_research_agent: usize,
    pub adjacent_reads_per_item: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            default_max_items: 10,
            top_discoveries_per_research_agent: 5,
            adjacent_reads_per_item: 3,
        }
    }
}

/// Intelligence stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelligenceConfig {
    /// Stages that run for each request. Disabled stages are skipped and
    /// downstream consumers tolerate the missing enrichment.
    pub enabled_stages: Vec<String>,
    pub velocity_window_minutes: i64,
    pub breaking_source_threshold: usize,
    pub recency_elevated_minutes: i64,
    pub waning_novelty_threshold: f64,
    pub clustering_similarity: f64,
    pub cross_source_similarity_factor: f64,
    pub corroboration_similarity: f64,
    pub trend_window_minutes: i64,
    pub anomaly_threshold: f64,
    pub baseline_decay: f64,
    pub max_tracked_topics: usize,
    pub max_items_per_source: usize,
    pub contrarian_novelty_threshold: f64,
    pub contrarian_evidence_threshold: f64,
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        Self {
            enabled_stages: default_stages(),
            velocity_window_minutes: 30,
            breaking_source_threshold: 3,
            recency_elevated_minutes: 5,
            waning_novelty_threshold: 0.3,
            clustering_similarity: 0.6,
            cross_source_similarity_factor: 0.7,
            corroboration_similarity: 0.55,
            trend_window_minutes: 60,
            anomaly_threshold: 2.0,
            baseline_decay: 0.8,
            max_tracked_topics: 200,
            max_items_per_source: 3,
            contrarian_novelty_threshold: 0.8,
            contrarian_evidence_threshold: 0.6,
        }
    }
}

pub fn default_stages() -> Vec<String> {
    [
        "credibility",
        "corroboration",
        "urgency",
        "diversity",
        "clustering",
        "georisk",
        "trends",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Expert council voting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpertCouncilConfig {
    pub keep_threshold: f64,
    pub confidence_min: f64,
    pub confidence_max: f64,
    /// "majority", "unanimous", or a number (clamped to [1, expert_count]).
    pub min_votes_to_accept: String,
    pub llm_model: String,
    pub llm_base_url: String,
}

impl Default for ExpertCouncilConfig {
    fn default() -> Self {
        Self {
            keep_threshold: 0.62,
            confidence_min: 0.51,
            confidence_max: 0.99,
            min_votes_to_accept: "majority".to_string(),
            llm_model: "claude-sonnet-4-5-20250929".to_string(),
            llm_base_url: "https://api.anthropic.com/v1".to_string(),
        }
    }
}

/// Article enrichment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub fetch_timeout_secs: u64,
    pub max_workers: usize,
    pub target_summary_chars: usize,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub gemini_model: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 8,
            max_workers: 5,
            target_summary_chars: 500,
            cache_ttl_secs: 86_400,
            cache_max_entries: 512,
            gemini_model: "gemini-2.0-flash".to_string(),
        }
    }
}

/// Engine backpressure and deadline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrent_requests: usize,
    pub pipeline_timeout_seconds: u64,
    /// How long a request waits for a semaphore permit before `Busy`.
    pub semaphore_wait_ms: u64,
    pub per_agent_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            pipeline_timeout_seconds: 120,
            semaphore_wait_ms: 250,
            per_agent_timeout_secs: 10,
        }
    }
}

/// System optimizer thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub error_rate_threshold: f64,
    pub min_yield_threshold: f64,
    pub latency_threshold_ms: f64,
    pub keep_rate_threshold: f64,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_seconds: f64,
    pub auto_disable: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.3,
            min_yield_threshold: 0.5,
            latency_threshold_ms: 10_000.0,
            keep_rate_threshold: 0.1,
            circuit_failure_threshold: 3,
            circuit_recovery_seconds: 120.0,
            auto_disable: false,
        }
    }
}

/// State persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub state_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            state_dir: "state".to_string(),
        }
    }
}

/// API keys, read from config or environment. Never placed in URLs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApiKeys {
    pub anthropic_api_key: String,
    pub gemini_api_key: String,
}

/// Deltas applied by "more X" / "less X" feedback commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceDeltas {
    pub more: f64,
    pub less: f64,
}

impl Default for PreferenceDeltas {
    fn default() -> Self {
        Self {
            more: 0.2,
            less: -0.2,
        }
    }
}

/// Urgency counts that flip a briefing into a breaking alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefingTypeThresholds {
    pub breaking_alert_critical_min: usize,
    pub breaking_alert_breaking_min: usize,
}

impl Default for BriefingTypeThresholds {
    fn default() -> Self {
        Self {
            breaking_alert_critical_min: 1,
            breaking_alert_breaking_min: 2,
        }
    }
}

/// Keyword lists feeding the urgency detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrgencyKeywords {
    pub critical: Vec<String>,
    pub breaking: Vec<String>,
    pub elevated: Vec<String>,
}

impl Default for UrgencyKeywords {
    fn default() -> Self {
        let lower = |words: &[&str]| -> Vec<String> {
            words.iter().map(|w| (*w).to_string()).collect()
        };
        Self {
            critical: lower(&[
                "nuclear", "invasion", "assassination", "coup", "declares war",
                "state of emergency", "mass casualty", "terror attack",
            ]),
            breaking: lower(&[
                "breaking", "just in", "explosion", "airstrike", "missile",
                "resigns", "sanctions announced", "market crash", "emergency meeting",
            ]),
            elevated: lower(&[
                "escalation", "mobilization", "ultimatum", "downgrade",
                "rate decision", "troop movement", "cyberattack", "recall",
            ]),
        }
    }
}

/// Candidate cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub stale_after_minutes: i64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            stale_after_minutes: 180,
        }
    }
}

/// Top-level pipeline configuration (`pipelines.json`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub version: String,
    pub scoring: ScoringConfig,
    pub limits: Limits,
    pub intelligence: IntelligenceConfig,
    pub expert_council: ExpertCouncilConfig,
    pub enrichment: EnrichmentConfig,
    pub engine: EngineConfig,
    pub optimizer: OptimizerConfig,
    pub persistence: PersistenceConfig,
    pub api_keys: ApiKeys,
    pub preference_deltas: PreferenceDeltas,
    pub briefing_type_thresholds: BriefingTypeThresholds,
    pub urgency_keywords: UrgencyKeywords,
    pub cache_policy: CachePolicy,
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

impl PipelineConfig {
    /// Validate scoring invariants. Called at load and at every hot reload.
    pub fn validate(&self) -> Result<(), String> {
        let cw = &self.scoring.composite_weights;
        for (name, w) in [
            ("evidence", cw.evidence),
            ("novelty", cw.novelty),
            ("preference_fit", cw.preference_fit),
            ("prediction_signal", cw.prediction_signal),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(format!("composite weight {name}={w} must be finite and >= 0"));
            }
        }
        if (cw.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(format!(
                "composite weights sum to {:.6}, must sum to 1.0",
                cw.sum()
            ));
        }

        let tw = &self.scoring.trust_factor_weights;
        if (tw.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(format!(
                "trust factor weights sum to {:.6}, must sum to 1.0",
                tw.sum()
            ));
        }

        if self.engine.max_concurrent_requests == 0 {
            return Err("max_concurrent_requests must be >= 1".to_string());
        }
        if self.engine.pipeline_timeout_seconds == 0 {
            return Err("pipeline_timeout_seconds must be >= 1".to_string());
        }

        let ec = &self.expert_council;
        if !(0.0..=1.0).contains(&ec.keep_threshold) {
            return Err(format!(
                "keep_threshold {} outside [0, 1]",
                ec.keep_threshold
            ));
        }
        if ec.confidence_min > ec.confidence_max {
            return Err("confidence_min exceeds confidence_max".to_string());
        }

        if !(0.0..1.0).contains(&self.intelligence.baseline_decay) {
            return Err(format!(
                "baseline_decay {} outside [0, 1)",
                self.intelligence.baseline_decay
            ));
        }

        Ok(())
    }

    /// Whether an intelligence stage is enabled.
    pub fn stage_enabled(&self, stage: &str) -> bool {
        self.intelligence.enabled_stages.iter().any(|s| s == stage)
    }
}
