//! Report assembly types: confidence bands, narrative threads, the final
//! delivery payload, and expert voting records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::{BriefingType, CandidateItem, StoryLifecycle, UrgencyLevel};
use crate::config;

/// Per-source reliability aggregate maintained by the credibility tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceReliability {
    pub source_id: String,
    pub reliability_score: f64,
    pub bias_rating: String,
    pub historical_accuracy: f64,
    pub corroboration_rate: f64,
    pub total_items_seen: u64,
}

impl Default for SourceReliability {
    fn default() -> Self {
        Self {
            source_id: String::new(),
            reliability_score: 0.7,
            bias_rating: "unrated".to_string(),
            historical_accuracy: 0.7,
            corroboration_rate: 0.5,
            total_items_seen: 0,
        }
    }
}

impl SourceReliability {
    pub fn trust_factor(&self) -> f64 {
        let w = &config::scoring().trust_factor_weights;
        w.reliability * self.reliability_score
            + w.historical_accuracy * self.historical_accuracy
            + w.corroboration * self.corroboration_rate
    }
}

/// A low/mid/high confidence estimate with the assumptions behind it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfidenceBand {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
    pub key_assumptions: Vec<String>,
}

impl ConfidenceBand {
    /// Build a band centered on `mid` with a symmetric offset, clamped so
    /// `0 <= low <= mid <= high <= 1` always holds.
    pub fn around(mid: f64, offset: f64, key_assumptions: Vec<String>) -> Self {
        let mid = if mid.is_finite() { mid.clamp(0.0, 1.0) } else { 0.0 };
        let offset = if offset.is_finite() { offset.abs() } else { 0.0 };
        Self {
            low: (mid - offset).max(0.0),
            mid,
            high: (mid + offset).min(1.0),
            key_assumptions,
        }
    }

    /// The all-zero band used when there is nothing to estimate from.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Bucketed label driven by the mid value.
    pub fn label(&self) -> &'static str {
        let labels = &config::scoring().confidence_labels;
        if self.mid >= labels.high_threshold {
            "high confidence"
        } else if self.mid >= labels.moderate_threshold {
            "moderate confidence"
        } else {
            "low confidence"
        }
    }
}

/// One expert's verdict on one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateVote {
    pub expert_id: String,
    pub candidate_id: String,
    pub keep: bool,
    pub confidence: f64,
    pub rationale: String,
    pub risk_note: String,
    /// True when the chair flipped this vote during arbitration.
    #[serde(default)]
    pub arbitrated: bool,
}

/// The full voting record for a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebateRecord {
    pub votes: Vec<DebateVote>,
}

/// A cluster of candidates judged to be the same story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeThread {
    pub thread_id: String,
    pub headline: String,
    pub candidates: Vec<CandidateItem>,
    pub lifecycle: StoryLifecycle,
    pub urgency: UrgencyLevel,
    pub source_count: usize,
    pub confidence: Option<ConfidenceBand>,
}

impl NarrativeThread {
    /// Average composite plus capped source bonus plus urgency bonus,
    /// clamped to [0, 1].
    pub fn thread_score(&self) -> f64 {
        if self.candidates.is_empty() {
            return 0.0;
        }
        let avg: f64 = self
            .candidates
            .iter()
            .map(CandidateItem::composite_score)
            .sum::<f64>()
            / self.candidates.len() as f64;

        let ts = &config::scoring().thread_scoring;
        let source_bonus = (ts.source_bonus_per * self.source_count as f64).min(ts.source_bonus_cap);
        let urgency_bonus = match self.urgency {
            UrgencyLevel::Routine => 0.0,
            UrgencyLevel::Elevated => ts.urgency_bonus_elevated,
            UrgencyLevel::Breaking => ts.urgency_bonus_breaking,
            UrgencyLevel::Critical => ts.urgency_bonus_critical,
        };

        (avg + source_bonus + urgency_bonus).min(1.0)
    }
}

/// Regional risk assessment entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeoRiskEntry {
    pub region: String,
    pub risk_level: f64,
    pub previous_level: f64,
    pub escalation_delta: f64,
    pub drivers: Vec<String>,
}

impl GeoRiskEntry {
    pub fn is_escalating(&self) -> bool {
        self.escalation_delta > config::scoring().georisk_escalation_threshold.0
    }
}

/// Per-topic velocity snapshot from the trend detector.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrendSnapshot {
    pub topic: String,
    pub velocity: f64,
    pub baseline_velocity: f64,
    pub anomaly_score: f64,
    pub is_emerging: bool,
    pub sample_window_minutes: i64,
}

/// A candidate promoted into the final briefing with generated analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportItem {
    pub candidate: CandidateItem,
    pub why_it_matters: String,
    pub what_changed: String,
    pub predictive_outlook: String,
    pub adjacent_reads: Vec<String>,
    pub confidence: Option<ConfidenceBand>,
    pub thread_id: Option<String>,
    pub contrarian_note: String,
}

/// Per-request pipeline health, surfaced in payload metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineHealth {
    pub agents_total: usize,
    pub agents_contributing: usize,
    pub agents_failed: Vec<String>,
    pub stages_enabled: Vec<String>,
    pub stages_failed: Vec<String>,
    pub total_candidates: usize,
}

/// Delivery payload metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PayloadMetadata {
    pub tone: String,
    pub format: String,
    pub debate_vote_count: usize,
    pub selected_count: usize,
    pub thread_count: usize,
    pub geo_risk_regions: usize,
    pub emerging_trends: usize,
    pub review_personas: Vec<String>,
    pub expert_influence: HashMap<String, f64>,
    pub pipeline_health: PipelineHealth,
    /// Set on error payloads so callers can categorize the failure.
    pub error: Option<String>,
}

/// The final immutable result of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<ReportItem>,
    pub briefing_type: BriefingType,
    pub threads: Vec<NarrativeThread>,
    pub geo_risks: Vec<GeoRiskEntry>,
    pub trends: Vec<TrendSnapshot>,
    pub metadata: PayloadMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_band_preserves_ordering() {
        let band = ConfidenceBand::around(0.9, 0.15, vec![]);
        assert!(band.low <= band.mid && band.mid <= band.high);
        assert!(band.high <= 1.0);

        let low_band = ConfidenceBand::around(0.05, 0.15, vec![]);
        assert!(low_band.low >= 0.0);
        assert!(low_band.low <= low_band.mid);
    }

    #[test]
    fn confidence_band_handles_nan_mid() {
        let band = ConfidenceBand::around(f64::NAN, 0.15, vec![]);
        assert_eq!(band.mid, 0.0);
        assert!(band.low <= band.mid && band.mid <= band.high);
    }

    #[test]
    fn confidence_labels_bucket_by_mid() {
        assert_eq!(ConfidenceBand::around(0.85, 0.1, vec![]).label(), "high confidence");
        assert_eq!(ConfidenceBand::around(0.6, 0.1, vec![]).label(), "moderate confidence");
        assert_eq!(ConfidenceBand::around(0.2, 0.1, vec![]).label(), "low confidence");
    }

    #[test]
    fn empty_thread_scores_zero() {
        let thread = NarrativeThread {
            thread_id: "t1".to_string(),
            headline: String::new(),
            candidates: Vec::new(),
            lifecycle: StoryLifecycle::Developing,
            urgency: UrgencyLevel::Routine,
            source_count: 0,
            confidence: None,
        };
        assert_eq!(thread.thread_score(), 0.0);
    }

    #[test]
    fn trust_factor_uses_configured_weights() {
        let sr = SourceReliability {
            source_id: "reuters".to_string(),
            reliability_score: 1.0,
            historical_accuracy: 1.0,
            corroboration_rate: 1.0,
            ..SourceReliability::default()
        };
        assert!((sr.trust_factor() - 1.0).abs() < 1e-9);
    }
}
