//! Candidate items and their classification enums.
//!
//! Every candidate entering the pipeline passes through `sanitize()` and
//! `validate_candidate()`. Sanitization is lossy by design: scores are
//! clamped, oversized text is truncated, and unsafe URL schemes are cleared
//! rather than rejected, so a single corrupt feed cannot poison a request.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::config;

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 500;
/// Maximum summary length in characters.
pub const MAX_SUMMARY_CHARS: usize = 2000;

const SAFE_URL_SCHEMES: [&str; 4] = ["http", "https", "ftp", ""];

/// Normalize Unicode to NFC and strip control characters that could
/// confuse display: bidi overrides, zero-width characters, and C0/C1
/// controls other than tab, newline, carriage return.
pub fn sanitize_text(text: &str) -> String {
    text.nfc()
        .filter(|&ch| !is_dangerous_control(ch))
        .collect()
}

fn is_dangerous_control(ch: char) -> bool {
    matches!(ch,
        '\u{200b}'..='\u{200f}'
        | '\u{202a}'..='\u{202e}'
        | '\u{2060}'..='\u{2069}'
        | '\u{feff}'
        | '\u{00}'..='\u{08}'
        | '\u{0b}'
        | '\u{0c}'
        | '\u{0e}'..='\u{1f}'
        | '\u{7f}'..='\u{9f}'
    )
}

fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
}

fn clamp_score(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Where a story sits in its narrative arc.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum StoryLifecycle {
    #[default]
    Developing,
    Breaking,
    Ongoing,
    Waning,
    Resolved,
}

impl std::fmt::Display for StoryLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StoryLifecycle::Developing => "developing",
            StoryLifecycle::Breaking => "breaking",
            StoryLifecycle::Ongoing => "ongoing",
            StoryLifecycle::Waning => "waning",
            StoryLifecycle::Resolved => "resolved",
        };
        write!(f, "{s}")
    }
}

/// Display-priority classification. Ordering is severity order, used for
/// comparisons and for the user's `urgency_min` filter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    #[default]
    Routine,
    Elevated,
    Breaking,
    Critical,
}

impl UrgencyLevel {
    /// One notch up, saturating at Critical.
    pub fn escalate(self) -> Self {
        match self {
            UrgencyLevel::Routine => UrgencyLevel::Elevated,
            UrgencyLevel::Elevated => UrgencyLevel::Breaking,
            UrgencyLevel::Breaking | UrgencyLevel::Critical => UrgencyLevel::Critical,
        }
    }

    /// Parse a user-facing filter string. Unknown strings mean "no filter".
    pub fn parse_filter(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "routine" => Some(UrgencyLevel::Routine),
            "elevated" => Some(UrgencyLevel::Elevated),
            "breaking" => Some(UrgencyLevel::Breaking),
            "critical" => Some(UrgencyLevel::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UrgencyLevel::Routine => "routine",
            UrgencyLevel::Elevated => "elevated",
            UrgencyLevel::Breaking => "breaking",
            UrgencyLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// The flavor of briefing delivered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BriefingType {
    #[default]
    MorningDigest,
    BreakingAlert,
    EveningSummary,
    DeepDive,
}

impl std::fmt::Display for BriefingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BriefingType::MorningDigest => "morning_digest",
            BriefingType::BreakingAlert => "breaking_alert",
            BriefingType::EveningSummary => "evening_summary",
            BriefingType::DeepDive => "deep_dive",
        };
        write!(f, "{s}")
    }
}

/// A compiled research brief handed to the fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTask {
    pub request_id: String,
    pub user_id: String,
    pub prompt: String,
    pub weighted_topics: HashMap<String, f64>,
}

/// A scored news item proposed by one research agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateItem {
    pub candidate_id: String,
    pub title: String,
    pub source: String,
    pub summary: String,
    pub url: String,
    pub topic: String,
    pub evidence_score: f64,
    pub novelty_score: f64,
    pub preference_fit: f64,
    pub prediction_signal: f64,
    pub discovered_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub lifecycle: StoryLifecycle,
    #[serde(default)]
    pub urgency: UrgencyLevel,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub corroborated_by: Vec<String>,
    #[serde(default)]
    pub contrarian_signal: String,
}

impl CandidateItem {
    /// Normalize text, clamp scores, enforce length caps, and clear unsafe
    /// URL schemes. Agents may produce slight overshoots or garbage; the
    /// data layer absorbs it here.
    pub fn sanitize(&mut self) {
        self.title = sanitize_text(&self.title);
        self.summary = sanitize_text(&self.summary);

        self.evidence_score = clamp_score(self.evidence_score);
        self.novelty_score = clamp_score(self.novelty_score);
        self.preference_fit = clamp_score(self.preference_fit);
        self.prediction_signal = clamp_score(self.prediction_signal);

        truncate_chars(&mut self.title, MAX_TITLE_CHARS);
        truncate_chars(&mut self.summary, MAX_SUMMARY_CHARS);

        let scheme = self
            .url
            .split_once(':')
            .map(|(s, _)| s.trim().to_lowercase())
            .unwrap_or_default();
        if !SAFE_URL_SCHEMES.contains(&scheme.as_str()) {
            tracing::warn!(
                candidate_id = %self.candidate_id,
                scheme = %scheme,
                "Rejected unsafe URL scheme"
            );
            self.url.clear();
        }
    }

    /// Weighted combination of the four scores, using the current scoring
    /// config. Config loading guarantees the weights sum to 1, so the
    /// result stays in [0, 1] for sanitized candidates.
    pub fn composite_score(&self) -> f64 {
        let w = &config::scoring().composite_weights;
        w.evidence * self.evidence_score
            + w.novelty * self.novelty_score
            + w.preference_fit * self.preference_fit
            + w.prediction_signal * self.prediction_signal
    }
}

/// Validate candidate data integrity. Returns the list of issues found;
/// empty means the candidate may proceed.
pub fn validate_candidate(c: &CandidateItem) -> Vec<String> {
    let mut issues = Vec::new();
    for (name, val) in [
        ("evidence_score", c.evidence_score),
        ("novelty_score", c.novelty_score),
        ("preference_fit", c.preference_fit),
        ("prediction_signal", c.prediction_signal),
    ] {
        if !val.is_finite() || !(0.0..=1.0).contains(&val) {
            issues.push(format!("{name}={val} outside [0, 1]"));
        }
    }
    if c.title.trim().is_empty() {
        issues.push("empty title".to_string());
    }
    if c.source.trim().is_empty() {
        issues.push("empty source".to_string());
    }
    if c.topic.trim().is_empty() {
        issues.push("empty topic".to_string());
    }
    issues
}
