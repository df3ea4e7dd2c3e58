//! Source credibility tracking, cross-source corroboration, and diversity.
//!
//! ## Source Tiers
//!
//! Reliability seeds come from a fixed tier map:
//! - tier 1 (major wire services): 0.92
//! - tier 1b (established international outlets): 0.80
//! - academic/research: 0.78
//! - tier 2 (community/social): 0.58
//!
//! Corroboration between two sources bumps both sources' corroboration rate,
//! which feeds into the trust factor.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::types::{CandidateItem, SourceReliability};

/// Major wire services and papers of record.
const TIER1_SOURCES: [&str; 5] = ["reuters", "ap", "bbc", "guardian", "ft"];
/// Established international outlets.
const TIER1B_SOURCES: [&str; 2] = ["aljazeera", "gdelt"];
/// Academic and research sources.
const ACADEMIC_SOURCES: [&str; 1] = ["arxiv"];
/// Community and social sources.
const TIER2_SOURCES: [&str; 4] = ["hackernews", "reddit", "x", "web"];

const TIER1_SEED: f64 = 0.92;
const TIER1B_SEED: f64 = 0.80;
const ACADEMIC_SEED: f64 = 0.78;
const TIER2_SEED: f64 = 0.58;
const UNKNOWN_SEED: f64 = 0.50;

/// Bump applied to both sides of a corroboration pair.
const CORROBORATION_INCREMENT: f64 = 0.05;

/// Mix of source trust and candidate evidence in `score_candidate`.
const TRUST_MIX: f64 = 0.6;
const EVIDENCE_MIX: f64 = 0.4;

/// Per-source reliability aggregates. Thread-safe; readers snapshot under
/// the lock.
pub struct CredibilityTracker {
    sources: Mutex<HashMap<String, SourceReliability>>,
}

impl CredibilityTracker {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Tier seed for a source name.
    pub fn seed_reliability(source: &str) -> f64 {
        if TIER1_SOURCES.contains(&source) {
            TIER1_SEED
        } else if TIER1B_SOURCES.contains(&source) {
            TIER1B_SEED
        } else if ACADEMIC_SOURCES.contains(&source) {
            ACADEMIC_SEED
        } else if TIER2_SOURCES.contains(&source) {
            TIER2_SEED
        } else {
            UNKNOWN_SEED
        }
    }

    /// Human-readable tier label, used by narrative generation.
    pub fn tier_label(source: &str) -> &'static str {
        if TIER1_SOURCES.contains(&source) {
            "major wire service"
        } else if TIER1B_SOURCES.contains(&source) {
            "established international outlet"
        } else if ACADEMIC_SOURCES.contains(&source) {
            "academic/research source"
        } else if TIER2_SOURCES.contains(&source) {
            "community/social source"
        } else {
            "source"
        }
    }

    fn seeded(source: &str) -> SourceReliability {
        SourceReliability {
            source_id: source.to_string(),
            reliability_score: Self::seed_reliability(source),
            ..SourceReliability::default()
        }
    }

    /// Record one seen item for the candidate's source.
    pub fn record_item(&self, c: &CandidateItem) {
        let mut sources = lock_sources(&self.sources);
        let entry = sources
            .entry(c.source.clone())
            .or_insert_with(|| Self::seeded(&c.source));
        entry.total_items_seen += 1;
    }

    /// Record mutual corroboration between two sources.
    pub fn record_corroboration(&self, source_a: &str, source_b: &str) {
        let mut sources = lock_sources(&self.sources);
        for source in [source_a, source_b] {
            let entry = sources
                .entry(source.to_string())
                .or_insert_with(|| Self::seeded(source));
            entry.corroboration_rate = (entry.corroboration_rate + CORROBORATION_INCREMENT).min(1.0);
        }
    }

    /// Current reliability record for a source (seeded if unseen).
    pub fn get_source(&self, source: &str) -> SourceReliability {
        let mut sources = lock_sources(&self.sources);
        sources
            .entry(source.to_string())
            .or_insert_with(|| Self::seeded(source))
            .clone()
    }

    /// Weighted mix of source trust and candidate evidence.
    pub fn score_candidate(&self, c: &CandidateItem) -> f64 {
        let trust = self.get_source(&c.source).trust_factor();
        TRUST_MIX * trust + EVIDENCE_MIX * c.evidence_score
    }

    /// Snapshot for persistence.
    pub fn snapshot(&self) -> HashMap<String, SourceReliability> {
        lock_sources(&self.sources).clone()
    }

    /// Restore a persisted snapshot, discarding entries with invalid floats.
    pub fn restore(&self, data: HashMap<String, SourceReliability>) {
        let mut sources = lock_sources(&self.sources);
        let mut restored = 0usize;
        for (source, sr) in data {
            let valid = [sr.reliability_score, sr.historical_accuracy, sr.corroboration_rate]
                .iter()
                .all(|v| v.is_finite() && (0.0..=1.0).contains(v));
            if !valid {
                tracing::warn!(source = %source, "Discarding invalid credibility entry");
                continue;
            }
            sources.insert(source, sr);
            restored += 1;
        }
        tracing::info!(restored, "Credibility state restored");
    }
}

impl Default for CredibilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_sources(
    m: &Mutex<HashMap<String, SourceReliability>>,
) -> std::sync::MutexGuard<'_, HashMap<String, SourceReliability>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// Cross-source corroboration
// ============================================================================

/// Hosts that mark synthetic or placeholder URLs. Candidates pointing at
/// these are skipped by the corroboration detector.
const PLACEHOLDER_HOSTS: [&str; 4] = ["example.com", "example.org", "example.net", "localhost"];

fn is_placeholder_url(url: &str) -> bool {
    if url.is_empty() {
        return true;
    }
    let host = url
        .split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_lowercase();
    PLACEHOLDER_HOSTS
        .iter()
        .any(|p| host == *p || host.ends_with(&format!(".{p}")))
}

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity over word tokens of title + summary.
pub fn text_similarity(a: &CandidateItem, b: &CandidateItem) -> f64 {
    let ta = token_set(&format!("{} {}", a.title, a.summary));
    let tb = token_set(&format!("{} {}", b.title, b.summary));
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

/// Detect cross-source corroboration within topic buckets.
///
/// For every pair of same-topic candidates from distinct sources whose text
/// similarity meets the threshold, each candidate records the other's source
/// (set semantics). Candidates with empty or placeholder URLs are skipped.
pub fn detect_cross_corroboration(
    candidates: &mut [CandidateItem],
    tracker: Option<&CredibilityTracker>,
    similarity_threshold: f64,
) {
    let mut by_topic: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, c) in candidates.iter().enumerate() {
        if is_placeholder_url(&c.url) {
            continue;
        }
        by_topic.entry(c.topic.clone()).or_default().push(i);
    }

    let mut pairs: Vec<(usize, usize)> = Vec::new();
    for indices in by_topic.values() {
        for (pos, &i) in indices.iter().enumerate() {
            for &j in &indices[pos + 1..] {
                if candidates[i].source == candidates[j].source {
                    continue;
                }
                if text_similarity(&candidates[i], &candidates[j]) >= similarity_threshold {
                    pairs.push((i, j));
                }
            }
        }
    }

    for (i, j) in pairs {
        let source_i = candidates[i].source.clone();
        let source_j = candidates[j].source.clone();
        if !candidates[i].corroborated_by.contains(&source_j) {
            candidates[i].corroborated_by.push(source_j.clone());
        }
        if !candidates[j].corroborated_by.contains(&source_i) {
            candidates[j].corroborated_by.push(source_i.clone());
        }
        if let Some(tracker) = tracker {
            tracker.record_corroboration(&source_i, &source_j);
        }
    }
}

// ============================================================================
// Source diversity
// ============================================================================

/// Cap the number of candidates any single source contributes.
///
/// Groups by source, keeps the top `max_per_source` by composite score,
/// drops the rest. `max_per_source == 0` means no limit.
pub fn enforce_source_diversity(
    candidates: Vec<CandidateItem>,
    max_per_source: usize,
) -> Vec<CandidateItem> {
    if max_per_source == 0 {
        return candidates;
    }

    let mut by_source: HashMap<String, Vec<CandidateItem>> = HashMap::new();
    let mut source_order: Vec<String> = Vec::new();
    for c in candidates {
        if !by_source.contains_key(&c.source) {
            source_order.push(c.source.clone());
        }
        by_source.entry(c.source.clone()).or_default().push(c);
    }

    let mut kept = Vec::new();
    for source in source_order {
        if let Some(mut group) = by_source.remove(&source) {
            group.sort_by(|a, b| {
                b.composite_score()
                    .partial_cmp(&a.composite_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let dropped = group.len().saturating_sub(max_per_source);
            if dropped > 0 {
                tracing::debug!(source = %source, dropped, "Source diversity cap applied");
            }
            group.truncate(max_per_source);
            kept.extend(group);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StoryLifecycle, UrgencyLevel};
    use chrono::Utc;

    fn make_candidate(id: &str, source: &str, title: &str) -> CandidateItem {
        CandidateItem {
            candidate_id: id.to_string(),
            title: title.to_string(),
            source: source.to_string(),
            summary: format!("{title} with extended detail for similarity"),
            url: format!("https://{source}.newsdesk.test/{id}"),
            topic: "geopolitics".to_string(),
            evidence_score: 0.7,
            novelty_score: 0.6,
            preference_fit: 0.5,
            prediction_signal: 0.4,
            discovered_by: format!("agent_{source}"),
            created_at: Utc::now(),
            lifecycle: StoryLifecycle::Developing,
            urgency: UrgencyLevel::Routine,
            regions: Vec::new(),
            corroborated_by: Vec::new(),
            contrarian_signal: String::new(),
        }
    }

    #[test]
    fn tier_seeds() {
        assert_eq!(CredibilityTracker::seed_reliability("reuters"), 0.92);
        assert_eq!(CredibilityTracker::seed_reliability("aljazeera"), 0.80);
        assert_eq!(CredibilityTracker::seed_reliability("arxiv"), 0.78);
        assert_eq!(CredibilityTracker::seed_reliability("reddit"), 0.58);
        assert_eq!(CredibilityTracker::seed_reliability("somesite"), 0.50);
    }

    #[test]
    fn record_item_increments_seen() {
        let tracker = CredibilityTracker::new();
        let c = make_candidate("c1", "reuters", "Summit announced");
        tracker.record_item(&c);
        tracker.record_item(&c);
        assert_eq!(tracker.get_source("reuters").total_items_seen, 2);
    }

    #[test]
    fn corroboration_bumps_both_and_caps() {
        let tracker = CredibilityTracker::new();
        for _ in 0..20 {
            tracker.record_corroboration("reuters", "bbc");
        }
        assert_eq!(tracker.get_source("reuters").corroboration_rate, 1.0);
        assert_eq!(tracker.get_source("bbc").corroboration_rate, 1.0);
    }

    #[test]
    fn detect_corroboration_on_similar_pairs() {
        let mut candidates = vec![
            make_candidate("c1", "reuters", "Ceasefire talks resume in regional capital"),
            make_candidate("c2", "bbc", "Ceasefire talks resume in regional capital"),
            make_candidate("c3", "ft", "Completely unrelated chip production economics story"),
        ];
        detect_cross_corroboration(&mut candidates, None, 0.55);
        assert_eq!(candidates[0].corroborated_by, vec!["bbc".to_string()]);
        assert_eq!(candidates[1].corroborated_by, vec!["reuters".to_string()]);
        assert!(candidates[2].corroborated_by.is_empty());
    }

    #[test]
    fn corroboration_skips_placeholder_urls() {
        let mut candidates = vec![
            make_candidate("c1", "reuters", "Ceasefire talks resume in capital"),
            make_candidate("c2", "bbc", "Ceasefire talks resume in capital"),
        ];
        candidates[0].url = "https://example.com/story".to_string();
        detect_cross_corroboration(&mut candidates, None, 0.55);
        assert!(candidates[0].corroborated_by.is_empty());
        assert!(candidates[1].corroborated_by.is_empty());
    }

    #[test]
    fn corroboration_deduplicates_sources() {
        let mut candidates = vec![
            make_candidate("c1", "reuters", "Major sanctions package announced today"),
            make_candidate("c2", "bbc", "Major sanctions package announced today"),
            make_candidate("c3", "bbc", "Major sanctions package announced today"),
        ];
        detect_cross_corroboration(&mut candidates, None, 0.55);
        assert_eq!(candidates[0].corroborated_by, vec!["bbc".to_string()]);
    }

    #[test]
    fn diversity_keeps_top_scored_per_source() {
        let mut a = make_candidate("a", "reuters", "Story one about markets today");
        a.evidence_score = 0.9;
        let mut b = make_candidate("b", "reuters", "Story two about markets today");
        b.evidence_score = 0.2;
        let mut c = make_candidate("c", "reuters", "Story three about markets today");
        c.evidence_score = 0.5;
        let d = make_candidate("d", "bbc", "A different outlet story");

        let kept = enforce_source_diversity(vec![a, b, c, d], 2);
        let reuters: Vec<&str> = kept
            .iter()
            .filter(|x| x.source == "reuters")
            .map(|x| x.candidate_id.as_str())
            .collect();
        assert_eq!(reuters, vec!["a", "c"]);
        assert_eq!(kept.iter().filter(|x| x.source == "bbc").count(), 1);
    }

    #[test]
    fn diversity_zero_means_unlimited() {
        let candidates = vec![
            make_candidate("a", "reuters", "One story"),
            make_candidate("b", "reuters", "Two story"),
        ];
        assert_eq!(enforce_source_diversity(candidates, 0).len(), 2);
    }

    #[test]
    fn restore_discards_invalid_entries() {
        let tracker = CredibilityTracker::new();
        let mut data = HashMap::new();
        data.insert(
            "good".to_string(),
            SourceReliability {
                source_id: "good".to_string(),
                reliability_score: 0.9,
                ..SourceReliability::default()
            },
        );
        data.insert(
            "bad".to_string(),
            SourceReliability {
                source_id: "bad".to_string(),
                reliability_score: f64::NAN,
                ..SourceReliability::default()
            },
        );
        tracker.restore(data);
        let snap = tracker.snapshot();
        assert!(snap.contains_key("good"));
        assert!(!snap.contains_key("bad"));
    }
}
