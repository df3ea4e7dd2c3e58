//! Regional risk index.
//!
//! Regions are extracted from candidate text with a keyword map. Each
//! region's risk level is a weighted blend of in-region candidates' urgency,
//! evidence, and novelty. The previous level is carried across requests so
//! escalation deltas survive between briefings (and restarts, via the
//! persistence snapshot).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{CandidateItem, GeoRiskEntry, UrgencyLevel};

/// Weights over the in-region signal blend.
const URGENCY_WEIGHT: f64 = 0.5;
const EVIDENCE_WEIGHT: f64 = 0.3;
const NOVELTY_WEIGHT: f64 = 0.2;

/// Max keyword drivers reported per region.
const MAX_DRIVERS: usize = 4;

fn region_keywords() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        ("eastern_europe", vec!["ukraine", "russia", "belarus", "kyiv", "moscow", "donbas"]),
        ("middle_east", vec!["israel", "gaza", "iran", "lebanon", "syria", "tehran", "red sea"]),
        ("east_asia", vec!["china", "taiwan", "japan", "korea", "beijing", "taipei"]),
        ("south_asia", vec!["india", "pakistan", "kashmir", "delhi", "islamabad"]),
        ("western_europe", vec!["germany", "france", "brussels", "nato", "european union"]),
        ("north_america", vec!["washington", "white house", "congress", "canada", "mexico"]),
        ("africa", vec!["sahel", "sudan", "ethiopia", "nigeria", "niger", "congo"]),
        ("latin_america", vec!["brazil", "venezuela", "argentina", "colombia"]),
    ]
}

pub struct GeoRiskIndex {
    regions: Vec<(&'static str, Vec<&'static str>)>,
    previous_levels: Mutex<HashMap<String, f64>>,
}

impl GeoRiskIndex {
    pub fn new() -> Self {
        Self {
            regions: region_keywords(),
            previous_levels: Mutex::new(HashMap::new()),
        }
    }

    /// Regions whose keywords appear in the text.
    pub fn extract_regions(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        self.regions
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(region, _)| (*region).to_string())
            .collect()
    }

    /// Fill in `regions` for candidates that have none.
    pub fn tag_regions(&self, candidates: &mut [CandidateItem]) {
        for c in candidates.iter_mut() {
            if c.regions.is_empty() {
                c.regions = self.extract_regions(&format!("{} {}", c.title, c.summary));
            }
        }
    }

    /// Assess regional risk across the candidate set. Updates the carried
    /// previous-level state.
    pub fn assess(&self, candidates: &[CandidateItem]) -> Vec<GeoRiskEntry> {
        let mut by_region: HashMap<String, Vec<&CandidateItem>> = HashMap::new();
        for c in candidates {
            for region in &c.regions {
                by_region.entry(region.clone()).or_default().push(c);
            }
        }

        let mut previous = lock_levels(&self.previous_levels);
        let mut entries: Vec<GeoRiskEntry> = Vec::new();

        for (region, members) in by_region {
            if members.is_empty() {
                continue;
            }
            let risk: f64 = members
                .iter()
                .map(|c| {
                    URGENCY_WEIGHT * urgency_signal(c.urgency)
                        + EVIDENCE_WEIGHT * c.evidence_score
                        + NOVELTY_WEIGHT * c.novelty_score
                })
                .sum::<f64>()
                / members.len() as f64;
            let risk = risk.clamp(0.0, 1.0);

            let prev = previous.get(&region).copied().unwrap_or(0.0);
            previous.insert(region.clone(), risk);

            entries.push(GeoRiskEntry {
                drivers: self.top_drivers(&region, &members),
                escalation_delta: risk - prev,
                previous_level: prev,
                risk_level: risk,
                region,
            });
        }

        entries.sort_by(|a, b| {
            b.risk_level
                .partial_cmp(&a.risk_level)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries
    }

    /// Keywords whose presence most moved the region's score, by frequency.
    fn top_drivers(&self, region: &str, members: &[&CandidateItem]) -> Vec<String> {
        let keywords = self
            .regions
            .iter()
            .find(|(r, _)| *r == region)
            .map(|(_, k)| k.as_slice())
            .unwrap_or(&[]);

        let mut counts: Vec<(usize, &str)> = keywords
            .iter()
            .map(|k| {
                let n = members
                    .iter()
                    .filter(|c| {
                        format!("{} {}", c.title, c.summary)
                            .to_lowercase()
                            .contains(k)
                    })
                    .count();
                (n, *k)
            })
            .filter(|(n, _)| *n > 0)
            .collect();
        counts.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        counts
            .into_iter()
            .take(MAX_DRIVERS)
            .map(|(_, k)| k.to_string())
            .collect()
    }

    /// Snapshot of last-known levels, for persistence.
    pub fn snapshot(&self) -> HashMap<String, f64> {
        lock_levels(&self.previous_levels).clone()
    }

    /// Restore persisted levels, discarding non-finite values.
    pub fn restore(&self, data: HashMap<String, f64>) {
        let mut levels = lock_levels(&self.previous_levels);
        for (region, level) in data {
            if level.is_finite() && (0.0..=1.0).contains(&level) {
                levels.insert(region, level);
            } else {
                tracing::warn!(region = %region, level, "Discarding invalid geo-risk level");
            }
        }
    }
}

impl Default for GeoRiskIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn urgency_signal(u: UrgencyLevel) -> f64 {
    match u {
        UrgencyLevel::Routine => 0.3,
        UrgencyLevel::Elevated => 0.6,
        UrgencyLevel::Breaking => 0.85,
        UrgencyLevel::Critical => 1.0,
    }
}

fn lock_levels(m: &Mutex<HashMap<String, f64>>) -> std::sync::MutexGuard<'_, HashMap<String, f64>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoryLifecycle;
    use chrono::Utc;

    fn make_candidate(id: &str, title: &str, urgency: UrgencyLevel) -> CandidateItem {
        CandidateItem {
            candidate_id: id.to_string(),
            title: title.to_string(),
            source: "reuters".to_string(),
            summary: String::new(),
            url: "https://reuters.newsdesk.test/a".to_string(),
            topic: "geopolitics".to_string(),
            evidence_score: 0.8,
            novelty_score: 0.6,
            preference_fit: 0.5,
            prediction_signal: 0.4,
            discovered_by: "agent_reuters".to_string(),
            created_at: Utc::now(),
            lifecycle: StoryLifecycle::Developing,
            urgency,
            regions: Vec::new(),
            corroborated_by: Vec::new(),
            contrarian_signal: String::new(),
        }
    }

    #[test]
    fn extracts_regions_from_keywords() {
        let index = GeoRiskIndex::new();
        let regions = index.extract_regions("Taiwan strait tensions rise as Beijing responds");
        assert_eq!(regions, vec!["east_asia".to_string()]);
    }

    #[test]
    fn tag_regions_preserves_existing() {
        let index = GeoRiskIndex::new();
        let mut cs = vec![make_candidate("c1", "Taiwan drills continue", UrgencyLevel::Elevated)];
        cs[0].regions = vec!["custom_region".to_string()];
        index.tag_regions(&mut cs);
        assert_eq!(cs[0].regions, vec!["custom_region".to_string()]);
    }

    #[test]
    fn assess_computes_delta_against_previous() {
        let index = GeoRiskIndex::new();
        let mut cs = vec![make_candidate("c1", "Gaza ceasefire talks falter", UrgencyLevel::Elevated)];
        index.tag_regions(&mut cs);

        let first = index.assess(&cs);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].previous_level, 0.0);
        assert!(first[0].risk_level > 0.0);

        let mut hotter = vec![make_candidate("c2", "Gaza strikes intensify sharply", UrgencyLevel::Critical)];
        index.tag_regions(&mut hotter);
        let second = index.assess(&hotter);
        assert_eq!(second[0].previous_level, first[0].risk_level);
        assert!(second[0].escalation_delta > 0.0);
        assert!(second[0].is_escalating());
    }

    #[test]
    fn drivers_are_matched_keywords() {
        let index = GeoRiskIndex::new();
        let mut cs = vec![make_candidate(
            "c1",
            "Iran and Lebanon talks continue in Tehran",
            UrgencyLevel::Elevated,
        )];
        index.tag_regions(&mut cs);
        let entries = index.assess(&cs);
        assert!(entries[0].drivers.contains(&"iran".to_string()));
        assert!(entries[0].drivers.len() <= MAX_DRIVERS);
    }

    #[test]
    fn restore_discards_invalid_levels() {
        let index = GeoRiskIndex::new();
        let mut data = HashMap::new();
        data.insert("middle_east".to_string(), 0.4);
        data.insert("east_asia".to_string(), f64::NAN);
        index.restore(data);
        let snap = index.snapshot();
        assert_eq!(snap.get("middle_east"), Some(&0.4));
        assert!(!snap.contains_key("east_asia"));
    }
}
