//! Narrative clustering — groups candidates into story threads.
//!
//! Greedy pairwise merge over token-set similarity. Cross-source pairs use a
//! reduced effective threshold so the same story reported by different
//! outlets lands in one thread. The merge is computed with union-find, so
//! the resulting partition does not depend on candidate order.

use std::collections::{HashMap, HashSet};

use crate::intelligence::credibility::{text_similarity, CredibilityTracker};
use crate::types::{CandidateItem, ConfidenceBand, NarrativeThread};

pub struct StoryClustering {
    similarity_threshold: f64,
    cross_source_factor: f64,
}

impl StoryClustering {
    pub fn new(similarity_threshold: f64, cross_source_factor: f64) -> Self {
        Self {
            similarity_threshold,
            cross_source_factor,
        }
    }

    /// Cluster candidates into narrative threads, ordered by thread score
    /// descending. Thread confidence comes from the cluster's mean
    /// credibility when a tracker is available.
    pub fn cluster(
        &self,
        candidates: &[CandidateItem],
        credibility: Option<&CredibilityTracker>,
    ) -> Vec<NarrativeThread> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut parent: Vec<usize> = (0..candidates.len()).collect();

        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                let cross_source = candidates[i].source != candidates[j].source;
                let threshold = if cross_source {
                    self.similarity_threshold * self.cross_source_factor
                } else {
                    self.similarity_threshold
                };
                if text_similarity(&candidates[i], &candidates[j]) >= threshold {
                    union(&mut parent, i, j);
                }
            }
        }

        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..candidates.len() {
            let root = find(&mut parent, i);
            groups.entry(root).or_default().push(i);
        }

        let mut threads: Vec<NarrativeThread> = groups
            .into_values()
            .map(|members| self.build_thread(candidates, &members, credibility))
            .collect();

        threads.sort_by(|a, b| {
            b.thread_score()
                .partial_cmp(&a.thread_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.headline.cmp(&b.headline))
        });
        for (idx, thread) in threads.iter_mut().enumerate() {
            thread.thread_id = format!("thread-{}", idx + 1);
        }
        threads
    }

    fn build_thread(
        &self,
        candidates: &[CandidateItem],
        members: &[usize],
        credibility: Option<&CredibilityTracker>,
    ) -> NarrativeThread {
        let cluster: Vec<CandidateItem> = members.iter().map(|&i| candidates[i].clone()).collect();

        let headline = cluster
            .iter()
            .max_by(|a, b| {
                a.composite_score()
                    .partial_cmp(&b.composite_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|c| c.title.clone())
            .unwrap_or_default();

        let lifecycle = cluster.iter().map(|c| c.lifecycle).max().unwrap_or_default();
        let urgency = cluster.iter().map(|c| c.urgency).max().unwrap_or_default();
        let source_count = cluster
            .iter()
            .map(|c| c.source.as_str())
            .collect::<HashSet<_>>()
            .len();

        let confidence = match credibility {
            Some(tracker) if !cluster.is_empty() => {
                let mean = cluster
                    .iter()
                    .map(|c| tracker.score_candidate(c))
                    .sum::<f64>()
                    / cluster.len() as f64;
                Some(ConfidenceBand::around(mean, 0.1, Vec::new()))
            }
            Some(_) => Some(ConfidenceBand::zero()),
            None => None,
        };

        NarrativeThread {
            thread_id: String::new(),
            headline,
            candidates: cluster,
            lifecycle,
            urgency,
            source_count,
            confidence,
        }
    }
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    let mut cur = i;
    while parent[cur] != root {
        let next = parent[cur];
        parent[cur] = root;
        cur = next;
    }
    root
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        // Smaller root wins for determinism.
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[hi] = lo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StoryLifecycle, UrgencyLevel};
    use chrono::Utc;

    fn make_candidate(id: &str, source: &str, title: &str, topic: &str) -> CandidateItem {
        CandidateItem {
            candidate_id: id.to_string(),
            title: title.to_string(),
            source: source.to_string(),
            summary: title.to_string(),
            url: format!("https://{source}.newsdesk.test/{id}"),
            topic: topic.to_string(),
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
    fn similar_stories_merge_into_one_thread() {
        let clustering = StoryClustering::new(0.6, 0.7);
        let candidates = vec![
            make_candidate("c1", "reuters", "Central bank raises rates amid inflation surge", "markets"),
            make_candidate("c2", "bbc", "Central bank raises rates amid inflation concerns", "markets"),
            make_candidate("c3", "arxiv", "Novel battery chemistry doubles energy density", "science"),
        ];
        let threads = clustering.cluster(&candidates, None);
        assert_eq!(threads.len(), 2);
        let merged = threads.iter().find(|t| t.candidates.len() == 2).unwrap();
        assert_eq!(merged.source_count, 2);
    }

    #[test]
    fn clustering_is_order_independent() {
        let clustering = StoryClustering::new(0.6, 0.7);
        let mut candidates = vec![
            make_candidate("c1", "reuters", "Port strike halts grain exports", "trade"),
            make_candidate("c2", "bbc", "Port strike halts grain exports", "trade"),
            make_candidate("c3", "ft", "Semiconductor subsidies bill advances", "technology"),
        ];
        let forward = clustering.cluster(&candidates, None);
        candidates.reverse();
        let reversed = clustering.cluster(&candidates, None);

        let sizes = |threads: &[NarrativeThread]| {
            let mut v: Vec<usize> = threads.iter().map(|t| t.candidates.len()).collect();
            v.sort_unstable();
            v
        };
        assert_eq!(sizes(&forward), sizes(&reversed));
    }

    #[test]
    fn thread_takes_max_urgency_and_lifecycle() {
        let clustering = StoryClustering::new(0.6, 0.7);
        let mut a = make_candidate("c1", "reuters", "Escalation at the border crossing", "geopolitics");
        a.urgency = UrgencyLevel::Breaking;
        a.lifecycle = StoryLifecycle::Breaking;
        let mut b = make_candidate("c2", "bbc", "Escalation at the border crossing", "geopolitics");
        b.urgency = UrgencyLevel::Routine;
        b.lifecycle = StoryLifecycle::Developing;

        let threads = clustering.cluster(&[a, b], None);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].urgency, UrgencyLevel::Breaking);
        assert_eq!(threads[0].lifecycle, StoryLifecycle::Breaking);
    }

    #[test]
    fn confidence_band_from_mean_credibility() {
        let clustering = StoryClustering::new(0.6, 0.7);
        let tracker = CredibilityTracker::new();
        let candidates = vec![make_candidate("c1", "reuters", "Solo story", "markets")];
        let threads = clustering.cluster(&candidates, Some(&tracker));
        let band = threads[0].confidence.as_ref().unwrap();
        assert!(band.low <= band.mid && band.mid <= band.high);
        assert!(band.mid > 0.0);
    }

    #[test]
    fn empty_input_yields_no_threads() {
        let clustering = StoryClustering::new(0.6, 0.7);
        assert!(clustering.cluster(&[], None).is_empty());
    }
}
