//! Debate chair — per-expert influence tracking and vote arbitration.
//!
//! The chair tracks how often each expert's votes agree with final selection
//! outcomes. Influence drifts up for experts that call outcomes correctly
//! and down for those that don't, bounded to [0.5, 2.0] so no expert is
//! ever silenced or dominant.
//!
//! On a split vote, arbitration applies influence-weighted re-scoring and
//! may flip the votes of below-average-influence experts that disagree with
//! the weighted verdict. Flipped votes are flagged in the rationale and the
//! `arbitrated` field so the audit trail can surface them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::DebateVote;

const INFLUENCE_MIN: f64 = 0.5;
const INFLUENCE_MAX: f64 = 2.0;
const INFLUENCE_STEP: f64 = 0.01;

#[derive(Debug, Clone, Default)]
struct ExpertRecord {
    influence: f64,
    correct: u64,
    total: u64,
}

/// Serializable chair state (`debate_chair.json`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChairSnapshot {
    pub influence: HashMap<String, f64>,
    pub accuracy: HashMap<String, f64>,
    pub total_votes: u64,
}

#[derive(Debug, Default)]
pub struct DebateChair {
    experts: HashMap<String, ExpertRecord>,
    total_votes: u64,
}

impl DebateChair {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn influence(&self, expert_id: &str) -> f64 {
        self.experts
            .get(expert_id)
            .map_or(1.0, |r| r.influence.max(INFLUENCE_MIN))
    }

    fn record_mut(&mut self, expert_id: &str) -> &mut ExpertRecord {
        self.experts
            .entry(expert_id.to_string())
            .or_insert_with(|| ExpertRecord {
                influence: 1.0,
                correct: 0,
                total: 0,
            })
    }

    /// Arbitrate one candidate's split vote set.
    ///
    /// Computes the influence-and-confidence-weighted keep fraction. Votes
    /// disagreeing with the weighted verdict are flipped when their expert's
    /// influence sits below the group mean. Returns the number flipped.
    pub fn arbitrate(&self, votes: &mut [DebateVote]) -> usize {
        let keeps = votes.iter().filter(|v| v.keep).count();
        if keeps == 0 || keeps == votes.len() {
            return 0; // Not split — nothing to arbitrate.
        }

        let mut weighted_keep = 0.0;
        let mut weight_total = 0.0;
        for v in votes.iter() {
            let w = self.influence(&v.expert_id) * v.confidence.max(0.01);
            weight_total += w;
            if v.keep {
                weighted_keep += w;
            }
        }
        if weight_total <= 0.0 {
            return 0;
        }
        let verdict_keep = weighted_keep / weight_total >= 0.5;

        let mean_influence: f64 = votes
            .iter()
            .map(|v| self.influence(&v.expert_id))
            .sum::<f64>()
            / votes.len() as f64;

        let mut flipped = 0;
        for v in votes.iter_mut() {
            if v.keep != verdict_keep && self.influence(&v.expert_id) < mean_influence {
                v.keep = verdict_keep;
                v.arbitrated = true;
                v.rationale = format!(
                    "{} [arbitration: vote revised to {} by chair weighting]",
                    v.rationale,
                    if verdict_keep { "KEEP" } else { "DROP" }
                );
                flipped += 1;
            }
        }
        flipped
    }

    /// Update influence and accuracy from final selection outcomes.
    pub fn record_outcome(&mut self, votes: &[DebateVote], accepted_ids: &HashSet<String>) {
        for v in votes {
            let was_accepted = accepted_ids.contains(&v.candidate_id);
            let agreed = v.keep == was_accepted;
            let record = self.record_mut(&v.expert_id);
            record.total += 1;
            if agreed {
                record.correct += 1;
                record.influence = (record.influence + INFLUENCE_STEP).min(INFLUENCE_MAX);
            } else {
                record.influence = (record.influence - INFLUENCE_STEP).max(INFLUENCE_MIN);
            }
        }
        self.total_votes += votes.len() as u64;
    }

    /// (expert_id, influence, accuracy) sorted by influence descending.
    pub fn rankings(&self) -> Vec<(String, f64, f64)> {
        let mut out: Vec<(String, f64, f64)> = self
            .experts
            .iter()
            .map(|(id, r)| {
                let accuracy = if r.total > 0 {
                    r.correct as f64 / r.total as f64
                } else {
                    0.0
                };
                (id.clone(), r.influence, accuracy)
            })
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    pub fn snapshot(&self) -> ChairSnapshot {
        let mut influence = HashMap::new();
        let mut accuracy = HashMap::new();
        for (id, r) in &self.experts {
            influence.insert(id.clone(), r.influence);
            accuracy.insert(
                id.clone(),
                if r.total > 0 {
                    r.correct as f64 / r.total as f64
                } else {
                    0.0
                },
            );
        }
        ChairSnapshot {
            influence,
            accuracy,
            total_votes: self.total_votes,
        }
    }

    /// Restore influence from a persisted snapshot, discarding out-of-range
    /// values. Accuracy counters restart from zero — they are derived
    /// observations, not authority.
    pub fn restore(&mut self, snapshot: ChairSnapshot) {
        for (id, influence) in snapshot.influence {
            if influence.is_finite() && (INFLUENCE_MIN..=INFLUENCE_MAX).contains(&influence) {
                self.record_mut(&id).influence = influence;
            } else {
                tracing::warn!(expert = %id, influence, "Discarding invalid chair influence");
            }
        }
        self.total_votes = snapshot.total_votes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(expert: &str, candidate: &str, keep: bool, confidence: f64) -> DebateVote {
        DebateVote {
            expert_id: expert.to_string(),
            candidate_id: candidate.to_string(),
            keep,
            confidence,
            rationale: "base rationale".to_string(),
            risk_note: String::new(),
            arbitrated: false,
        }
    }

    #[test]
    fn unanimous_votes_are_not_arbitrated() {
        let chair = DebateChair::new();
        let mut votes = vec![vote("e1", "c1", true, 0.8), vote("e2", "c1", true, 0.7)];
        assert_eq!(chair.arbitrate(&mut votes), 0);
        assert!(votes.iter().all(|v| !v.arbitrated));
    }

    #[test]
    fn low_influence_dissenter_gets_flipped() {
        let mut chair = DebateChair::new();
        // Give e1 and e2 higher influence through correct outcomes.
        let history = vec![vote("e1", "x", true, 0.9), vote("e2", "x", true, 0.9)];
        let accepted: HashSet<String> = ["x".to_string()].into();
        for _ in 0..10 {
            chair.record_outcome(&history, &accepted);
        }

        let mut votes = vec![
            vote("e1", "c1", true, 0.9),
            vote("e2", "c1", true, 0.9),
            vote("e3", "c1", false, 0.6),
        ];
        let flipped = chair.arbitrate(&mut votes);
        assert_eq!(flipped, 1);
        assert!(votes[2].keep);
        assert!(votes[2].arbitrated);
        assert!(votes[2].rationale.contains("arbitration"));
    }

    #[test]
    fn influence_bounded_and_accuracy_tracked() {
        let mut chair = DebateChair::new();
        let accepted: HashSet<String> = ["c1".to_string()].into();
        for _ in 0..500 {
            chair.record_outcome(&[vote("good", "c1", true, 0.9)], &accepted);
            chair.record_outcome(&[vote("bad", "c1", false, 0.9)], &accepted);
        }
        let rankings = chair.rankings();
        let good = rankings.iter().find(|(id, _, _)| id == "good").unwrap();
        let bad = rankings.iter().find(|(id, _, _)| id == "bad").unwrap();
        assert!((good.1 - INFLUENCE_MAX).abs() < 1e-9);
        assert!((bad.1 - INFLUENCE_MIN).abs() < 1e-9);
        assert!((good.2 - 1.0).abs() < 1e-9);
        assert_eq!(bad.2, 0.0);
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut chair = DebateChair::new();
        let accepted: HashSet<String> = ["c1".to_string()].into();
        chair.record_outcome(&[vote("e1", "c1", true, 0.9)], &accepted);
        let snap = chair.snapshot();

        let mut restored = DebateChair::new();
        restored.restore(snap.clone());
        assert!((restored.influence("e1") - chair.influence("e1")).abs() < 1e-9);
        assert_eq!(restored.snapshot().total_votes, snap.total_votes);
    }

    #[test]
    fn restore_rejects_out_of_range_influence() {
        let mut chair = DebateChair::new();
        let snap = ChairSnapshot {
            influence: HashMap::from([("evil".to_string(), 99.0)]),
            accuracy: HashMap::new(),
            total_votes: 0,
        };
        chair.restore(snap);
        assert_eq!(chair.influence("evil"), 1.0);
    }
}
