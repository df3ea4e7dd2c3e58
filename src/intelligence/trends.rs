//! Topic trend detection.
//!
//! Velocity per topic is compared against an exponentially decayed baseline.
//! The baseline carries a floor of 0.1: without it, a long quiet spell decays
//! the baseline toward zero and the first new item produces an absurd
//! anomaly score. With the floor, `anomaly_score <= velocity / 0.1` always.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::Utc;
use lru::LruCache;

use crate::types::{CandidateItem, TrendSnapshot};

/// Baseline floor preventing division spikes after heavy decay.
const BASELINE_FLOOR: f64 = 0.1;

pub struct TrendDetector {
    window_minutes: i64,
    anomaly_threshold: f64,
    baseline_decay: f64,
    baselines: Mutex<LruCache<String, f64>>,
}

impl TrendDetector {
    pub fn new(
        window_minutes: i64,
        anomaly_threshold: f64,
        baseline_decay: f64,
        max_topics: usize,
    ) -> Self {
        let cap = NonZeroUsize::new(max_topics.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            window_minutes,
            anomaly_threshold,
            baseline_decay,
            baselines: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Compute per-topic velocity, update baselines, and emit snapshots
    /// sorted by anomaly score descending.
    pub fn analyze(&self, candidates: &[CandidateItem]) -> Vec<TrendSnapshot> {
        let now = Utc::now();
        let mut velocity: HashMap<String, f64> = HashMap::new();
        for c in candidates {
            if (now - c.created_at).num_minutes() <= self.window_minutes {
                *velocity.entry(c.topic.clone()).or_insert(0.0) += 1.0;
            }
        }

        let mut baselines = lock_baselines(&self.baselines);
        let mut snapshots: Vec<TrendSnapshot> = Vec::new();

        for (topic, v) in velocity {
            let prior = baselines.get(&topic).copied().unwrap_or(v).max(BASELINE_FLOOR);
            let anomaly = v / prior.max(BASELINE_FLOOR);
            let updated =
                (self.baseline_decay * prior + (1.0 - self.baseline_decay) * v).max(BASELINE_FLOOR);
            baselines.put(topic.clone(), updated);

            snapshots.push(TrendSnapshot {
                topic,
                velocity: v,
                baseline_velocity: prior,
                anomaly_score: anomaly,
                is_emerging: anomaly >= self.anomaly_threshold && v > 0.0,
                sample_window_minutes: self.window_minutes,
            });
        }

        snapshots.sort_by(|a, b| {
            b.anomaly_score
                .partial_cmp(&a.anomaly_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        snapshots
    }

    /// Snapshot of per-topic baselines, for persistence.
    pub fn snapshot(&self) -> HashMap<String, f64> {
        let mut baselines = lock_baselines(&self.baselines);
        baselines.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Restore persisted baselines, discarding non-finite values and
    /// applying the floor.
    pub fn restore(&self, data: HashMap<String, f64>) {
        let mut baselines = lock_baselines(&self.baselines);
        for (topic, baseline) in data {
            if baseline.is_finite() && baseline >= 0.0 {
                baselines.put(topic, baseline.max(BASELINE_FLOOR));
            } else {
                tracing::warn!(topic = %topic, baseline, "Discarding invalid trend baseline");
            }
        }
    }

    /// Force a baseline value. Test hook for anomaly-bound verification.
    #[cfg(test)]
    pub(crate) fn set_baseline(&self, topic: &str, value: f64) {
        lock_baselines(&self.baselines).put(topic.to_string(), value);
    }
}

fn lock_baselines(
    m: &Mutex<LruCache<String, f64>>,
) -> std::sync::MutexGuard<'_, LruCache<String, f64>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
