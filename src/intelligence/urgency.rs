//! Urgency and lifecycle detection.
//!
//! Three signals combine into an urgency level:
//! 1. Keyword scan of title+summary against configured urgency lists
//! 2. Velocity — distinct sources covering the same topic inside the window
//! 3. Recency — very fresh items are at least elevated
//!
//! Lifecycle stages follow topic activity across requests: first sighting is
//! developing, rising velocity is breaking, stable coverage is ongoing,
//! novelty collapse is waning, and a topic stale for a full window resolves.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::Utc;
use lru::LruCache;

use crate::config::{IntelligenceConfig, UrgencyKeywords};
use crate::types::{CandidateItem, StoryLifecycle, UrgencyLevel};

/// Per-topic activity carried across requests.
#[derive(Debug, Clone)]
struct TopicActivity {
    last_velocity: f64,
}

pub struct BreakingDetector {
    keywords: UrgencyKeywords,
    velocity_window_minutes: i64,
    breaking_source_threshold: usize,
    recency_elevated_minutes: i64,
    waning_novelty_threshold: f64,
    topics: Mutex<LruCache<String, TopicActivity>>,
}

impl BreakingDetector {
    pub fn new(intel: &IntelligenceConfig, keywords: UrgencyKeywords) -> Self {
        let cap = NonZeroUsize::new(intel.max_tracked_topics.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            keywords,
            velocity_window_minutes: intel.velocity_window_minutes,
            breaking_source_threshold: intel.breaking_source_threshold,
            recency_elevated_minutes: intel.recency_elevated_minutes,
            waning_novelty_threshold: intel.waning_novelty_threshold,
            topics: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Classify urgency and lifecycle for every candidate in place.
    pub fn assess(&self, candidates: &mut [CandidateItem]) {
        let now = Utc::now();

        // Velocity per topic: distinct sources within the window.
        let mut velocity: std::collections::HashMap<String, std::collections::HashSet<String>> =
            std::collections::HashMap::new();
        for c in candidates.iter() {
            let age_minutes = (now - c.created_at).num_minutes();
            if age_minutes <= self.velocity_window_minutes {
                velocity
                    .entry(c.topic.clone())
                    .or_default()
                    .insert(c.source.clone());
            }
        }

        let mut topics = lock_topics(&self.topics);

        for c in candidates.iter_mut() {
            let topic_velocity = velocity.get(&c.topic).map_or(0, |sources| sources.len());
            let age_minutes = (now - c.created_at).num_minutes();

            let mut urgency = self.keyword_urgency(c);
            if topic_velocity >= self.breaking_source_threshold {
                urgency = urgency.escalate();
            }
            if age_minutes <= self.recency_elevated_minutes {
                urgency = urgency.max(UrgencyLevel::Elevated);
            }
            c.urgency = urgency;

            c.lifecycle = match topics.peek(&c.topic) {
                None => StoryLifecycle::Developing,
                Some(prev) => {
                    let v = topic_velocity as f64;
                    if v > prev.last_velocity && topic_velocity >= self.breaking_source_threshold {
                        StoryLifecycle::Breaking
                    } else if c.novelty_score < self.waning_novelty_threshold {
                        StoryLifecycle::Waning
                    } else if age_minutes > self.velocity_window_minutes && topic_velocity <= 1 {
                        StoryLifecycle::Resolved
                    } else {
                        StoryLifecycle::Ongoing
                    }
                }
            };
        }

        // Record activity after classification so lifecycle sees prior state.
        for (topic, sources) in velocity {
            topics.put(
                topic,
                TopicActivity {
                    last_velocity: sources.len() as f64,
                },
            );
        }
    }

    fn keyword_urgency(&self, c: &CandidateItem) -> UrgencyLevel {
        let text = format!("{} {}", c.title, c.summary).to_lowercase();
        if self.keywords.critical.iter().any(|k| text.contains(k.as_str())) {
            UrgencyLevel::Critical
        } else if self.keywords.breaking.iter().any(|k| text.contains(k.as_str())) {
            UrgencyLevel::Breaking
        } else if self.keywords.elevated.iter().any(|k| text.contains(k.as_str())) {
            UrgencyLevel::Elevated
        } else {
            UrgencyLevel::Routine
        }
    }
}

fn lock_topics(
    m: &Mutex<LruCache<String, TopicActivity>>,
) -> std::sync::MutexGuard<'_, LruCache<String, TopicActivity>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
