//! Per-user configuration and learned state.
//!
//! Profiles are mutated only through `PreferenceStore`, which bumps the
//! `version` counter under its lock. Restored snapshots pass through
//! `validate_and_clamp()` so corrupt persisted data can never crash startup
//! or grow past the list caps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Cap on topic/source weight map entries.
pub const MAX_WEIGHTS: usize = 100;
/// Cap on tracked stories.
pub const MAX_TRACKED_STORIES: usize = 20;
/// Cap on saved bookmarks.
pub const MAX_BOOKMARKS: usize = 50;
/// Cap on user-added custom sources.
pub const MAX_CUSTOM_SOURCES: usize = 10;

/// A story the user follows across briefings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrackedStory {
    pub topic: String,
    pub keywords: Vec<String>,
    pub headline: String,
    pub tracked_at: f64,
}

/// A story saved for later reading.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Bookmark {
    pub title: String,
    pub source: String,
    pub url: String,
    pub topic: String,
    pub saved_at: f64,
}

/// A user-added feed injected into the research roster.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CustomSource {
    pub name: String,
    pub feed_url: String,
    pub topics: Vec<String>,
    pub added_at: f64,
    pub items_seen: u64,
}

/// A named snapshot of briefing settings the user can switch between.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Preset {
    pub topic_weights: HashMap<String, f64>,
    pub source_weights: HashMap<String, f64>,
    pub tone: String,
    pub format: String,
    pub max_items: usize,
    pub regions: Vec<String>,
    pub confidence_min: f64,
    pub urgency_min: String,
    pub max_per_source: usize,
    pub muted_topics: Vec<String>,
}

/// Per-user configuration and learned state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub user_id: String,
    /// Topic interest weights in [-1, 1].
    pub topic_weights: HashMap<String, f64>,
    /// Source boost/demote weights in [-2, 2].
    pub source_weights: HashMap<String, f64>,
    pub tone: String,
    pub format: String,
    pub max_items: usize,
    pub briefing_cadence: String,
    pub timezone: String,
    pub regions_of_interest: Vec<String>,
    pub watchlist_crypto: Vec<String>,
    pub watchlist_stocks: Vec<String>,
    pub muted_topics: Vec<String>,
    pub tracked_stories: Vec<TrackedStory>,
    pub bookmarks: Vec<Bookmark>,
    pub email: String,
    pub webhook_url: String,
    /// Only show stories with confidence mid >= this (0.0 = off).
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence_min: f64,
    /// Only show stories at or above this urgency ("" = off).
    pub urgency_min: String,
    /// Limit stories from a single source (0 = no limit).
    pub max_per_source: usize,
    #[serde(deserialize_with = "lenient_f64")]
    pub alert_georisk_threshold: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub alert_trend_threshold: f64,
    pub alert_keywords: Vec<String>,
    pub presets: HashMap<String, Preset>,
    pub custom_sources: Vec<CustomSource>,
    /// Optimistic-concurrency token. Bumped by every mutation under the
    /// store lock; `update_if_current` compares against it.
    pub version: u64,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            topic_weights: HashMap::new(),
            source_weights: HashMap::new(),
            tone: "concise".to_string(),
            format: "bullet".to_string(),
            max_items: 10,
            briefing_cadence: "on_demand".to_string(),
            timezone: "UTC".to_string(),
            regions_of_interest: Vec::new(),
            watchlist_crypto: Vec::new(),
            watchlist_stocks: Vec::new(),
            muted_topics: Vec::new(),
            tracked_stories: Vec::new(),
            bookmarks: Vec::new(),
            email: String::new(),
            webhook_url: String::new(),
            confidence_min: 0.0,
            urgency_min: String::new(),
            max_per_source: 0,
            alert_georisk_threshold: 0.5,
            alert_trend_threshold: 3.0,
            alert_keywords: Vec::new(),
            presets: HashMap::new(),
            custom_sources: Vec::new(),
            version: 0,
        }
    }
}

impl UserProfile {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    /// Enforce list caps and repair invalid floats. Applied after restoring
    /// a persisted snapshot; also safe to call on live profiles.
    ///
    /// Lists over cap keep their most recent entries. Weight maps over cap
    /// first prune zero-weight entries, then drop arbitrary excess.
    pub fn validate_and_clamp(&mut self) {
        clamp_weight_map(&mut self.topic_weights, -1.0, 1.0);
        clamp_weight_map(&mut self.source_weights, -2.0, 2.0);

        keep_last(&mut self.tracked_stories, MAX_TRACKED_STORIES);
        keep_last(&mut self.bookmarks, MAX_BOOKMARKS);
        keep_last(&mut self.custom_sources, MAX_CUSTOM_SOURCES);

        if !self.confidence_min.is_finite() || !(0.0..=1.0).contains(&self.confidence_min) {
            self.confidence_min = 0.0;
        }
        if !self.alert_georisk_threshold.is_finite() {
            self.alert_georisk_threshold = 0.5;
        }
        if !self.alert_trend_threshold.is_finite() {
            self.alert_trend_threshold = 3.0;
        }
        if self.max_items == 0 || self.max_items > 50 {
            self.max_items = 10;
        }
    }
}

/// Accept numbers, numeric strings, or garbage ("nan", null) — anything
/// unparseable becomes 0.0 and is repaired by `validate_and_clamp`.
/// Persisted snapshots from older builds must never fail a whole profile.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn keep_last<T>(list: &mut Vec<T>, cap: usize) {
    if list.len() > cap {
        list.drain(..list.len() - cap);
    }
}

fn clamp_weight_map(map: &mut HashMap<String, f64>, lo: f64, hi: f64) {
    for w in map.values_mut() {
        *w = if w.is_finite() { w.clamp(lo, hi) } else { 0.0 };
    }
    if map.len() > MAX_WEIGHTS {
        map.retain(|_, w| *w != 0.0);
    }
    if map.len() > MAX_WEIGHTS {
        let excess: Vec<String> = map
            .keys()
            .skip(MAX_WEIGHTS)
            .cloned()
            .collect();
        for k in excess {
            map.remove(&k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let p = UserProfile::new("u1");
        assert_eq!(p.tone, "concise");
        assert_eq!(p.max_items, 10);
        assert_eq!(p.version, 0);
    }

    #[test]
    fn clamp_caps_lists_keeping_recent() {
        let mut p = UserProfile::new("u1");
        for i in 0..1000 {
            p.tracked_stories.push(TrackedStory {
                topic: format!("t{i}"),
                ..TrackedStory::default()
            });
        }
        p.validate_and_clamp();
        assert_eq!(p.tracked_stories.len(), MAX_TRACKED_STORIES);
        assert_eq!(p.tracked_stories.last().unwrap().topic, "t999");
    }

    #[test]
    fn clamp_repairs_nan_confidence() {
        let mut p = UserProfile::new("u1");
        p.confidence_min = f64::NAN;
        p.alert_trend_threshold = f64::INFINITY;
        p.validate_and_clamp();
        assert_eq!(p.confidence_min, 0.0);
        assert_eq!(p.alert_trend_threshold, 3.0);
    }

    #[test]
    fn clamp_bounds_weights() {
        let mut p = UserProfile::new("u1");
        p.topic_weights.insert("a".to_string(), 5.0);
        p.topic_weights.insert("b".to_string(), f64::NAN);
        p.source_weights.insert("s".to_string(), -9.0);
        p.validate_and_clamp();
        assert_eq!(p.topic_weights["a"], 1.0);
        assert_eq!(p.topic_weights["b"], 0.0);
        assert_eq!(p.source_weights["s"], -2.0);
    }

    #[test]
    fn weight_map_capped_with_zero_pruning() {
        let mut p = UserProfile::new("u1");
        for i in 0..150 {
            let w = if i % 2 == 0 { 0.0 } else { 0.5 };
            p.topic_weights.insert(format!("topic{i}"), w);
        }
        p.validate_and_clamp();
        assert!(p.topic_weights.len() <= MAX_WEIGHTS);
        // Zero-weight entries were pruned first
        assert!(p.topic_weights.values().all(|w| *w != 0.0));
    }

    #[test]
    fn profile_roundtrips_through_json() {
        let mut p = UserProfile::new("u1");
        p.topic_weights.insert("geopolitics".to_string(), 0.8);
        p.version = 7;
        let json = serde_json::to_string(&p).unwrap();
        let back: UserProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, 7);
        assert_eq!(back.topic_weights["geopolitics"], 0.8);
    }
}
