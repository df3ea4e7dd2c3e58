//! Preference store and candidate reserve cache.
//!
//! The store guards all profiles behind one mutex. Every mutator runs its
//! change and the version bump inside the lock, which is what makes the
//! `version` counter a usable optimistic-concurrency token:
//! `update_if_current` compares the caller's expected version under the
//! same lock and refuses to mutate on mismatch.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, Utc};
use lru::LruCache;

use crate::types::{
    Bookmark, CandidateItem, TrackedStory, UserProfile, MAX_BOOKMARKS, MAX_TRACKED_STORIES,
};

/// Cap on cached user+topic reserve entries.
const CACHE_ENTRY_CAP: usize = 500;

const STOP_WORDS: [&str; 56] = [
    "a", "an", "the", "in", "on", "at", "to", "for", "of", "and", "or", "is", "are", "was",
    "were", "be", "been", "has", "have", "had", "do", "does", "did", "will", "would", "could",
    "should", "may", "might", "with", "from", "by", "as", "into", "about", "over", "after",
    "before", "between", "under", "up", "down", "out", "new", "says", "said", "its", "it",
    "that", "this", "but", "not", "no", "what", "how", "why",
];

/// Extract meaningful keywords from a headline for story tracking.
pub fn extract_keywords(headline: &str) -> Vec<String> {
    headline
        .to_lowercase()
        .split(|ch: char| !ch.is_ascii_alphabetic())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn matches_tracked(topic: &str, title: &str, tracked: &TrackedStory) -> bool {
    if topic != tracked.topic {
        return false;
    }
    let title_words: std::collections::HashSet<String> =
        extract_keywords(title).into_iter().collect();
    let overlap = tracked
        .keywords
        .iter()
        .filter(|k| title_words.contains(*k))
        .count();
    overlap >= 2
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub struct PreferenceStore {
    profiles: Mutex<HashMap<String, UserProfile>>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
        }
    }

    fn with_profile<F, R>(&self, user_id: &str, mutate: F) -> R
    where
        F: FnOnce(&mut UserProfile) -> R,
    {
        let mut profiles = lock_profiles(&self.profiles);
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id));
        // Bump first so clones returned by the mutator carry the new version.
        profile.version += 1;
        mutate(profile)
    }

    /// Fetch a profile, creating it lazily. Reads do not bump the version.
    pub fn get_or_create(&self, user_id: &str) -> UserProfile {
        let mut profiles = lock_profiles(&self.profiles);
        profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id))
            .clone()
    }

    /// Optimistic update: applies `mutate` and bumps the version only when
    /// the caller's expected version still matches. Returns the updated
    /// profile, or None on version mismatch (no mutation performed).
    pub fn update_if_current<F>(
        &self,
        user_id: &str,
        expected_version: u64,
        mutate: F,
    ) -> Option<UserProfile>
    where
        F: FnOnce(&mut UserProfile),
    {
        let mut profiles = lock_profiles(&self.profiles);
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id));
        if profile.version != expected_version {
            return None;
        }
        mutate(profile);
        profile.version += 1;
        Some(profile.clone())
    }

    pub fn apply_weight_adjustment(&self, user_id: &str, topic: &str, delta: f64) -> UserProfile {
        self.with_profile(user_id, |p| {
            let current = p.topic_weights.get(topic).copied().unwrap_or(0.0);
            let updated = ((current + delta).clamp(-1.0, 1.0) * 1000.0).round() / 1000.0;
            p.topic_weights.insert(topic.to_string(), updated);
            p.clone()
        })
    }

    pub fn apply_source_weight(&self, user_id: &str, source: &str, delta: f64) -> UserProfile {
        self.with_profile(user_id, |p| {
            let current = p.source_weights.get(source).copied().unwrap_or(0.0);
            let updated = ((current + delta).clamp(-2.0, 2.0) * 1000.0).round() / 1000.0;
            p.source_weights.insert(source.to_string(), updated);
            p.clone()
        })
    }

    pub fn apply_style_update(
        &self,
        user_id: &str,
        tone: Option<&str>,
        format: Option<&str>,
    ) -> UserProfile {
        self.with_profile(user_id, |p| {
            if let Some(tone) = tone {
                p.tone = tone.to_string();
            }
            if let Some(format) = format {
                p.format = format.to_string();
            }
            p.clone()
        })
    }

    pub fn apply_region(&self, user_id: &str, region: &str) -> UserProfile {
        self.with_profile(user_id, |p| {
            if !p.regions_of_interest.iter().any(|r| r == region) {
                p.regions_of_interest.push(region.to_string());
            }
            p.clone()
        })
    }

    pub fn remove_region(&self, user_id: &str, region: &str) -> UserProfile {
        self.with_profile(user_id, |p| {
            p.regions_of_interest.retain(|r| r != region);
            p.clone()
        })
    }

    pub fn apply_cadence(&self, user_id: &str, cadence: &str) -> UserProfile {
        self.with_profile(user_id, |p| {
            p.briefing_cadence = cadence.to_string();
            p.clone()
        })
    }

    pub fn apply_max_items(&self, user_id: &str, max_items: usize) -> UserProfile {
        self.with_profile(user_id, |p| {
            p.max_items = max_items.clamp(1, 50);
            p.clone()
        })
    }

    pub fn mute_topic(&self, user_id: &str, topic: &str) -> UserProfile {
        self.with_profile(user_id, |p| {
            if !p.muted_topics.iter().any(|t| t == topic) {
                p.muted_topics.push(topic.to_string());
            }
            p.clone()
        })
    }

    pub fn unmute_topic(&self, user_id: &str, topic: &str) -> UserProfile {
        self.with_profile(user_id, |p| {
            p.muted_topics.retain(|t| t != topic);
            p.clone()
        })
    }

    /// Track a story for cross-briefing continuity. No-op when a similar
    /// story is already tracked.
    pub fn track_story(&self, user_id: &str, topic: &str, headline: &str) -> UserProfile {
        self.with_profile(user_id, |p| {
            let keywords = extract_keywords(headline);
            if keywords.is_empty()
                || p.tracked_stories
                    .iter()
                    .any(|t| matches_tracked(topic, headline, t))
            {
                return p.clone();
            }
            p.tracked_stories.push(TrackedStory {
                topic: topic.to_string(),
                keywords,
                headline: headline.to_string(),
                tracked_at: epoch_secs(),
            });
            if p.tracked_stories.len() > MAX_TRACKED_STORIES {
                let excess = p.tracked_stories.len() - MAX_TRACKED_STORIES;
                p.tracked_stories.drain(..excess);
            }
            p.clone()
        })
    }

    pub fn untrack_story(&self, user_id: &str, index: usize) -> UserProfile {
        self.with_profile(user_id, |p| {
            if index >= 1 && index <= p.tracked_stories.len() {
                p.tracked_stories.remove(index - 1);
            }
            p.clone()
        })
    }

    pub fn save_bookmark(
        &self,
        user_id: &str,
        title: &str,
        source: &str,
        url: &str,
        topic: &str,
    ) -> UserProfile {
        self.with_profile(user_id, |p| {
            if p.bookmarks.iter().any(|b| b.title == title) {
                return p.clone();
            }
            p.bookmarks.push(Bookmark {
                title: title.to_string(),
                source: source.to_string(),
                url: url.to_string(),
                topic: topic.to_string(),
                saved_at: epoch_secs(),
            });
            if p.bookmarks.len() > MAX_BOOKMARKS {
                let excess = p.bookmarks.len() - MAX_BOOKMARKS;
                p.bookmarks.drain(..excess);
            }
            p.clone()
        })
    }

    pub fn set_email(&self, user_id: &str, email: &str) -> UserProfile {
        self.with_profile(user_id, |p| {
            p.email = email.trim().to_string();
            p.clone()
        })
    }

    pub fn set_webhook(&self, user_id: &str, url: &str) -> UserProfile {
        self.with_profile(user_id, |p| {
            p.webhook_url = url.trim().to_string();
            p.clone()
        })
    }

    /// Reset weights and style to defaults. Watchlists, tracked stories,
    /// bookmarks, and email survive — those are data, not weights.
    pub fn reset(&self, user_id: &str) -> UserProfile {
        self.with_profile(user_id, |p| {
            p.topic_weights.clear();
            p.source_weights.clear();
            p.regions_of_interest.clear();
            p.muted_topics.clear();
            p.tone = "concise".to_string();
            p.format = "bullet".to_string();
            p.max_items = 10;
            p.briefing_cadence = "on_demand".to_string();
            p.timezone = "UTC".to_string();
            p.clone()
        })
    }

    /// Full snapshot for persistence.
    pub fn snapshot(&self) -> HashMap<String, UserProfile> {
        lock_profiles(&self.profiles).clone()
    }

    /// Restore from raw persisted JSON, discarding profiles that fail to
    /// deserialize instead of failing the whole restore.
    pub fn restore_snapshot(&self, data: HashMap<String, serde_json::Value>) {
        let mut profiles: HashMap<String, UserProfile> = HashMap::new();
        for (user_id, raw) in data {
            match serde_json::from_value::<UserProfile>(raw) {
                Ok(profile) => {
                    profiles.insert(user_id, profile);
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Discarding unreadable profile");
                }
            }
        }
        self.restore(profiles);
    }

    /// Restore a persisted snapshot. Every profile passes validation; list
    /// caps are enforced and bad floats repaired rather than trusted.
    pub fn restore(&self, data: HashMap<String, UserProfile>) {
        let mut profiles = lock_profiles(&self.profiles);
        let count = data.len();
        for (user_id, mut profile) in data {
            profile.user_id = user_id.clone();
            profile.validate_and_clamp();
            profiles.insert(user_id, profile);
        }
        tracing::info!(users = count, "Preferences restored from disk");
    }
}

impl Default for PreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_profiles(
    m: &Mutex<HashMap<String, UserProfile>>,
) -> std::sync::MutexGuard<'_, HashMap<String, UserProfile>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// Candidate reserve cache
// ============================================================================

/// Caches reserve candidates per user+topic for "show more" requests.
/// Entries go stale after a configured age; the table itself is LRU-bounded.
pub struct CandidateCache {
    entries: Mutex<LruCache<String, Vec<CandidateItem>>>,
    stale_after: Duration,
}

impl CandidateCache {
    pub fn new(stale_after_minutes: i64) -> Self {
        let cap = NonZeroUsize::new(CACHE_ENTRY_CAP).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            stale_after: Duration::minutes(stale_after_minutes),
        }
    }

    fn key(user_id: &str, topic: &str) -> String {
        format!("{user_id}:{topic}")
    }

    pub fn put(&self, user_id: &str, topic: &str, candidates: Vec<CandidateItem>) {
        lock_entries(&self.entries).put(Self::key(user_id, topic), candidates);
    }

    /// Fresh candidates for a user+topic.
    pub fn get_fresh(&self, user_id: &str, topic: &str) -> Vec<CandidateItem> {
        let now = Utc::now();
        let mut entries = lock_entries(&self.entries);
        entries
            .get(&Self::key(user_id, topic))
            .map(|list| {
                list.iter()
                    .filter(|c| now - c.created_at <= self.stale_after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Unseen fresh candidates ranked by composite score.
    pub fn get_more(
        &self,
        user_id: &str,
        topic: &str,
        already_seen: &std::collections::HashSet<String>,
        limit: usize,
    ) -> Vec<CandidateItem> {
        let mut unseen: Vec<CandidateItem> = self
            .get_fresh(user_id, topic)
            .into_iter()
            .filter(|c| !already_seen.contains(&c.candidate_id))
            .collect();
        unseen.sort_by(|a, b| {
            b.composite_score()
                .partial_cmp(&a.composite_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        unseen.truncate(limit);
        unseen
    }

    pub fn entry_count(&self) -> usize {
        lock_entries(&self.entries).len()
    }
}

fn lock_entries(
    m: &Mutex<LruCache<String, Vec<CandidateItem>>>,
) -> std::sync::MutexGuard<'_, LruCache<String, Vec<CandidateItem>>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StoryLifecycle, UrgencyLevel};

    fn make_candidate(id: &str, score: f64, age_minutes: i64) -> CandidateItem {
        CandidateItem {
            candidate_id: id.to_string(),
            title: format!("Title {id}"),
            source: "reuters".to_string(),
            summary: String::new(),
            url: String::new(),
            topic: "markets".to_string(),
            evidence_score: score,
            novelty_score: score,
            preference_fit: score,
            prediction_signal: score,
            discovered_by: "agent_reuters".to_string(),
            created_at: Utc::now() - Duration::minutes(age_minutes),
            lifecycle: StoryLifecycle::Developing,
            urgency: UrgencyLevel::Routine,
            regions: Vec::new(),
            corroborated_by: Vec::new(),
            contrarian_signal: String::new(),
        }
    }

    #[test]
    fn every_mutation_bumps_version() {
        let store = PreferenceStore::new();
        let before = store.get_or_create("u1").version;
        store.apply_weight_adjustment("u1", "geopolitics", 0.2);
        store.apply_style_update("u1", Some("analyst"), None);
        store.apply_region("u1", "middle_east");
        let after = store.get_or_create("u1").version;
        assert_eq!(after, before + 3);
    }

    #[test]
    fn weight_adjustment_clamps() {
        let store = PreferenceStore::new();
        for _ in 0..10 {
            store.apply_weight_adjustment("u1", "tech", 0.3);
        }
        assert_eq!(store.get_or_create("u1").topic_weights["tech"], 1.0);
        for _ in 0..20 {
            store.apply_weight_adjustment("u1", "tech", -0.3);
        }
        assert_eq!(store.get_or_create("u1").topic_weights["tech"], -1.0);
    }

    #[test]
    fn update_if_current_detects_conflicts() {
        let store = PreferenceStore::new();
        let profile = store.get_or_create("u1");

        let updated = store.update_if_current("u1", profile.version, |p| {
            p.tone = "analyst".to_string();
        });
        assert!(updated.is_some());

        // Same expected version again — stale now.
        let stale = store.update_if_current("u1", profile.version, |p| {
            p.tone = "executive".to_string();
        });
        assert!(stale.is_none());
        assert_eq!(store.get_or_create("u1").tone, "analyst");
    }

    #[test]
    fn track_story_dedupes_and_caps() {
        let store = PreferenceStore::new();
        store.track_story("u1", "markets", "Central bank raises interest rates");
        store.track_story("u1", "markets", "Central bank raises rates again");
        // Shares "central", "bank", "rates" keywords — treated as same story.
        assert_eq!(store.get_or_create("u1").tracked_stories.len(), 1);

        for i in 0..30 {
            store.track_story("u1", "markets", &format!("Unique{i} spectacle{i} event{i} occurs"));
        }
        assert!(store.get_or_create("u1").tracked_stories.len() <= MAX_TRACKED_STORIES);
    }

    #[test]
    fn reset_keeps_data_clears_weights() {
        let store = PreferenceStore::new();
        store.apply_weight_adjustment("u1", "tech", 0.5);
        store.save_bookmark("u1", "Saved story", "reuters", "https://r.test/1", "tech");
        store.reset("u1");
        let p = store.get_or_create("u1");
        assert!(p.topic_weights.is_empty());
        assert_eq!(p.bookmarks.len(), 1);
    }

    #[test]
    fn restore_validates_profiles() {
        let store = PreferenceStore::new();
        let mut bad = UserProfile::new("u1");
        bad.confidence_min = f64::NAN;
        for i in 0..1000 {
            bad.tracked_stories.push(TrackedStory {
                topic: format!("t{i}"),
                ..TrackedStory::default()
            });
        }
        store.restore(HashMap::from([("u1".to_string(), bad)]));
        let p = store.get_or_create("u1");
        assert_eq!(p.confidence_min, 0.0);
        assert_eq!(p.tracked_stories.len(), MAX_TRACKED_STORIES);
    }

    #[test]
    fn cache_filters_stale_and_ranks() {
        let cache = CandidateCache::new(180);
        cache.put(
            "u1",
            "markets",
            vec![
                make_candidate("fresh_low", 0.3, 10),
                make_candidate("fresh_high", 0.9, 10),
                make_candidate("stale", 0.9, 500),
            ],
        );
        let seen = std::collections::HashSet::new();
        let more = cache.get_more("u1", "markets", &seen, 5);
        assert_eq!(more.len(), 2);
        assert_eq!(more[0].candidate_id, "fresh_high");
    }

    #[test]
    fn cache_excludes_seen() {
        let cache = CandidateCache::new(180);
        cache.put("u1", "markets", vec![make_candidate("a", 0.5, 1)]);
        let seen: std::collections::HashSet<String> = ["a".to_string()].into();
        assert!(cache.get_more("u1", "markets", &seen, 5).is_empty());
    }
}
