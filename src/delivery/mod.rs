//! Outbound delivery: webhooks and alert deduplication.
//!
//! Webhook payload shape is selected by URL heuristics (Slack, Discord,
//! generic JSON). SSRF validation re-runs at delivery time because DNS and
//! stored URLs can change between configuration and delivery. A per-user
//! failure counter disables a webhook after five consecutive failures.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use thiserror::Error;

use crate::intelligence::enrichment::is_fetchable_url;
use crate::types::DeliveryPayload;

/// Consecutive failures before a user's webhook is disabled.
const WEBHOOK_FAILURE_LIMIT: u32 = 5;
/// Cap on tracked users in the failure table.
const FAILURE_TABLE_CAP: usize = 500;
/// Alert cooldown window.
pub const ALERT_COOLDOWN: Duration = Duration::from_secs(3600);

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook url failed validation")]
    InvalidUrl,
    #[error("webhook delivery failed: {0}")]
    Transport(String),
    #[error("webhook disabled after {WEBHOOK_FAILURE_LIMIT} consecutive failures")]
    Disabled,
}

/// Webhook payload provider, inferred from the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    Slack,
    Discord,
    Generic,
}

fn provider_for(url: &str) -> Provider {
    if url.contains("hooks.slack.com") || url.contains("/services/") {
        Provider::Slack
    } else if url.contains("discord.com/api/webhooks") || url.contains("discordapp.com/api/webhooks")
    {
        Provider::Discord
    } else {
        Provider::Generic
    }
}

fn briefing_text(payload: &DeliveryPayload) -> String {
    let mut lines = vec![format!(
        "Briefing for {} — {} items ({})",
        payload.user_id,
        payload.items.len(),
        payload.briefing_type
    )];
    for (i, item) in payload.items.iter().take(10).enumerate() {
        lines.push(format!(
            "{}. {} [{}]",
            i + 1,
            item.candidate.title,
            item.candidate.source
        ));
    }
    lines.join("\n")
}

fn shape_body(provider: Provider, payload: &DeliveryPayload) -> serde_json::Value {
    match provider {
        Provider::Slack => serde_json::json!({ "text": briefing_text(payload) }),
        Provider::Discord => serde_json::json!({ "content": briefing_text(payload) }),
        Provider::Generic => serde_json::to_value(payload).unwrap_or_default(),
    }
}

pub struct WebhookDeliverer {
    client: reqwest::Client,
    failure_counts: Mutex<LruCache<String, u32>>,
}

impl WebhookDeliverer {
    pub fn new() -> Self {
        let cap = NonZeroUsize::new(FAILURE_TABLE_CAP).unwrap_or(NonZeroUsize::MIN);
        Self {
            client: reqwest::Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .unwrap_or_default(),
            failure_counts: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Deliver a briefing payload to a user's webhook.
    ///
    /// Returns `Disabled` once the user has hit the consecutive-failure
    /// limit; the caller should clear the stored webhook and notify the
    /// user. A successful delivery resets the counter.
    pub async fn deliver(
        &self,
        user_id: &str,
        webhook_url: &str,
        payload: &DeliveryPayload,
    ) -> Result<(), DeliveryError> {
        if self.failure_count(user_id) >= WEBHOOK_FAILURE_LIMIT {
            return Err(DeliveryError::Disabled);
        }
        // Re-validate at delivery time: DNS could have changed since the
        // URL was configured.
        if !is_fetchable_url(webhook_url) {
            self.record_failure(user_id);
            return Err(DeliveryError::InvalidUrl);
        }

        let body = shape_body(provider_for(webhook_url), payload);
        let result = self.client.post(webhook_url).json(&body).send().await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.reset_failures(user_id);
                tracing::debug!(user_id, "Webhook delivered");
                Ok(())
            }
            Ok(response) => {
                self.record_failure(user_id);
                Err(DeliveryError::Transport(format!(
                    "status {}",
                    response.status()
                )))
            }
            Err(e) => {
                self.record_failure(user_id);
                Err(DeliveryError::Transport(e.to_string()))
            }
        }
    }

    pub fn failure_count(&self, user_id: &str) -> u32 {
        lock_failures(&self.failure_counts)
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    fn record_failure(&self, user_id: &str) {
        let mut counts = lock_failures(&self.failure_counts);
        let next = counts.get(user_id).copied().unwrap_or(0) + 1;
        counts.put(user_id.to_string(), next);
        if next >= WEBHOOK_FAILURE_LIMIT {
            tracing::warn!(user_id, failures = next, "Webhook disabled for user");
        }
    }

    fn reset_failures(&self, user_id: &str) {
        lock_failures(&self.failure_counts).pop(user_id);
    }
}

impl Default for WebhookDeliverer {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_failures(
    m: &Mutex<LruCache<String, u32>>,
) -> std::sync::MutexGuard<'_, LruCache<String, u32>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// Alert deduplication
// ============================================================================

/// Suppresses duplicate alerts per `(user, type, key)` inside the cooldown
/// window.
///
/// Uses a presence check rather than a zero-timestamp sentinel: on a fresh
/// process the map is empty, so the first alert is never suppressed.
/// Expired entries are evicted on every check pass.
pub struct AlertDeduper {
    entries: Mutex<LruCache<String, Instant>>,
    cooldown: Duration,
}

impl AlertDeduper {
    pub fn new(cooldown: Duration) -> Self {
        let cap = NonZeroUsize::new(FAILURE_TABLE_CAP).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            cooldown,
        }
    }

    /// Whether an alert should be sent now. Recording happens on `true`.
    pub fn should_send(&self, user_id: &str, alert_type: &str, key: &str) -> bool {
        let mut entries = lock_entries(&self.entries);

        // Evict expired entries on every check pass.
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, sent)| sent.elapsed() >= self.cooldown)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            entries.pop(&k);
        }

        let dedup_key = format!("{user_id}:{alert_type}:{key}");
        if entries.contains(&dedup_key) {
            return false;
        }
        entries.put(dedup_key, Instant::now());
        true
    }
}

impl Default for AlertDeduper {
    fn default() -> Self {
        Self::new(ALERT_COOLDOWN)
    }
}

fn lock_entries(
    m: &Mutex<LruCache<String, Instant>>,
) -> std::sync::MutexGuard<'_, LruCache<String, Instant>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
