//! HTTP feed agent.
//!
//! Queries a JSON endpoint for candidate items. The endpoint contract is a
//! GET returning an array of objects with `title`, `summary`, `url`, and
//! optional per-item scores; missing fields get conservative defaults.
//! Malformed entries are skipped rather than failing the whole agent.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::ResearchAgent;
use crate::config::AgentConfig;
use crate::types::{CandidateItem, ResearchTask, StoryLifecycle, UrgencyLevel};

const FEED_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct FeedItem {
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    topic: String,
    #[serde(default = "default_score")]
    evidence_score: f64,
    #[serde(default = "default_score")]
    novelty_score: f64,
    #[serde(default = "default_score")]
    prediction_signal: f64,
}

fn default_score() -> f64 {
    0.5
}

pub struct FeedAgent {
    id: String,
    source: String,
    endpoint: String,
    topics: Vec<String>,
    client: reqwest::Client,
}

impl FeedAgent {
    pub fn new(cfg: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .user_agent("Mozilla/5.0 (compatible; Briefwire/1.0)")
            .build()
            .unwrap_or_default();
        Self {
            id: cfg.id.clone(),
            source: cfg.source.clone(),
            endpoint: cfg.endpoint.clone(),
            topics: cfg.topics.clone(),
            client,
        }
    }

    fn dominant_topic(&self, task: &ResearchTask) -> String {
        task.weighted_topics
            .iter()
            .filter(|(t, _)| self.topics.is_empty() || self.topics.contains(t))
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(t, _)| t.clone())
            .unwrap_or_else(|| "general".to_string())
    }
}

#[async_trait]
impl ResearchAgent for FeedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn source(&self) -> &str {
        &self.source
    }

    async fn search(&self, task: &ResearchTask, top_k: usize) -> Result<Vec<CandidateItem>> {
        let topic = self.dominant_topic(task);
        let limit = top_k.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("topic", topic.as_str()), ("limit", limit.as_str())])
            .send()
            .await
            .with_context(|| format!("feed request failed for {}", self.id))?
            .error_for_status()
            .with_context(|| format!("feed returned error status for {}", self.id))?;

        let items: Vec<serde_json::Value> = response
            .json()
            .await
            .with_context(|| format!("feed returned non-JSON body for {}", self.id))?;

        let topic_weight = task.weighted_topics.get(&topic).copied().unwrap_or(0.3);
        let mut candidates = Vec::new();
        for raw in items.into_iter().take(top_k) {
            let item: FeedItem = match serde_json::from_value(raw) {
                Ok(item) => item,
                Err(e) => {
                    tracing::debug!(agent_id = %self.id, error = %e, "Skipping malformed feed item");
                    continue;
                }
            };
            if item.title.trim().is_empty() {
                continue;
            }
            let digest = md5::compute(format!("{}:{}:{}", self.id, item.url, item.title));
            candidates.push(CandidateItem {
                candidate_id: format!("{digest:x}"),
                title: item.title,
                source: self.source.clone(),
                summary: item.summary,
                url: item.url,
                topic: if item.topic.is_empty() {
                    topic.clone()
                } else {
                    item.topic
                },
                evidence_score: item.evidence_score,
                novelty_score: item.novelty_score,
                preference_fit: (0.3 + topic_weight * 0.5).clamp(0.0, 1.0),
                prediction_signal: item.prediction_signal,
                discovered_by: self.id.clone(),
                created_at: Utc::now(),
                lifecycle: StoryLifecycle::Developing,
                urgency: UrgencyLevel::Routine,
                regions: Vec::new(),
                corroborated_by: Vec::new(),
                contrarian_signal: String::new(),
            });
        }

        tracing::debug!(agent_id = %self.id, count = candidates.len(), "Feed search complete");
        Ok(candidates)
    }
}
