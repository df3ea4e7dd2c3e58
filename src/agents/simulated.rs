//! Simulated research agent.
//!
//! Produces deterministic pseudo-random candidates so the full pipeline runs
//! without network access or API keys. Determinism comes from seeding the
//! RNG with the agent id and topic, which keeps tests stable while still
//! giving each agent/topic pair a distinct score profile.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::ResearchAgent;
use crate::config::AgentConfig;
use crate::types::{CandidateItem, ResearchTask, StoryLifecycle, UrgencyLevel};

const HEADLINE_TEMPLATES: [&str; 6] = [
    "{source} reports shift in {topic} landscape",
    "New {topic} analysis points to emerging pressures",
    "Officials weigh response as {topic} situation develops",
    "{topic} indicators move sharply in latest data",
    "Key actors reposition amid {topic} uncertainty",
    "Quiet change in {topic} draws analyst attention",
];

pub struct SimulatedAgent {
    id: String,
    source: String,
    topics: Vec<String>,
}

impl SimulatedAgent {
    pub fn new(cfg: &AgentConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            source: cfg.source.clone(),
            topics: cfg.topics.clone(),
        }
    }

    fn covers(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| t == topic)
    }

    fn seed_for(&self, topic: &str) -> u64 {
        let digest = md5::compute(format!("{}:{}", self.id, topic));
        u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3],
            digest[4], digest[5], digest[6], digest[7],
        ])
    }
}

#[async_trait]
impl ResearchAgent for SimulatedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn source(&self) -> &str {
        &self.source
    }

    async fn search(&self, task: &ResearchTask, top_k: usize) -> Result<Vec<CandidateItem>> {
        let mut topics: Vec<(&String, &f64)> = task
            .weighted_topics
            .iter()
            .filter(|(topic, weight)| self.covers(topic) && **weight > 0.0)
            .collect();
        topics.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut candidates = Vec::new();
        for (topic, weight) in topics.into_iter().take(3) {
            let mut rng = StdRng::seed_from_u64(self.seed_for(topic));
            let per_topic = (top_k / 2).max(1);
            for i in 0..per_topic {
                let template = HEADLINE_TEMPLATES[rng.gen_range(0..HEADLINE_TEMPLATES.len())];
                let title = template
                    .replace("{source}", &capitalize(&self.source))
                    .replace("{topic}", &topic.replace('_', " "));

                let jitter = |rng: &mut StdRng| -> f64 { rng.gen_range(-0.15..0.15) };
                let evidence = (0.55 + jitter(&mut rng)).clamp(0.0, 1.0);
                let novelty = (0.5 + jitter(&mut rng) + i as f64 * 0.05).clamp(0.0, 1.0);
                let pref_fit = (0.3 + weight * 0.5 + jitter(&mut rng)).clamp(0.0, 1.0);
                let signal = (0.35 + jitter(&mut rng)).clamp(0.0, 1.0);
                let age_minutes = rng.gen_range(2..180);

                let digest = md5::compute(format!("{}:{}:{}:{}", self.id, topic, i, title));
                let candidate_id = format!("{digest:x}");

                candidates.push(CandidateItem {
                    url: format!("https://{}.newsdesk.test/{}", self.source, &candidate_id[..12]),
                    title,
                    candidate_id,
                    source: self.source.clone(),
                    summary: format!(
                        "Simulated wire copy covering {} developments attributed to {}.",
                        topic.replace('_', " "),
                        self.source
                    ),
                    topic: topic.clone(),
                    evidence_score: evidence,
                    novelty_score: novelty,
                    preference_fit: pref_fit,
                    prediction_signal: signal,
                    discovered_by: self.id.clone(),
                    created_at: Utc::now() - Duration::minutes(age_minutes),
                    lifecycle: StoryLifecycle::Developing,
                    urgency: UrgencyLevel::Routine,
                    regions: Vec::new(),
                    corroborated_by: Vec::new(),
                    contrarian_signal: String::new(),
                });
                if candidates.len() >= top_k {
                    return Ok(candidates);
                }
            }
        }
        Ok(candidates)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_task(topics: &[(&str, f64)]) -> ResearchTask {
        ResearchTask {
            request_id: "req-1".to_string(),
            user_id: "u1".to_string(),
            prompt: String::new(),
            weighted_topics: topics
                .iter()
                .map(|(t, w)| ((*t).to_string(), *w))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn make_agent(topics: &[&str]) -> SimulatedAgent {
        SimulatedAgent::new(&AgentConfig {
            id: "agent_reuters".to_string(),
            source: "reuters".to_string(),
            topics: topics.iter().map(|t| (*t).to_string()).collect(),
            ..AgentConfig::default()
        })
    }

    #[tokio::test]
    async fn produces_candidates_for_covered_topics() {
        let agent = make_agent(&["markets"]);
        let task = make_task(&[("markets", 0.9), ("science", 0.5)]);
        let out = agent.search(&task, 5).await.unwrap();
        assert!(!out.is_empty());
        assert!(out.iter().all(|c| c.topic == "markets"));
        assert!(out.iter().all(|c| c.discovered_by == "agent_reuters"));
    }

    #[tokio::test]
    async fn respects_top_k() {
        let agent = make_agent(&[]);
        let task = make_task(&[("markets", 0.9), ("science", 0.8), ("crypto", 0.7)]);
        let out = agent.search(&task, 4).await.unwrap();
        assert!(out.len() <= 4);
    }

    #[tokio::test]
    async fn deterministic_titles_for_same_inputs() {
        let agent = make_agent(&["markets"]);
        let task = make_task(&[("markets", 0.9)]);
        let a = agent.search(&task, 5).await.unwrap();
        let b = agent.search(&task, 5).await.unwrap();
        let titles_a: Vec<&str> = a.iter().map(|c| c.title.as_str()).collect();
        let titles_b: Vec<&str> = b.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles_a, titles_b);
    }

    #[tokio::test]
    async fn zero_weight_topics_are_skipped() {
        let agent = make_agent(&[]);
        let task = make_task(&[("markets", 0.0)]);
        let out = agent.search(&task, 5).await.unwrap();
        assert!(out.is_empty());
    }
}
