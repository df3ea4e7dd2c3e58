//! Research agents — one per news source.
//!
//! The scheduler only sees the `ResearchAgent` trait: an id, a source name,
//! and `search(task) -> Vec<CandidateItem>`. Concrete kinds are selected
//! from `agents.json`; unknown kinds fall back to the simulated agent so a
//! typo in config degrades gracefully instead of dropping a source.

mod feed;
mod simulated;

pub use feed::FeedAgent;
pub use simulated::SimulatedAgent;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::AgentConfig;
use crate::types::{CandidateItem, ResearchTask};

/// A single research source behind a uniform search interface.
#[async_trait]
pub trait ResearchAgent: Send + Sync {
    /// Stable agent identifier (used by metrics and circuit breakers).
    fn id(&self) -> &str;

    /// Canonical source name (used for credibility tiers).
    fn source(&self) -> &str;

    /// Produce up to `top_k` scored candidates for the task.
    async fn search(&self, task: &ResearchTask, top_k: usize) -> Result<Vec<CandidateItem>>;
}

/// Instantiate an agent from its config entry.
pub fn create_agent(cfg: &AgentConfig) -> Arc<dyn ResearchAgent> {
    match cfg.kind.as_str() {
        "feed" if !cfg.endpoint.is_empty() => Arc::new(FeedAgent::new(cfg)),
        "simulated" => Arc::new(SimulatedAgent::new(cfg)),
        other => {
            if other != "simulated" {
                tracing::warn!(agent_id = %cfg.id, kind = %other, "Unknown agent kind, using simulated");
            }
            Arc::new(SimulatedAgent::new(cfg))
        }
    }
}
