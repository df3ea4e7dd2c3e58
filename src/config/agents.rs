//! Agent roster (`agents.json`) and editorial personas (`personas.json`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One research agent entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub id: String,
    /// Canonical source name (used for credibility tiers and routing).
    pub source: String,
    /// "simulated" or "feed". Unknown kinds fall back to simulated.
    pub kind: String,
    /// Endpoint for feed agents; ignored by simulated agents.
    pub endpoint: String,
    /// Topics this agent covers. Empty means all.
    pub topics: Vec<String>,
    pub enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            source: String::new(),
            kind: "simulated".to_string(),
            endpoint: String::new(),
            topics: Vec::new(),
            enabled: true,
        }
    }
}

/// Expert council membership entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExpertAgentConfig {
    pub id: String,
}

/// Agent roster (`agents.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub research_agents: Vec<AgentConfig>,
    pub expert_agents: Vec<ExpertAgentConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        let agent = |id: &str, source: &str, topics: &[&str]| AgentConfig {
            id: id.to_string(),
            source: source.to_string(),
            kind: "simulated".to_string(),
            endpoint: String::new(),
            topics: topics.iter().map(|t| (*t).to_string()).collect(),
            enabled: true,
        };
        let expert = |id: &str| ExpertAgentConfig { id: id.to_string() };

        Self {
            research_agents: vec![
                agent("agent_reuters", "reuters", &["geopolitics", "markets", "middle_east"]),
                agent("agent_ap", "ap", &["geopolitics", "climate"]),
                agent("agent_bbc", "bbc", &["geopolitics", "technology", "science"]),
                agent("agent_guardian", "guardian", &["climate", "ai_policy", "science"]),
                agent("agent_ft", "ft", &["markets", "crypto", "geopolitics"]),
                agent("agent_aljazeera", "aljazeera", &["middle_east", "africa", "geopolitics"]),
                agent("agent_arxiv", "arxiv", &["science", "ai_policy", "technology"]),
                agent("agent_hackernews", "hackernews", &["technology", "ai_policy", "crypto"]),
            ],
            expert_agents: vec![
                expert("expert_quality_agent"),
                expert("expert_relevance_agent"),
                expert("expert_preference_fit_agent"),
                expert("expert_geopolitical_risk_agent"),
                expert("expert_market_signal_agent"),
            ],
        }
    }
}

/// Editorial persona configuration (`personas.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonasConfig {
    pub default_personas: Vec<String>,
    pub persona_notes: HashMap<String, String>,
}

impl Default for PersonasConfig {
    fn default() -> Self {
        let mut notes = HashMap::new();
        notes.insert(
            "intel_analyst".to_string(),
            "Measured, evidence-first framing. Flags uncertainty explicitly.".to_string(),
        );
        notes.insert(
            "desk_editor".to_string(),
            "Cuts filler, keeps sentences short, leads with what changed.".to_string(),
        );
        Self {
            default_personas: vec!["intel_analyst".to_string(), "desk_editor".to_string()],
            persona_notes: notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roster_has_tier1_sources() {
        let cfg = AgentsConfig::default();
        assert!(cfg.research_agents.iter().any(|a| a.source == "reuters"));
        assert_eq!(cfg.expert_agents.len(), 5);
    }

    #[test]
    fn agent_config_parses_with_defaults() {
        let a: AgentConfig =
            serde_json::from_str(r#"{"id": "agent_x", "source": "x"}"#).unwrap();
        assert!(a.enabled);
        assert_eq!(a.kind, "simulated");
    }
}
