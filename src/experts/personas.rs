//! Expert persona definitions.
//!
//! Persona weights and prompts are data, not code: each expert is a fixed
//! set of weighted scoring dimensions plus a system prompt used when the
//! council is LLM-backed.

/// A scoring dimension an expert can weigh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Evidence,
    SourceTier,
    Corroboration,
    Recency,
    Novelty,
    PreferenceFit,
    Lifecycle,
    Contrarian,
    PredictionSignal,
    Urgency,
    Regions,
    Diversity,
}

pub struct ExpertPersona {
    pub id: &'static str,
    pub name: &'static str,
    pub system_prompt: &'static str,
    pub weights: &'static [(Dimension, f64)],
}

static PERSONAS: [ExpertPersona; 5] = [
    ExpertPersona {
        id: "expert_quality_agent",
        name: "Source Quality & Evidence Analyst",
        system_prompt: "You are the Source Quality & Evidence Analyst on an intelligence \
editorial board. Evaluate the EVIDENTIAL STRENGTH and SOURCE RELIABILITY of news candidates: \
source tier, primary-source citations, independent corroboration, freshness, and known bias. \
Respond in JSON: {\"keep\": bool, \"confidence\": float, \"rationale\": string, \"risk_note\": string}",
        weights: &[
            (Dimension::Evidence, 0.40),
            (Dimension::SourceTier, 0.30),
            (Dimension::Corroboration, 0.20),
            (Dimension::Recency, 0.10),
        ],
    },
    ExpertPersona {
        id: "expert_relevance_agent",
        name: "Topic Relevance & Novelty Analyst",
        system_prompt: "You are the Topic Relevance & Novelty Analyst on an intelligence \
editorial board. Evaluate whether candidates are GENUINELY NOVEL and RELEVANT: topic alignment, \
novelty delta versus known developments, signal versus noise, story lifecycle position, and \
contrarian value. \
Respond in JSON: {\"keep\": bool, \"confidence\": float, \"rationale\": string, \"risk_note\": string}",
        weights: &[
            (Dimension::Novelty, 0.35),
            (Dimension::PreferenceFit, 0.30),
            (Dimension::Lifecycle, 0.20),
            (Dimension::Contrarian, 0.15),
        ],
    },
    ExpertPersona {
        id: "expert_preference_fit_agent",
        name: "User Preference & Decision Utility Analyst",
        system_prompt: "You are the User Preference & Decision Utility Analyst on an \
intelligence editorial board. Evaluate whether candidates serve the USER'S needs: preference \
alignment, decision utility over entertainment value, briefing fit, and cognitive load. \
Respond in JSON: {\"keep\": bool, \"confidence\": float, \"rationale\": string, \"risk_note\": string}",
        weights: &[
            (Dimension::PreferenceFit, 0.35),
            (Dimension::PredictionSignal, 0.25),
            (Dimension::Urgency, 0.20),
            (Dimension::Diversity, 0.20),
        ],
    },
    ExpertPersona {
        id: "expert_geopolitical_risk_agent",
        name: "Geopolitical Risk & Escalation Analyst",
        system_prompt: "You are the Geopolitical Risk & Escalation Analyst on an intelligence \
editorial board. Evaluate GEOPOLITICAL SIGNIFICANCE and ESCALATION POTENTIAL: escalation \
trajectories, regional contagion, actor significance, historical pattern match, and \
de-escalation counter-signals. \
Respond in JSON: {\"keep\": bool, \"confidence\": float, \"rationale\": string, \"risk_note\": string}",
        weights: &[
            (Dimension::Urgency, 0.35),
            (Dimension::Evidence, 0.25),
            (Dimension::Regions, 0.25),
            (Dimension::Novelty, 0.15),
        ],
    },
    ExpertPersona {
        id: "expert_market_signal_agent",
        name: "Market Signal & Economic Impact Analyst",
        system_prompt: "You are the Market Signal & Economic Impact Analyst on an intelligence \
editorial board. Evaluate MARKET-MOVING POTENTIAL and ECONOMIC IMPLICATIONS: market impact, \
leading indicators, sector exposure, and policy signals. \
Respond in JSON: {\"keep\": bool, \"confidence\": float, \"rationale\": string, \"risk_note\": string}",
        weights: &[
            (Dimension::PredictionSignal, 0.35),
            (Dimension::Evidence, 0.25),
            (Dimension::Novelty, 0.20),
            (Dimension::PreferenceFit, 0.20),
        ],
    },
];

/// Look up a persona by expert id.
pub fn persona(expert_id: &str) -> Option<&'static ExpertPersona> {
    PERSONAS.iter().find(|p| p.id == expert_id)
}

/// All defined personas, in council order.
pub fn all_personas() -> &'static [ExpertPersona] {
    &PERSONAS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_persona_weights_sum_to_one() {
        for p in all_personas() {
            let sum: f64 = p.weights.iter().map(|(_, w)| w).sum();
            assert!(
                (sum - 1.0).abs() < 1e-9,
                "{} weights sum to {sum}",
                p.id
            );
        }
    }

    #[test]
    fn lookup_by_id() {
        assert!(persona("expert_quality_agent").is_some());
        assert!(persona("expert_unknown").is_none());
    }
}
