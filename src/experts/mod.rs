//! Expert council — multi-persona candidate evaluation with arbitration.
//!
//! Each expert evaluates candidates through a distinct analytical lens.
//! With an LLM API key, experts generate genuine reasoning from their
//! persona prompts; without one they use calibrated heuristic scoring over
//! their dimension weights. Any LLM failure (transport, status, JSON
//! garbage) falls back to the heuristic vote — voting never errors.

mod chair;
mod personas;

pub use chair::{ChairSnapshot, DebateChair};
pub use personas::{all_personas, persona, Dimension, ExpertPersona};

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::config::ExpertCouncilConfig;
use crate::intelligence::credibility::CredibilityTracker;
use crate::types::{CandidateItem, DebateRecord, DebateVote, StoryLifecycle, UrgencyLevel};

/// Sources whose presence adds diversity value to a briefing.
const DIVERSE_SOURCES: [&str; 4] = ["aljazeera", "arxiv", "gdelt", "hackernews"];

const LLM_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ExpertCouncil {
    expert_ids: Vec<String>,
    keep_threshold: f64,
    confidence_min: f64,
    confidence_max: f64,
    min_votes_to_accept: String,
    llm_api_key: String,
    llm_model: String,
    llm_base_url: String,
    client: reqwest::Client,
    chair: Mutex<DebateChair>,
}

impl ExpertCouncil {
    pub fn new(expert_ids: Vec<String>, cfg: &ExpertCouncilConfig, llm_api_key: String) -> Self {
        let expert_ids = if expert_ids.is_empty() {
            vec![
                "expert_quality_agent".to_string(),
                "expert_relevance_agent".to_string(),
                "expert_preference_fit_agent".to_string(),
            ]
        } else {
            expert_ids
        };
        Self {
            expert_ids,
            keep_threshold: cfg.keep_threshold,
            confidence_min: cfg.confidence_min,
            confidence_max: cfg.confidence_max,
            min_votes_to_accept: cfg.min_votes_to_accept.clone(),
            llm_api_key,
            llm_model: cfg.llm_model.clone(),
            llm_base_url: cfg.llm_base_url.clone(),
            client: reqwest::Client::builder()
                .timeout(LLM_TIMEOUT)
                .build()
                .unwrap_or_default(),
            chair: Mutex::new(DebateChair::new()),
        }
    }

    pub fn expert_count(&self) -> usize {
        self.expert_ids.len()
    }

    pub fn llm_backed(&self) -> bool {
        !self.llm_api_key.is_empty()
    }

    /// Votes required to accept a candidate. "majority" is ceil(n/2),
    /// "unanimous" is n, numeric values are clamped to [1, n].
    fn required_votes(&self) -> usize {
        let n = self.expert_ids.len();
        match self.min_votes_to_accept.as_str() {
            "majority" => n.div_ceil(2),
            "unanimous" => n,
            other => match other.parse::<usize>() {
                Ok(requested) if requested > n => {
                    tracing::warn!(requested, experts = n, "min_votes_to_accept exceeds expert count, clamping");
                    n
                }
                Ok(requested) => requested.max(1),
                Err(_) => n.div_ceil(2),
            },
        }
    }

    // ──────────────────────────────────────────────────────────────
    // Heuristic voting
    // ──────────────────────────────────────────────────────────────

    fn dimension_signal(dimension: Dimension, c: &CandidateItem) -> f64 {
        match dimension {
            Dimension::Evidence => c.evidence_score,
            Dimension::Novelty => c.novelty_score,
            Dimension::PreferenceFit => c.preference_fit,
            Dimension::PredictionSignal => c.prediction_signal,
            Dimension::SourceTier => CredibilityTracker::seed_reliability(&c.source),
            Dimension::Corroboration => (c.corroborated_by.len() as f64 * 0.3 + 0.2).min(1.0),
            Dimension::Recency => {
                let age_minutes = (Utc::now() - c.created_at).num_minutes() as f64;
                (1.0 - age_minutes / 1440.0).max(0.1)
            }
            Dimension::Lifecycle => match c.lifecycle {
                StoryLifecycle::Breaking => 1.0,
                StoryLifecycle::Developing => 0.8,
                StoryLifecycle::Ongoing => 0.6,
                StoryLifecycle::Waning => 0.3,
                StoryLifecycle::Resolved => 0.1,
            },
            Dimension::Contrarian => {
                if !c.contrarian_signal.is_empty() {
                    0.85
                } else if c.novelty_score > 0.8 {
                    0.65
                } else {
                    0.3
                }
            }
            Dimension::Urgency => match c.urgency {
                UrgencyLevel::Routine => 0.3,
                UrgencyLevel::Elevated => 0.6,
                UrgencyLevel::Breaking => 0.85,
                UrgencyLevel::Critical => 1.0,
            },
            Dimension::Regions => (c.regions.len() as f64 * 0.3 + 0.2).min(1.0),
            Dimension::Diversity => {
                if DIVERSE_SOURCES.contains(&c.source.as_str()) {
                    0.8
                } else {
                    0.4
                }
            }
        }
    }

    fn vote_heuristic(&self, expert_id: &str, c: &CandidateItem) -> DebateVote {
        let weights: &[(Dimension, f64)] =
            persona(expert_id).map(|p| p.weights).unwrap_or(&[]);

        let mut score = 0.0;
        let mut w_sum = 0.0;
        for (dimension, weight) in weights {
            score += weight * Self::dimension_signal(*dimension, c);
            w_sum += weight;
        }
        if w_sum > 0.0 {
            score /= w_sum;
        }

        let keep = score >= self.keep_threshold;
        let confidence = score.clamp(self.confidence_min, self.confidence_max);

        DebateVote {
            expert_id: expert_id.to_string(),
            candidate_id: c.candidate_id.clone(),
            keep,
            confidence: (confidence * 1000.0).round() / 1000.0,
            rationale: self.heuristic_rationale(expert_id, c, score, keep),
            risk_note: Self::risk_note(c, score),
            arbitrated: false,
        }
    }

    fn heuristic_rationale(&self, expert_id: &str, c: &CandidateItem, score: f64, keep: bool) -> String {
        match expert_id {
            "expert_quality_agent" => {
                let tier = CredibilityTracker::tier_label(&c.source);
                let corr = if c.corroborated_by.is_empty() {
                    "awaiting corroboration".to_string()
                } else {
                    format!("corroborated by {} source(s)", c.corroborated_by.len())
                };
                format!(
                    "Source quality: {tier} ({}), evidence={:.2}, {corr}. Overall quality score: {score:.2}.",
                    c.source, c.evidence_score
                )
            }
            "expert_relevance_agent" => format!(
                "Novelty={:.2}, topic fit={:.2}, lifecycle={}. {} relevance threshold at {score:.2}.",
                c.novelty_score,
                c.preference_fit,
                c.lifecycle,
                if keep { "Passes" } else { "Fails" }
            ),
            "expert_preference_fit_agent" => format!(
                "Preference alignment={:.2}, prediction signal={:.2}, urgency={}. User utility score: {score:.2}.",
                c.preference_fit, c.prediction_signal, c.urgency
            ),
            "expert_geopolitical_risk_agent" => {
                let regions = if c.regions.is_empty() {
                    "unlocalized".to_string()
                } else {
                    c.regions.join(", ")
                };
                format!(
                    "Regions: {regions}, urgency={}, escalation risk score: {score:.2}.",
                    c.urgency
                )
            }
            "expert_market_signal_agent" => format!(
                "Market signal={:.2}, evidence={:.2}. Economic impact score: {score:.2}.",
                c.prediction_signal, c.evidence_score
            ),
            other => format!("{other} evaluated candidate with score {score:.2}."),
        }
    }

    fn risk_note(c: &CandidateItem, score: f64) -> String {
        if score < 0.4 {
            "Low-confidence assessment — recommend additional verification before inclusion."
                .to_string()
        } else if c.corroborated_by.is_empty() {
            "Single-source reporting — may degrade if contradicted by subsequent coverage."
                .to_string()
        } else if matches!(c.urgency, UrgencyLevel::Breaking | UrgencyLevel::Critical) {
            "Fast-moving story — assessment may change rapidly as new information emerges."
                .to_string()
        } else {
            "Assessment stable given current evidence and source quality signals.".to_string()
        }
    }

    // ──────────────────────────────────────────────────────────────
    // LLM voting
    // ──────────────────────────────────────────────────────────────

    async fn vote_llm(&self, expert_id: &str, c: &CandidateItem) -> DebateVote {
        let Some(p) = persona(expert_id) else {
            return self.vote_heuristic(expert_id, c);
        };

        let user_message = format!(
            "Evaluate this candidate:\n- Title: {}\n- Source: {}\n- Topic: {}\n- Summary: {}\n\
             - Evidence Score: {}\n- Novelty Score: {}\n- Urgency: {}\n- Lifecycle: {}\n\
             - Corroborated by: {}\n- Regions: {}\n\n\
             Respond in JSON: {{\"keep\": bool, \"confidence\": float, \"rationale\": string, \"risk_note\": string}}",
            sanitize_for_prompt(&c.title, 200),
            sanitize_for_prompt(&c.source, 50),
            sanitize_for_prompt(&c.topic, 50),
            sanitize_for_prompt(&c.summary, 200),
            c.evidence_score,
            c.novelty_score,
            c.urgency,
            c.lifecycle,
            if c.corroborated_by.is_empty() {
                "none".to_string()
            } else {
                c.corroborated_by.join(", ")
            },
            if c.regions.is_empty() {
                "none".to_string()
            } else {
                c.regions.join(", ")
            },
        );

        let body = serde_json::json!({
            "model": self.llm_model,
            "max_tokens": 300,
            "system": p.system_prompt,
            "messages": [{"role": "user", "content": user_message}],
        });

        let response = self
            .client
            .post(format!("{}/messages", self.llm_base_url))
            .header("x-api-key", &self.llm_api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await;

        let value: serde_json::Value = match response {
            Ok(r) => match r.json().await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(expert = %expert_id, error = %e, "LLM vote parse failed, falling back to heuristic");
                    return self.vote_heuristic(expert_id, c);
                }
            },
            Err(e) => {
                tracing::warn!(expert = %expert_id, error = %e, "LLM vote failed, falling back to heuristic");
                return self.vote_heuristic(expert_id, c);
            }
        };

        let content = value["content"][0]["text"].as_str().unwrap_or("");
        let parsed = parse_llm_json(content);
        if parsed.is_null() {
            return self.vote_heuristic(expert_id, c);
        }

        let keep = parsed["keep"].as_bool().unwrap_or(true);
        let confidence = parsed["confidence"]
            .as_f64()
            .unwrap_or(0.7)
            .clamp(self.confidence_min, self.confidence_max);
        let rationale = parsed["rationale"]
            .as_str()
            .unwrap_or("LLM evaluation complete.");
        let risk_note = parsed["risk_note"]
            .as_str()
            .unwrap_or("Assessment based on available signals.");

        DebateVote {
            expert_id: expert_id.to_string(),
            candidate_id: c.candidate_id.clone(),
            keep,
            confidence: (confidence * 1000.0).round() / 1000.0,
            rationale: truncate(rationale, 200),
            risk_note: truncate(risk_note, 200),
            arbitrated: false,
        }
    }

    // ──────────────────────────────────────────────────────────────
    // Debate and selection
    // ──────────────────────────────────────────────────────────────

    /// Run all experts against all candidates.
    pub async fn debate(&self, candidates: &[CandidateItem]) -> DebateRecord {
        let mut votes = Vec::with_capacity(candidates.len() * self.expert_ids.len());
        for c in candidates {
            for expert_id in &self.expert_ids {
                let vote = if self.llm_backed() {
                    self.vote_llm(expert_id, c).await
                } else {
                    self.vote_heuristic(expert_id, c)
                };
                votes.push(vote);
            }
        }
        DebateRecord { votes }
    }

    /// Run expert debate with arbitration, then select the top candidates.
    ///
    /// Returns (selected, reserve, debate record). Accepted candidates are
    /// ranked by composite score and deduplicated by lowercased title; the
    /// first `max_items` are selected, the remainder go to reserve.
    pub async fn select(
        &self,
        candidates: &[CandidateItem],
        max_items: usize,
    ) -> (Vec<CandidateItem>, Vec<CandidateItem>, DebateRecord) {
        let mut debate = self.debate(candidates).await;
        let required = self.required_votes();

        // Arbitration pass over split candidates.
        {
            let chair = lock_chair(&self.chair);
            let mut by_candidate: HashMap<String, Vec<usize>> = HashMap::new();
            for (i, vote) in debate.votes.iter().enumerate() {
                by_candidate.entry(vote.candidate_id.clone()).or_default().push(i);
            }
            for indices in by_candidate.values() {
                let mut group: Vec<DebateVote> =
                    indices.iter().map(|&i| debate.votes[i].clone()).collect();
                let flipped = chair.arbitrate(&mut group);
                if flipped > 0 {
                    for (slot, vote) in indices.iter().zip(group) {
                        debate.votes[*slot] = vote;
                    }
                }
            }
        }

        let mut keep_counts: HashMap<&str, usize> = HashMap::new();
        for vote in &debate.votes {
            if vote.keep {
                *keep_counts.entry(vote.candidate_id.as_str()).or_insert(0) += 1;
            }
        }
        let accepted_ids: HashSet<String> = candidates
            .iter()
            .filter(|c| keep_counts.get(c.candidate_id.as_str()).copied().unwrap_or(0) >= required)
            .map(|c| c.candidate_id.clone())
            .collect();

        // Rank by composite and deduplicate by lowercased title.
        let mut ranked: Vec<&CandidateItem> = candidates
            .iter()
            .filter(|c| accepted_ids.contains(&c.candidate_id))
            .collect();
        ranked.sort_by(|a, b| {
            b.composite_score()
                .partial_cmp(&a.composite_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut seen_titles: HashSet<String> = HashSet::new();
        let mut deduped: Vec<CandidateItem> = Vec::new();
        for c in ranked {
            let key = c.title.trim().to_lowercase();
            if seen_titles.insert(key) {
                deduped.push(c.clone());
            }
        }

        lock_chair(&self.chair).record_outcome(&debate.votes, &accepted_ids);

        let reserve = if deduped.len() > max_items {
            deduped.split_off(max_items)
        } else {
            Vec::new()
        };

        tracing::info!(
            accepted = accepted_ids.len(),
            total = candidates.len(),
            experts = self.expert_ids.len(),
            required,
            selected = deduped.len(),
            reserve = reserve.len(),
            "Expert council selection complete"
        );

        (deduped, reserve, debate)
    }

    pub fn chair_rankings(&self) -> Vec<(String, f64, f64)> {
        lock_chair(&self.chair).rankings()
    }

    pub fn chair_snapshot(&self) -> ChairSnapshot {
        lock_chair(&self.chair).snapshot()
    }

    pub fn chair_restore(&self, snapshot: ChairSnapshot) {
        lock_chair(&self.chair).restore(snapshot);
    }
}

/// Strip newlines and control characters, then length-cap. User-controlled
/// fields pass through this before being embedded in any LLM prompt.
pub fn sanitize_for_prompt(value: &str, max_len: usize) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| if ch == '\r' || ch == '\n' { ' ' } else { ch })
        .filter(|ch| !ch.is_control())
        .collect();
    truncate(&cleaned, max_len)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Extract JSON from an LLM response, tolerating markdown fences and
/// surrounding prose. Returns `Value::Null` when nothing parses.
fn parse_llm_json(text: &str) -> serde_json::Value {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(text) {
        return v;
    }
    if let Some(start) = text.find("```") {
        let inner = &text[start + 3..];
        let inner = inner.strip_prefix("json").unwrap_or(inner);
        if let Some(end) = inner.find("```") {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(inner[..end].trim()) {
                return v;
            }
        }
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&text[start..=end]) {
                return v;
            }
        }
    }
    serde_json::Value::Null
}

fn lock_chair(m: &Mutex<DebateChair>) -> std::sync::MutexGuard<'_, DebateChair> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExpertCouncilConfig;

    fn council_with(expert_ids: &[&str], min_votes: &str) -> ExpertCouncil {
        let cfg = ExpertCouncilConfig {
            min_votes_to_accept: min_votes.to_string(),
            ..ExpertCouncilConfig::default()
        };
        ExpertCouncil::new(
            expert_ids.iter().map(|s| (*s).to_string()).collect(),
            &cfg,
            String::new(),
        )
    }

    fn make_candidate(id: &str, quality: f64) -> CandidateItem {
        CandidateItem {
            candidate_id: id.to_string(),
            title: format!("Distinct headline {id}"),
            source: "reuters".to_string(),
            summary: "Teaser.".to_string(),
            url: String::new(),
            topic: "markets".to_string(),
            evidence_score: quality,
            novelty_score: quality,
            preference_fit: quality,
            prediction_signal: quality,
            discovered_by: "agent_reuters".to_string(),
            created_at: Utc::now(),
            lifecycle: StoryLifecycle::Breaking,
            urgency: UrgencyLevel::Breaking,
            regions: vec!["east_asia".to_string()],
            corroborated_by: vec!["bbc".to_string()],
            contrarian_signal: String::new(),
        }
    }

    #[test]
    fn required_votes_majority_unanimous_numeric() {
        let ids = [
            "expert_quality_agent",
            "expert_relevance_agent",
            "expert_preference_fit_agent",
            "expert_geopolitical_risk_agent",
            "expert_market_signal_agent",
        ];
        assert_eq!(council_with(&ids, "majority").required_votes(), 3);
        assert_eq!(council_with(&ids, "unanimous").required_votes(), 5);
        assert_eq!(council_with(&ids, "2").required_votes(), 2);
        assert_eq!(council_with(&ids, "99").required_votes(), 5);
        assert_eq!(council_with(&ids, "0").required_votes(), 1);
        assert_eq!(council_with(&ids, "garbage").required_votes(), 3);
    }

    #[tokio::test]
    async fn strong_candidates_are_selected() {
        let council = council_with(
            &["expert_quality_agent", "expert_relevance_agent", "expert_preference_fit_agent"],
            "majority",
        );
        let candidates = vec![make_candidate("good", 0.9), make_candidate("weak", 0.1)];
        let (selected, reserve, debate) = council.select(&candidates, 10).await;
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].candidate_id, "good");
        assert!(reserve.is_empty());
        assert_eq!(debate.votes.len(), 6);
    }

    #[tokio::test]
    async fn overflow_goes_to_reserve() {
        let council = council_with(&["expert_quality_agent"], "majority");
        let candidates: Vec<CandidateItem> = (0..5)
            .map(|i| make_candidate(&format!("c{i}"), 0.9))
            .collect();
        let (selected, reserve, _) = council.select(&candidates, 2).await;
        assert_eq!(selected.len(), 2);
        assert_eq!(reserve.len(), 3);
        // Best-scored first.
        assert!(selected[0].composite_score() >= selected[1].composite_score());
    }

    #[tokio::test]
    async fn duplicate_titles_are_deduplicated() {
        let council = council_with(&["expert_quality_agent"], "majority");
        let mut a = make_candidate("a", 0.9);
        let mut b = make_candidate("b", 0.85);
        a.title = "Same Headline".to_string();
        b.title = "same headline".to_string();
        let (selected, reserve, _) = council.select(&[a, b], 10).await;
        assert_eq!(selected.len() + reserve.len(), 1);
    }

    #[test]
    fn vote_confidence_clamped() {
        let council = council_with(&["expert_quality_agent"], "majority");
        let vote = council.vote_heuristic("expert_quality_agent", &make_candidate("c", 1.0));
        assert!(vote.confidence <= 0.99);
        let weak = council.vote_heuristic("expert_quality_agent", &make_candidate("c", 0.0));
        assert!(weak.confidence >= 0.51);
        assert!(!weak.keep);
    }

    #[test]
    fn parse_llm_json_lenient() {
        assert!(parse_llm_json(r#"{"keep": true}"#)["keep"].as_bool().unwrap());
        assert!(parse_llm_json("```json\n{\"keep\": true}\n```")["keep"].as_bool().unwrap());
        assert!(parse_llm_json("Verdict below:\n{\"keep\": true} done")["keep"].as_bool().unwrap());
        assert!(parse_llm_json("no json at all").is_null());
    }

    #[test]
    fn sanitize_for_prompt_strips_newlines_and_caps() {
        let dirty = "line1\r\nline2\u{7}and more text";
        let clean = sanitize_for_prompt(dirty, 12);
        assert!(!clean.contains('\n'));
        assert!(!clean.contains('\u{7}'));
        assert_eq!(clean.chars().count(), 12);
    }
}
