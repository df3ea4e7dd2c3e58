//! Editorial review agents.
//!
//! Two passes over each report item after assembly:
//! - **Style**: rewrites the analytical prose to match the user's tone and
//!   the active persona context.
//! - **Clarity**: strips filler, enforces a one-to-two-sentence shape, and
//!   makes the outlook actionable.
//!
//! Both have LLM-backed variants that fall back to the heuristic on any
//! failure. Narrative text never equals the candidate's summary; empty
//! fields rebuild from the title, not the summary.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::experts::sanitize_for_prompt;
use crate::types::{ReportItem, UserProfile};

const LLM_TIMEOUT: Duration = Duration::from_secs(15);

#[allow(clippy::expect_used)]
fn filler_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)\b(in order to|it is important to note that|at this point in time",
            r"|it should be noted that|needless to say|the fact that is",
            r"|as a matter of fact|for all intents and purposes)\b\s*",
        ))
        .expect("valid static regex")
    })
}

fn first_sentences(text: &str, count: usize) -> String {
    let mut out = String::new();
    let mut taken = 0;
    for chunk in text.split_inclusive(". ") {
        out.push_str(chunk);
        taken += 1;
        if taken >= count {
            break;
        }
    }
    out.trim_end().to_string()
}

// ============================================================================
// Style review
// ============================================================================

pub struct StyleReviewAgent {
    persona_context: String,
    llm_api_key: String,
    llm_model: String,
    llm_base_url: String,
    client: reqwest::Client,
}

impl StyleReviewAgent {
    pub fn new(
        persona_context: String,
        llm_api_key: String,
        llm_model: String,
        llm_base_url: String,
    ) -> Self {
        Self {
            persona_context,
            llm_api_key,
            llm_model,
            llm_base_url,
            client: reqwest::Client::builder()
                .timeout(LLM_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Rewrite the item's prose for the user's tone. Mutates in place.
    pub async fn review(&self, item: &mut ReportItem, profile: &UserProfile) {
        if !self.llm_api_key.is_empty() && self.review_llm(item, profile).await {
            self.enforce_invariants(item);
            return;
        }
        self.review_heuristic(item, profile);
        self.enforce_invariants(item);
    }

    fn review_heuristic(&self, item: &mut ReportItem, profile: &UserProfile) {
        match profile.tone.as_str() {
            "concise" | "brief" => {
                item.why_it_matters = first_sentences(&item.why_it_matters, 2);
                item.what_changed = first_sentences(&item.what_changed, 2);
                item.predictive_outlook = first_sentences(&item.predictive_outlook, 2);
            }
            "executive" => {
                item.why_it_matters = format!(
                    "Bottom line: {}",
                    lowercase_first(&first_sentences(&item.why_it_matters, 1))
                );
                item.predictive_outlook = first_sentences(&item.predictive_outlook, 2);
            }
            "analyst" => {
                item.why_it_matters = format!("Assessment: {}", item.why_it_matters);
            }
            _ => {}
        }
    }

    /// Rewrite via the LLM. Returns false on any failure so the caller can
    /// fall back to the heuristic.
    async fn review_llm(&self, item: &mut ReportItem, profile: &UserProfile) -> bool {
        let system = format!(
            "You are an editorial style agent for an intelligence briefing. \
             Rewrite the three analysis fields to match tone '{}' and format '{}'. {} \
             Respond in JSON: {{\"why_it_matters\": string, \"what_changed\": string, \
             \"predictive_outlook\": string}}",
            sanitize_for_prompt(&profile.tone, 30),
            sanitize_for_prompt(&profile.format, 30),
            sanitize_for_prompt(&self.persona_context, 300),
        );
        let user = format!(
            "Story: {}\nTopic: {}\nwhy_it_matters: {}\nwhat_changed: {}\npredictive_outlook: {}",
            sanitize_for_prompt(&item.candidate.title, 200),
            sanitize_for_prompt(&item.candidate.topic, 50),
            sanitize_for_prompt(&item.why_it_matters, 400),
            sanitize_for_prompt(&item.what_changed, 400),
            sanitize_for_prompt(&item.predictive_outlook, 400),
        );
        let body = serde_json::json!({
            "model": self.llm_model,
            "max_tokens": 400,
            "system": system,
            "messages": [{"role": "user", "content": user}],
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
                Err(_) => return false,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Style LLM review failed, using heuristic");
                return false;
            }
        };
        let content = value["content"][0]["text"].as_str().unwrap_or("");
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(content) else {
            return false;
        };

        let mut applied = false;
        for (field, slot) in [
            ("why_it_matters", &mut item.why_it_matters),
            ("what_changed", &mut item.what_changed),
            ("predictive_outlook", &mut item.predictive_outlook),
        ] {
            if let Some(text) = parsed[field].as_str() {
                if !text.trim().is_empty() {
                    *slot = text.trim().to_string();
                    applied = true;
                }
            }
        }
        applied
    }

    /// Narrative text must never equal the candidate's summary; empty
    /// fields fall back to the title, not the summary.
    fn enforce_invariants(&self, item: &mut ReportItem) {
        let title = item.candidate.title.clone();
        let topic = item.candidate.topic.replace('_', " ");
        let summary = item.candidate.summary.clone();

        let fallback_why = format!("{title} is directly relevant to your {topic} coverage.");
        for (slot, fallback) in [
            (&mut item.why_it_matters, fallback_why.clone()),
            (
                &mut item.what_changed,
                format!("New reporting on {title} since the last cycle."),
            ),
            (
                &mut item.predictive_outlook,
                format!("Expect follow-on coverage of {title}."),
            ),
        ] {
            if slot.trim().is_empty() || slot.trim() == summary.trim() {
                *slot = fallback;
            }
        }
    }
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// ============================================================================
// Clarity review
// ============================================================================

pub struct ClarityReviewAgent {
    adjacent_read_limit: usize,
}

impl ClarityReviewAgent {
    pub fn new(adjacent_read_limit: usize) -> Self {
        Self {
            adjacent_read_limit,
        }
    }

    /// Tighten the item's prose. Mutates in place.
    pub fn review(&self, item: &mut ReportItem) {
        item.why_it_matters = Self::compress(&item.why_it_matters);
        item.what_changed = Self::compress(&item.what_changed);
        item.predictive_outlook = Self::compress(&item.predictive_outlook);

        // The outlook must carry something actionable.
        let lower = item.predictive_outlook.to_lowercase();
        if !lower.contains("watch") && !lower.contains("monitor") {
            item.predictive_outlook = format!(
                "{} Watch for official confirmation within the next news cycle.",
                item.predictive_outlook
            );
        }

        if item.adjacent_reads.is_empty() {
            item.adjacent_reads = Self::topic_reads(&item.candidate.topic);
        }
        item.adjacent_reads.truncate(self.adjacent_read_limit);
    }

    /// Strip filler phrases and cap at two sentences.
    fn compress(text: &str) -> String {
        let cleaned = filler_re().replace_all(text, "");
        first_sentences(cleaned.trim(), 2)
    }

    fn topic_reads(topic: &str) -> Vec<String> {
        let display = topic.replace('_', " ");
        vec![
            format!("Background: how the {display} situation developed"),
            format!("Data: key {display} indicators to track"),
        ]
    }
}
