//! Metadata-driven narrative generation.
//!
//! Builds the "why it matters", "what changed", and "predictive outlook"
//! prose for each report item from the structured data the pipeline already
//! produces (source tier, urgency, corroboration, regions, lifecycle,
//! scores) — no LLM required. The editorial agents then rewrite for tone.

use crate::intelligence::credibility::CredibilityTracker;
use crate::types::{CandidateItem, NarrativeThread, StoryLifecycle, UrgencyLevel, UserProfile};

fn topic_name(topic: &str) -> String {
    match topic {
        "ai_policy" => "AI policy".to_string(),
        other => other.replace('_', " "),
    }
}

fn urgency_phrase(urgency: UrgencyLevel) -> &'static str {
    match urgency {
        UrgencyLevel::Critical => "critical development",
        UrgencyLevel::Breaking => "breaking development",
        UrgencyLevel::Elevated => "notable development",
        UrgencyLevel::Routine => "development",
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn region_phrase(regions: &[String]) -> String {
    let display: Vec<String> = regions
        .iter()
        .take(3)
        .map(|r| {
            r.split('_')
                .map(title_case)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    match display.len() {
        0 => String::new(),
        1 => display[0].clone(),
        2 => format!("{} and {}", display[0], display[1]),
        _ => format!("{}, {}, and {}", display[0], display[1], display[2]),
    }
}

fn corroboration_phrase(c: &CandidateItem) -> String {
    let count = c.corroborated_by.len();
    let sources: Vec<String> = c.corroborated_by.iter().take(3).map(|s| title_case(s)).collect();
    match count {
        0 => String::new(),
        1 => format!("independently confirmed by {}", sources[0]),
        2 | 3 => format!("corroborated by {count} sources ({})", sources.join(", ")),
        _ => format!("corroborated by {count} independent sources"),
    }
}

/// Generate a specific "why it matters" line from structured metadata.
pub fn generate_why(
    c: &CandidateItem,
    credibility: &CredibilityTracker,
    profile: Option<&UserProfile>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    let topic = topic_name(&c.topic);
    let source_label = CredibilityTracker::tier_label(&c.source);
    let source_name = title_case(&c.source);
    let urgency = urgency_phrase(c.urgency);

    let mut opener = if matches!(c.urgency, UrgencyLevel::Critical | UrgencyLevel::Breaking) {
        format!("{} in {topic} from {source_name} ({source_label})", title_case(urgency))
    } else {
        format!("This {source_name} report covers a {urgency} in {topic}")
    };
    let corr = corroboration_phrase(c);
    if !corr.is_empty() {
        opener.push_str(", ");
        opener.push_str(&corr);
    }
    parts.push(opener);

    let regions = region_phrase(&c.regions);
    if !regions.is_empty() {
        parts.push(format!("Affects {regions}"));
    }

    if let Some(profile) = profile {
        let weight = profile.topic_weights.get(&c.topic).copied().unwrap_or(0.0);
        if weight >= 0.7 {
            parts.push("Matches your high-priority interest".to_string());
        } else if weight >= 0.4 {
            parts.push("Aligns with your tracked interests".to_string());
        }
    }

    let sr = credibility.get_source(&c.source);
    if sr.reliability_score >= 0.8 && c.evidence_score >= 0.7 {
        parts.push("High-reliability source with strong evidence".to_string());
    } else if sr.reliability_score < 0.6 {
        parts.push("Lower-reliability source — verify independently".to_string());
    }

    parts.join(". ") + "."
}

/// Generate a "what changed" line from lifecycle and corroboration.
pub fn generate_what_changed(c: &CandidateItem) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(
        match c.lifecycle {
            StoryLifecycle::Breaking => "New breaking report",
            StoryLifecycle::Developing => "Developing story with fresh updates",
            StoryLifecycle::Ongoing => "Ongoing situation with new details",
            StoryLifecycle::Waning => "Story activity declining but still relevant",
            StoryLifecycle::Resolved => "Situation appears to be resolving",
        }
        .to_string(),
    );

    let corr_count = c.corroborated_by.len();
    parts.push(match corr_count {
        0 => "single-source report, awaiting confirmation".to_string(),
        1 => format!("secondary reporting from {}", title_case(&c.corroborated_by[0])),
        2 => "cross-source confirmation strengthening".to_string(),
        n => format!("now confirmed across {n} independent sources"),
    });

    if matches!(c.urgency, UrgencyLevel::Breaking | UrgencyLevel::Critical) {
        parts.push("urgency elevated above baseline".to_string());
    }

    if c.novelty_score >= 0.8 {
        parts.push("high novelty — first appearance in monitoring window".to_string());
    } else if c.novelty_score >= 0.6 {
        parts.push("notable new angles emerging".to_string());
    }

    parts.join(". ") + "."
}

/// Generate a "predictive outlook" line from forward-looking signals.
pub fn generate_outlook(c: &CandidateItem) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(
        if c.prediction_signal >= 0.7 {
            "Strong forward-looking signals suggest significant near-term developments"
        } else if c.prediction_signal >= 0.4 {
            "Moderate predictive signals — situation likely to evolve"
        } else {
            "Limited forward indicators at this time"
        }
        .to_string(),
    );

    match c.urgency {
        UrgencyLevel::Critical => parts.push("monitor for rapid escalation".to_string()),
        UrgencyLevel::Breaking => {
            parts.push("watch for follow-on developments within hours".to_string());
        }
        UrgencyLevel::Elevated => {
            parts.push("elevated watch priority for coming days".to_string());
        }
        UrgencyLevel::Routine => {}
    }

    if c.evidence_score >= 0.8 {
        parts.push("assessment backed by strong evidence base".to_string());
    } else if c.evidence_score < 0.4 {
        parts.push("limited evidence — outlook may shift rapidly".to_string());
    }

    const MARKET_TOPICS: [&str; 5] = ["markets", "crypto", "economics", "trade", "energy"];
    if MARKET_TOPICS.contains(&c.topic.as_str()) && c.prediction_signal >= 0.5 {
        parts.push("potential market-moving implications".to_string());
    }

    if c.corroborated_by.len() >= 3 {
        parts.push("high multi-source conviction".to_string());
    }

    parts.join(". ") + "."
}

/// Generate adjacent-read titles from thread siblings and same-topic reserve
/// candidates, best-scored first.
pub fn generate_adjacent_reads(
    c: &CandidateItem,
    threads: &[NarrativeThread],
    reserve: &[CandidateItem],
    limit: usize,
) -> Vec<String> {
    let mut reads: Vec<String> = Vec::new();
    let mut seen_ids: Vec<&str> = vec![&c.candidate_id];

    let push_read = |reads: &mut Vec<String>, title: &str, source: &str| {
        let mut title = title.to_string();
        if title.chars().count() > 100 {
            let head: String = title.chars().take(100).collect();
            title = match head.rfind(' ') {
                Some(cut) if cut > 40 => format!("{}...", &head[..cut]),
                _ => format!("{}...", head.chars().take(97).collect::<String>()),
            };
        }
        reads.push(format!("{title} [{source}]"));
    };

    // Thread siblings: same narrative, different sources.
    for thread in threads {
        if !thread.candidates.iter().any(|s| s.candidate_id == c.candidate_id) {
            continue;
        }
        for sibling in &thread.candidates {
            if seen_ids.contains(&sibling.candidate_id.as_str()) || sibling.source == c.source {
                continue;
            }
            push_read(&mut reads, &sibling.title, &sibling.source);
            seen_ids.push(&sibling.candidate_id);
            if reads.len() >= limit {
                return reads;
            }
        }
    }

    // Same-topic reserve candidates, best composite first.
    let mut topic_matches: Vec<&CandidateItem> = reserve
        .iter()
        .filter(|r| r.topic == c.topic && !seen_ids.contains(&r.candidate_id.as_str()))
        .collect();
    topic_matches.sort_by(|a, b| {
        b.composite_score()
            .partial_cmp(&a.composite_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for r in topic_matches {
        push_read(&mut reads, &r.title, &r.source);
        if reads.len() >= limit {
            break;
        }
    }

    reads
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_candidate(id: &str, source: &str, topic: &str) -> CandidateItem {
        CandidateItem {
            candidate_id: id.to_string(),
            title: format!("Headline for {id}"),
            source: source.to_string(),
            summary: "Feed teaser text.".to_string(),
            url: String::new(),
            topic: topic.to_string(),
            evidence_score: 0.8,
            novelty_score: 0.6,
            preference_fit: 0.5,
            prediction_signal: 0.5,
            discovered_by: format!("agent_{source}"),
            created_at: Utc::now(),
            lifecycle: StoryLifecycle::Developing,
            urgency: UrgencyLevel::Routine,
            regions: Vec::new(),
            corroborated_by: Vec::new(),
            contrarian_signal: String::new(),
        }
    }

    #[test]
    fn why_never_equals_summary_and_mentions_source() {
        let tracker = CredibilityTracker::new();
        let c = make_candidate("c1", "reuters", "markets");
        let why = generate_why(&c, &tracker, None);
        assert_ne!(why, c.summary);
        assert!(why.contains("Reuters"));
        assert!(why.contains("major wire service"));
    }

    #[test]
    fn why_reflects_profile_weight() {
        let tracker = CredibilityTracker::new();
        let c = make_candidate("c1", "reuters", "markets");
        let mut profile = UserProfile::new("u1");
        profile.topic_weights.insert("markets".to_string(), 0.9);
        let why = generate_why(&c, &tracker, Some(&profile));
        assert!(why.contains("high-priority interest"));
    }

    #[test]
    fn what_changed_tracks_corroboration_depth() {
        let mut c = make_candidate("c1", "reuters", "markets");
        assert!(generate_what_changed(&c).contains("single-source"));
        c.corroborated_by = vec!["bbc".to_string(), "ap".to_string(), "ft".to_string()];
        assert!(generate_what_changed(&c).contains("3 independent sources"));
    }

    #[test]
    fn outlook_flags_market_movers() {
        let mut c = make_candidate("c1", "ft", "markets");
        c.prediction_signal = 0.8;
        let outlook = generate_outlook(&c);
        assert!(outlook.contains("market-moving"));
    }

    #[test]
    fn adjacent_reads_prefer_thread_siblings() {
        let a = make_candidate("a", "reuters", "markets");
        let b = make_candidate("b", "bbc", "markets");
        let thread = NarrativeThread {
            thread_id: "thread-1".to_string(),
            headline: a.title.clone(),
            candidates: vec![a.clone(), b.clone()],
            lifecycle: StoryLifecycle::Developing,
            urgency: UrgencyLevel::Routine,
            source_count: 2,
            confidence: None,
        };
        let reserve = vec![make_candidate("r1", "ft", "markets")];
        let reads = generate_adjacent_reads(&a, &[thread], &reserve, 3);
        assert_eq!(reads.len(), 2);
        assert!(reads[0].contains("[bbc]"));
        assert!(reads[1].contains("[ft]"));
    }

    #[test]
    fn adjacent_reads_truncate_long_titles() {
        let a = make_candidate("a", "reuters", "markets");
        let mut long = make_candidate("r1", "ft", "markets");
        long.title = "word ".repeat(40).trim().to_string();
        let reads = generate_adjacent_reads(&a, &[], &[long], 3);
        assert!(reads[0].len() < 120);
        assert!(reads[0].contains("..."));
    }
}
