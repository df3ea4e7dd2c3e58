//! Plain-text preference command parsing.
//!
//! Turns feedback like "more geopolitics, less crypto, tone: analyst" into
//! structured commands. Parsing is permissive: unrecognized fragments are
//! ignored rather than rejected, since the same text may also carry
//! conversational content.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::PreferenceDeltas;

#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceCommand {
    TopicDelta { topic: String, delta: f64 },
    Tone(String),
    Format(String),
    Region(String),
    RemoveRegion(String),
    Cadence(String),
    MaxItems(usize),
    SourceBoost(String),
    SourceDemote(String),
    Reset,
}

/// Common English words that must not be mistaken for source names.
const SOURCE_NOISE: [&str; 17] = [
    "your", "my", "the", "this", "that", "it", "its", "our", "all", "any", "more", "less", "a",
    "an", "in", "on", "is",
];

#[allow(clippy::expect_used)]
fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid static regex"))
}

fn more_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\bmore\s+(.+?)(?:\b(?:and\s+less|less|tone|format|region|cadence)\b|[.,;]|$)")
}

fn less_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\bless\s+(.+?)(?:\b(?:and\s+more|more|tone|format|region|cadence)\b|[.,;]|$)")
}

fn tone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\btone\s*[:=]?\s*(concise|analyst|brief|deep|executive)\b")
}

fn format_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\bformat\s*[:=]?\s*(bullet|sections|narrative)\b")
}

fn region_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\bregion\s*[:=]?\s*(\w[\w\s]*?)(?:\b(?:tone|format|more|less|cadence)\b|[.,;]|$)")
}

fn remove_region_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\b(?:remove|drop)\s+region\s*[:=]?\s*(\w[\w\s]*?)(?:[.,;]|$)")
}

fn cadence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\bcadence\s*[:=]?\s*(on_demand|morning|evening|realtime)\b")
}

fn max_items_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\bmax\s*[:=]?\s*(\d+)\b")
}

fn source_boost_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\b(?:prefer|trust|boost)\s+(\w{2,})")
}

fn source_demote_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\b(?:demote|distrust|penalize)\s+(\w{2,})")
}

fn reset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(?i)\breset\s+(?:all\s+)?preferences?\b")
}

fn clean_topic(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches('_')
        .to_string()
}

/// Parse free-text feedback into preference commands.
pub fn parse_preference_commands(text: &str, deltas: &PreferenceDeltas) -> Vec<PreferenceCommand> {
    let mut commands = Vec::new();

    for caps in more_re().captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let topic = clean_topic(m.as_str());
            if !topic.is_empty() {
                commands.push(PreferenceCommand::TopicDelta {
                    topic,
                    delta: deltas.more,
                });
            }
        }
    }
    for caps in less_re().captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let topic = clean_topic(m.as_str());
            if !topic.is_empty() {
                commands.push(PreferenceCommand::TopicDelta {
                    topic,
                    delta: deltas.less,
                });
            }
        }
    }

    if let Some(caps) = tone_re().captures(text) {
        if let Some(m) = caps.get(1) {
            commands.push(PreferenceCommand::Tone(m.as_str().to_lowercase()));
        }
    }
    if let Some(caps) = format_re().captures(text) {
        if let Some(m) = caps.get(1) {
            commands.push(PreferenceCommand::Format(m.as_str().to_lowercase()));
        }
    }

    // Remove/drop region is checked first; a match suppresses the add form.
    if let Some(caps) = remove_region_re().captures(text) {
        if let Some(m) = caps.get(1) {
            commands.push(PreferenceCommand::RemoveRegion(clean_topic(m.as_str())));
        }
    } else if let Some(caps) = region_re().captures(text) {
        if let Some(m) = caps.get(1) {
            commands.push(PreferenceCommand::Region(clean_topic(m.as_str())));
        }
    }

    if let Some(caps) = cadence_re().captures(text) {
        if let Some(m) = caps.get(1) {
            commands.push(PreferenceCommand::Cadence(m.as_str().to_lowercase()));
        }
    }
    if let Some(caps) = max_items_re().captures(text) {
        if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
            commands.push(PreferenceCommand::MaxItems(n));
        }
    }

    for caps in source_boost_re().captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let src = m.as_str().to_lowercase();
            if !SOURCE_NOISE.contains(&src.as_str()) {
                commands.push(PreferenceCommand::SourceBoost(src));
            }
        }
    }
    for caps in source_demote_re().captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let src = m.as_str().to_lowercase();
            if !SOURCE_NOISE.contains(&src.as_str()) {
                commands.push(PreferenceCommand::SourceDemote(src));
            }
        }
    }

    if reset_re().is_match(text) {
        commands.push(PreferenceCommand::Reset);
    }

    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Vec<PreferenceCommand> {
        parse_preference_commands(text, &PreferenceDeltas::default())
    }

    #[test]
    fn parses_more_and_less() {
        let cmds = parse("more geopolitics, less crypto");
        assert!(cmds.contains(&PreferenceCommand::TopicDelta {
            topic: "geopolitics".to_string(),
            delta: 0.2,
        }));
        assert!(cmds.contains(&PreferenceCommand::TopicDelta {
            topic: "crypto".to_string(),
            delta: -0.2,
        }));
    }

    #[test]
    fn parses_tone_and_format() {
        let cmds = parse("tone: analyst format: narrative");
        assert!(cmds.contains(&PreferenceCommand::Tone("analyst".to_string())));
        assert!(cmds.contains(&PreferenceCommand::Format("narrative".to_string())));
    }

    #[test]
    fn remove_region_suppresses_add() {
        let cmds = parse("remove region middle east");
        assert!(cmds.contains(&PreferenceCommand::RemoveRegion("middle_east".to_string())));
        assert!(!cmds.iter().any(|c| matches!(c, PreferenceCommand::Region(_))));
    }

    #[test]
    fn source_noise_words_ignored() {
        let cmds = parse("trust your judgment but prefer reuters");
        assert!(cmds.contains(&PreferenceCommand::SourceBoost("reuters".to_string())));
        assert!(!cmds.contains(&PreferenceCommand::SourceBoost("your".to_string())));
    }

    #[test]
    fn parses_reset_and_max() {
        let cmds = parse("reset all preferences, max: 5");
        assert!(cmds.contains(&PreferenceCommand::Reset));
        assert!(cmds.contains(&PreferenceCommand::MaxItems(5)));
    }

    #[test]
    fn empty_text_parses_to_nothing() {
        assert!(parse("just a chat message with no commands").is_empty());
    }
}
