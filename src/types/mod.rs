//! Core domain types for the briefing pipeline.

mod candidate;
mod profile;
mod report;

pub use candidate::{
    sanitize_text, validate_candidate, BriefingType, CandidateItem, ResearchTask, StoryLifecycle,
    UrgencyLevel, MAX_SUMMARY_CHARS, MAX_TITLE_CHARS,
};
pub use profile::{
    Bookmark, CustomSource, Preset, TrackedStory, UserProfile, MAX_BOOKMARKS, MAX_CUSTOM_SOURCES,
    MAX_TRACKED_STORIES, MAX_WEIGHTS,
};
pub use report::{
    ConfidenceBand, DebateRecord, DebateVote, DeliveryPayload, GeoRiskEntry, NarrativeThread,
    PayloadMetadata, PipelineHealth, ReportItem, SourceReliability, TrendSnapshot,
};
