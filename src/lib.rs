//! Briefwire: Personal Intelligence Briefing Engine
//!
//! For each request, the engine fans out to many news sources, scores and
//! deduplicates the candidates, runs them through a multi-expert voting
//! panel, enriches the survivors with fetched article text and generated
//! analysis, and assembles a structured briefing payload. User preferences
//! and feedback feed back into scoring and ranking.
//!
//! ## Architecture
//!
//! - **Research agents**: concurrent per-source candidate discovery
//! - **Intelligence**: credibility, corroboration, urgency, diversity,
//!   clustering, geo-risk, trends, article enrichment
//! - **Expert council**: persona voting with chair arbitration
//! - **Editorial review**: style and clarity rewriting
//! - **Engine**: backpressure semaphore, pipeline deadline, audit, metrics

pub mod agents;
pub mod analytics;
pub mod config;
pub mod delivery;
pub mod experts;
pub mod intelligence;
pub mod memory;
pub mod orchestration;
pub mod review;
pub mod types;

// Re-export the engine surface
pub use orchestration::{Engine, EngineError};

// Re-export commonly used types
pub use types::{
    BriefingType, CandidateItem, ConfidenceBand, DeliveryPayload, GeoRiskEntry, NarrativeThread,
    ReportItem, ResearchTask, StoryLifecycle, TrendSnapshot, UrgencyLevel, UserProfile,
};

// Re-export configuration
pub use config::{ConfigSet, PipelineConfig};
