//! Intelligence enrichment stages.
//!
//! Each stage is individually enableable from `pipelines.json`. Stages are
//! tolerant of missing upstream enrichment: clustering works without
//! credibility data, report assembly works without threads, and so on.

pub mod clustering;
pub mod credibility;
pub mod enrichment;
pub mod georisk;
pub mod narrative;
pub mod trends;
pub mod urgency;

pub use clustering::StoryClustering;
pub use credibility::{detect_cross_corroboration, enforce_source_diversity, CredibilityTracker};
pub use enrichment::ArticleEnricher;
pub use georisk::GeoRiskIndex;
pub use trends::TrendDetector;
pub use urgency::BreakingDetector;
