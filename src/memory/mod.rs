//! User memory: preference store, candidate cache, feedback commands, and
//! state persistence.

mod commands;
mod persistence;
mod store;

pub use commands::{parse_preference_commands, PreferenceCommand};
pub use persistence::StatePersistence;
pub use store::{extract_keywords, CandidateCache, PreferenceStore};
