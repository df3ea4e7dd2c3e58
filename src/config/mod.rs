//! Configuration Module
//!
//! Loads the three JSON config files that drive the pipeline:
//!
//! 1. `pipelines.json` — scoring weights, stage enablement, limits, thresholds
//! 2. `agents.json` — research agent roster and expert council membership
//! 3. `personas.json` — editorial persona list and notes
//!
//! ## Loading Order
//!
//! 1. `BRIEFWIRE_CONFIG_DIR` environment variable (directory of JSON files)
//! 2. `--config-dir` CLI flag
//! 3. Built-in defaults
//!
//! ## Scoring Hot Reload
//!
//! The scoring table is read on every composite-score computation, so it lives
//! behind an `ArcSwap` and is replaced atomically when SIGHUP triggers a
//! reload. A failed reload is logged and the previous config stays active.

mod agents;
mod pipeline;

pub use agents::{AgentConfig, AgentsConfig, PersonasConfig};
pub use pipeline::{
    ApiKeys, BriefingTypeThresholds, EngineConfig, EnrichmentConfig, ExpertCouncilConfig,
    IntelligenceConfig, Limits, OptimizerConfig, PersistenceConfig, PipelineConfig,
    PreferenceDeltas, ScoringConfig, UrgencyKeywords,
};

use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use arc_swap::ArcSwap;

/// Process-wide scoring configuration, swapped atomically on reload.
static SCORING: OnceLock<ArcSwap<ScoringConfig>> = OnceLock::new();

fn scoring_cell() -> &'static ArcSwap<ScoringConfig> {
    SCORING.get_or_init(|| ArcSwap::from_pointee(ScoringConfig::default()))
}

/// Get the current scoring configuration.
///
/// Returns built-in defaults until `swap_scoring` installs a loaded config,
/// so domain types stay usable in tests without global setup.
pub fn scoring() -> Arc<ScoringConfig> {
    scoring_cell().load_full()
}

/// Atomically replace the process-wide scoring configuration.
pub fn swap_scoring(cfg: ScoringConfig) {
    scoring_cell().store(Arc::new(cfg));
}

/// The full set of loaded configuration files.
#[derive(Debug, Clone)]
pub struct ConfigSet {
    pub pipeline: PipelineConfig,
    pub agents: AgentsConfig,
    pub personas: PersonasConfig,
}

impl ConfigSet {
    /// Load and validate all config files from a directory.
    ///
    /// Missing files fall back to defaults; a present-but-invalid file is a
    /// hard error so a broken deployment fails loudly at startup. Reload
    /// callers catch the error and keep the previous config instead.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let pipeline = load_or_default::<PipelineConfig>(&dir.join("pipelines.json"))?;
        pipeline
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .context("pipelines.json failed validation")?;

        let agents = load_or_default::<AgentsConfig>(&dir.join("agents.json"))?;
        let personas = load_or_default::<PersonasConfig>(&dir.join("personas.json"))?;

        tracing::info!(
            config_dir = %dir.display(),
            research_agents = agents.research_agents.len(),
            experts = agents.expert_agents.len(),
            personas = personas.default_personas.len(),
            "Configuration loaded"
        );

        Ok(Self {
            pipeline,
            agents,
            personas,
        })
    }

    /// Built-in defaults for keyless, fileless operation.
    pub fn builtin() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            agents: AgentsConfig::default(),
            personas: PersonasConfig::default(),
        }
    }
}

fn load_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Config file absent, using defaults");
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_defaults_available_without_init() {
        let cfg = scoring();
        let sum = cfg.composite_weights.evidence
            + cfg.composite_weights.novelty
            + cfg.composite_weights.preference_fit
            + cfg.composite_weights.prediction_signal;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn load_dir_missing_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let set = ConfigSet::load_dir(dir.path()).unwrap();
        assert_eq!(set.pipeline.limits.default_max_items, 10);
        assert!(!set.agents.research_agents.is_empty());
    }

    #[test]
    fn load_dir_rejects_bad_weights() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pipelines.json"),
            r#"{"scoring": {"composite_weights": {"evidence": 0.9, "novelty": 0.9, "preference_fit": 0.1, "prediction_signal": 0.1}}}"#,
        )
        .unwrap();
        assert!(ConfigSet::load_dir(dir.path()).is_err());
    }
}
