//! Engine configuration (`classgrid.toml`).
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::metrics::{BalanceWeights, PenaltyRule};
use crate::roster::DEFAULT_CAPACITY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum individuals per group.
    pub capacity: usize,
    /// Explicit group count; derived from the population when absent.
    pub group_count: Option<usize>,
    /// Seed for every tie-break in the pipeline.
    pub seed: u64,
    /// Survivors kept per phase.
    pub max_scenarios: usize,
    pub founders: FounderConfig,
    pub quota: QuotaConfig,
    pub pairs: PairConfig,
    pub residual: ResidualConfig,
    pub balance: BalanceConfig,
    pub performance: PerformanceConfig,
    pub scoring: ScoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            group_count: None,
            seed: 42,
            max_scenarios: 5,
            founders: FounderConfig::default(),
            quota: QuotaConfig::default(),
            pairs: PairConfig::default(),
            residual: ResidualConfig::default(),
            balance: BalanceConfig::default(),
            performance: PerformanceConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FounderConfig {
    /// Upper bound on enumerated assignments before the search stops.
    pub max_assignments: u64,
}

impl Default for FounderConfig {
    fn default() -> Self {
        Self {
            max_assignments: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Upper bound on complete assignments examined.
    pub max_leaves: usize,
    /// Upper bound on search nodes expanded per scenario.
    pub max_nodes: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_leaves: 20_000,
            max_nodes: 200_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairConfig {
    pub max_population_spread: u32,
    pub max_language_spread: u32,
    pub max_gender_spread: u32,
    pub population_weight: f64,
    pub gender_weight: f64,
    pub language_weight: f64,
    /// Fill groups towards each category's fair share instead of
    /// minimising weighted variance.
    pub ideal_strategy: bool,
    /// Prefer a group whose previous pair had a different category.
    pub alternate_categories: bool,
    /// Upper bound on search nodes expanded per scenario.
    pub max_nodes: usize,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            max_population_spread: 4,
            max_language_spread: 6,
            max_gender_spread: 6,
            population_weight: 1.0,
            gender_weight: 0.6,
            language_weight: 0.6,
            ideal_strategy: true,
            alternate_categories: true,
            max_nodes: 200_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidualConfig {
    pub preferred_population_spread: u32,
    pub broken_weight: u32,
}

impl Default for ResidualConfig {
    fn default() -> Self {
        Self {
            preferred_population_spread: 2,
            broken_weight: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub target_population: u32,
    pub target_gender: u32,
    pub target_language: u32,
    pub max_iterations: usize,
    /// How many high and low groups candidate swaps are drawn from.
    pub extreme_groups: usize,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            target_population: 2,
            target_gender: 3,
            target_language: 3,
            max_iterations: 5,
            extreme_groups: 2,
        }
    }
}

/// One tolerance level of the performance repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub max_swaps: usize,
    pub target_spread: u32,
    pub gender_cap: u32,
    pub language_cap: u32,
}

impl TierConfig {
    fn new(
        name: &str,
        max_swaps: usize,
        target_spread: u32,
        gender_cap: u32,
        language_cap: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            max_swaps,
            target_spread,
            gender_cap,
            language_cap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_population_spread: u32,
    pub max_buffer_swaps: usize,
    pub early_stop_no_improve: usize,
    pub tiers: Vec<TierConfig>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_population_spread: 2,
            max_buffer_swaps: 10,
            early_stop_no_improve: 5,
            tiers: vec![
                TierConfig::new("T1", 40, 2, 2, 3),
                TierConfig::new("T2", 40, 3, 2, 3),
                TierConfig::new("T3", 40, 3, 3, 3),
                TierConfig::new("T4", 20, 3, 4, 4),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub population: PenaltyRule,
    pub boys: PenaltyRule,
    pub girls: PenaltyRule,
    pub language: PenaltyRule,
    pub performance: PenaltyRule,
    pub broken_weight: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            population: PenaltyRule::new(1, 3),
            boys: PenaltyRule::new(1, 2),
            girls: PenaltyRule::new(1, 2),
            language: PenaltyRule::new(2, 1),
            performance: PenaltyRule::new(2, 1),
            broken_weight: 5,
        }
    }
}

impl ScoringConfig {
    /// Weights for the four balance dimensions, shared by balance repair
    /// and final scoring.
    pub fn balance_weights(&self) -> BalanceWeights {
        BalanceWeights {
            population: self.population,
            boys: self.boys,
            girls: self.girls,
            language: self.language,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.capacity == 0 {
            return Err(CoreError::InvalidConfig("capacity must be positive".into()));
        }
        if self.max_scenarios == 0 {
            return Err(CoreError::InvalidConfig("max_scenarios must be positive".into()));
        }
        if let Some(k) = self.group_count {
            if k < 2 {
                return Err(CoreError::InvalidGroupCount(k));
            }
        }
        if self.performance.tiers.is_empty() {
            return Err(CoreError::InvalidConfig(
                "at least one performance tier is required".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.capacity, 25);
        assert_eq!(config.performance.tiers.len(), 4);
        assert_eq!(config.performance.tiers[3].max_swaps, 20);
    }

    #[test]
    fn partial_sections_override_defaults() {
        let toml = r#"
seed = 7
group_count = 3

[balance]
max_iterations = 9

[scoring.population]
free = 0
weight = 4
"#;
        let config = EngineConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.group_count, Some(3));
        assert_eq!(config.balance.max_iterations, 9);
        assert_eq!(config.balance.target_gender, 3, "unset keys keep defaults");
        assert_eq!(config.scoring.population, PenaltyRule::new(0, 4));
        assert_eq!(config.scoring.language, PenaltyRule::new(2, 1));
    }

    #[test]
    fn toml_roundtrip() {
        let config = EngineConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(EngineConfig::from_toml_str("group_count = 1").is_err());
        assert!(EngineConfig::from_toml_str("capacity = 0").is_err());

        let mut config = EngineConfig::default();
        config.performance.tiers.clear();
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }
}
