//! classgrid core: the data model shared by every pipeline phase.
//!
//! Rosters are validated once, relationship graphs are derived once, and
//! scenarios carry their own incrementally maintained metrics so that phases
//! can branch cheaply.
//!
//! # Components
//!
//! - **`roster`**: individuals, attributes and roster validation
//! - **`relations`**: affinity and incompatibility pairs, conflict severity
//! - **`metrics`**: per-group counters, spreads and balance penalties
//! - **`scenario`**: partial assignments with provenance, locks and pools
//! - **`config`**: engine configuration loaded from TOML
//! - **`context`**: read-only inputs shared by all phases of a run
//! - **`error`**: validation and write errors

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod relations;
pub mod roster;
pub mod scenario;

pub use config::{
    BalanceConfig, EngineConfig, FounderConfig, PairConfig, PerformanceConfig, QuotaConfig,
    ResidualConfig, ScoringConfig, TierConfig,
};
pub use context::PhaseContext;
pub use error::{CoreError, CoreResult};
pub use metrics::{BalanceWeights, Dimension, GroupTally, Metrics, PenaltyRule};
pub use relations::{
    AffinityPair, GenderMix, IncompatibilityPair, LanguageMix, Relations, UnitCategory,
    conflict_severity,
};
pub use roster::{
    DEFAULT_CAPACITY, Flags, Gender, Individual, IndividualId, Performance, Roster, RosterRecord,
    canonical_name, default_group_count, group_label,
};
pub use scenario::{Note, NoteKind, Phase, Placement, Scenario, ScenarioPool};
