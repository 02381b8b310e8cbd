//! Read-only inputs shared by every phase of one pipeline run.

use crate::config::EngineConfig;
use crate::relations::Relations;
use crate::roster::{Individual, IndividualId, Roster};

/// Roster, derived relationship graphs and engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext<'a> {
    pub roster: &'a Roster,
    pub relations: &'a Relations,
    pub config: &'a EngineConfig,
}

impl<'a> PhaseContext<'a> {
    pub fn new(roster: &'a Roster, relations: &'a Relations, config: &'a EngineConfig) -> Self {
        Self {
            roster,
            relations,
            config,
        }
    }

    pub fn individual(&self, id: IndividualId) -> &'a Individual {
        self.roster.get(id)
    }

    pub fn group_count(&self) -> usize {
        self.roster.group_count()
    }

    /// Scenario fan-out limit, never below one.
    pub fn max_scenarios(&self) -> usize {
        self.config.max_scenarios.max(1)
    }
}
