//! classgrid scoring: phase 8 breakdowns, ranking and selection.
//!
//! # Components
//!
//! - **`scorer`**: pairwise-difference penalties, conflicts, broken pairs
//!   and per-group reports for one scenario
//! - **`selector`**: ranking of final scenarios and the seeded tie-break

pub mod scorer;
pub mod selector;

pub use scorer::{
    BrokenPairReport, GroupReport, IncompatibilityReport, ScoreBreakdown, score_scenario,
};
pub use selector::{ScoredScenario, rank_scenarios, select_best};

#[cfg(test)]
pub(crate) mod fixtures {
    use classgrid_core::{Gender, Roster, RosterRecord};

    pub fn person(name: &str, gender: Gender) -> RosterRecord {
        RosterRecord {
            name: name.to_string(),
            gender,
            good_language: true,
            flags: Default::default(),
            performance: Default::default(),
            friends: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn roster(records: Vec<RosterRecord>, groups: usize) -> Roster {
        Roster::from_records(records, Some(groups), 25).unwrap()
    }
}
