//! Core error types.

use thiserror::Error;

use crate::roster::IndividualId;
use crate::scenario::Phase;

/// Errors raised by roster validation and scenario writes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("roster is empty")]
    EmptyRoster,

    #[error("roster record {index} has no name")]
    MissingName { index: usize },

    #[error("duplicate name in roster: {0}")]
    DuplicateName(String),

    #[error("invalid group count {0}: at least 2 groups are required")]
    InvalidGroupCount(usize),

    #[error("population {population} is smaller than the group count {groups}")]
    TooFewIndividuals { population: usize, groups: usize },

    #[error("population {population} does not fit in {groups} groups of {capacity}")]
    OverCapacity {
        population: usize,
        groups: usize,
        capacity: usize,
    },

    #[error("invalid performance tier {0}: expected 1, 2 or 3")]
    InvalidPerformance(u8),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("individual {0} is already placed")]
    AlreadyPlaced(IndividualId),

    #[error("individual {0} is not placed")]
    NotPlaced(IndividualId),

    #[error("individual {individual} was locked by {phase}")]
    Locked { individual: IndividualId, phase: Phase },

    #[error("group {group} is at capacity")]
    GroupFull { group: usize },

    #[error("unknown group index {0}")]
    UnknownGroup(usize),
}

pub type CoreResult<T> = Result<T, CoreError>;
