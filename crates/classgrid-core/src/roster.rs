//! Roster and individual model.
//!
//! A [`Roster`] is built once from the raw [`RosterRecord`]s supplied by an
//! import layer. Names are canonicalised, affinity and incompatibility
//! nominations are resolved to dense ids, and the group count is fixed.
//! Every attribute is read-only afterwards.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Dense index of an individual inside its roster.
pub type IndividualId = usize;

/// Default maximum number of individuals per group.
pub const DEFAULT_CAPACITY: usize = 25;

// ── Attributes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Boy,
    Girl,
}

impl Gender {
    pub fn opposite(self) -> Self {
        match self {
            Gender::Boy => Gender::Girl,
            Gender::Girl => Gender::Boy,
        }
    }
}

/// Three-valued performance tier. Tier 1 and tier 3 are the extremes
/// balanced by the performance repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Performance {
    One,
    #[default]
    Two,
    Three,
}

impl Performance {
    pub fn index(self) -> usize {
        match self {
            Performance::One => 0,
            Performance::Two => 1,
            Performance::Three => 2,
        }
    }
}

impl TryFrom<u8> for Performance {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Performance::One),
            2 => Ok(Performance::Two),
            3 => Ok(Performance::Three),
            other => Err(CoreError::InvalidPerformance(other)),
        }
    }
}

impl From<Performance> for u8 {
    fn from(value: Performance) -> Self {
        value.index() as u8 + 1
    }
}

/// Protected-category flags. Per-group subtotals of these are frozen
/// once seeding completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default)]
    pub founder: bool,
    #[serde(default)]
    pub high_energy: bool,
    #[serde(default)]
    pub special_needs: bool,
}

impl Flags {
    pub fn any(&self) -> bool {
        self.founder || self.high_energy || self.special_needs
    }
}

// ── Input record ───────────────────────────────────────────────────

/// One roster row as supplied by the import layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRecord {
    pub name: String,
    pub gender: Gender,
    /// Good proficiency in the language of instruction.
    pub good_language: bool,
    #[serde(flatten)]
    pub flags: Flags,
    #[serde(default)]
    pub performance: Performance,
    /// Raw names this individual would like to be grouped with.
    #[serde(default)]
    pub friends: Vec<String>,
    /// Raw names this individual should be kept apart from.
    #[serde(default)]
    pub conflicts: Vec<String>,
}

// ── Individual ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Individual {
    pub id: IndividualId,
    pub name: String,
    pub gender: Gender,
    pub good_language: bool,
    pub flags: Flags,
    pub performance: Performance,
    /// Resolved affinity nominations (one-directional).
    pub friends: Vec<IndividualId>,
    /// Resolved incompatibility nominations (one-directional).
    pub conflicts: Vec<IndividualId>,
}

impl Individual {
    pub fn is_boy(&self) -> bool {
        self.gender == Gender::Boy
    }

    pub fn is_girl(&self) -> bool {
        self.gender == Gender::Girl
    }

    /// Gender and language, the category used by same-category swaps.
    pub fn category(&self) -> (Gender, bool) {
        (self.gender, self.good_language)
    }

    pub fn nominates_conflict(&self, other: IndividualId) -> bool {
        self.conflicts.contains(&other)
    }
}

// ── Roster ─────────────────────────────────────────────────────────

/// Immutable population plus the fixed group layout.
#[derive(Debug, Clone)]
pub struct Roster {
    individuals: Vec<Individual>,
    by_name: HashMap<String, IndividualId>,
    group_count: usize,
    capacity: usize,
}

impl Roster {
    /// Validate and resolve raw records.
    ///
    /// Fails with an infeasible-input error when names are missing or
    /// duplicated, when fewer individuals than groups are supplied, or when
    /// the population cannot fit in `group_count * capacity` seats.
    pub fn from_records(
        records: Vec<RosterRecord>,
        group_count: Option<usize>,
        capacity: usize,
    ) -> CoreResult<Self> {
        if records.is_empty() {
            return Err(CoreError::EmptyRoster);
        }
        if capacity == 0 {
            return Err(CoreError::InvalidConfig("capacity must be positive".into()));
        }

        let population = records.len();
        let groups = match group_count {
            Some(k) if k < 2 => return Err(CoreError::InvalidGroupCount(k)),
            Some(k) => k,
            None => default_group_count(population, capacity),
        };
        if population < groups {
            return Err(CoreError::TooFewIndividuals { population, groups });
        }
        if population > groups * capacity {
            return Err(CoreError::OverCapacity {
                population,
                groups,
                capacity,
            });
        }

        let mut by_name = HashMap::with_capacity(population);
        for (index, record) in records.iter().enumerate() {
            let key = canonical_name(&record.name);
            if key.is_empty() {
                return Err(CoreError::MissingName { index });
            }
            if by_name.insert(key, index).is_some() {
                return Err(CoreError::DuplicateName(record.name.trim().to_string()));
            }
        }

        let resolve = |owner: &str, id: IndividualId, raw: &[String]| -> Vec<IndividualId> {
            let mut out = Vec::with_capacity(raw.len());
            for name in raw {
                match by_name.get(&canonical_name(name)) {
                    Some(&target) if target != id => {
                        if !out.contains(&target) {
                            out.push(target);
                        }
                    }
                    Some(_) => debug!(individual = owner, "ignoring self nomination"),
                    None => {
                        debug!(individual = owner, target = %name, "ignoring unknown nomination")
                    }
                }
            }
            out
        };

        let individuals = records
            .into_iter()
            .enumerate()
            .map(|(id, record)| {
                let friends = resolve(&record.name, id, &record.friends);
                let conflicts = resolve(&record.name, id, &record.conflicts);
                Individual {
                    id,
                    name: record.name.trim().to_string(),
                    gender: record.gender,
                    good_language: record.good_language,
                    flags: record.flags,
                    performance: record.performance,
                    friends,
                    conflicts,
                }
            })
            .collect();

        Ok(Self {
            individuals,
            by_name,
            group_count: groups,
            capacity,
        })
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    pub fn get(&self, id: IndividualId) -> &Individual {
        &self.individuals[id]
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up an individual by (non-canonical) name.
    pub fn find(&self, name: &str) -> Option<IndividualId> {
        self.by_name.get(&canonical_name(name)).copied()
    }

    pub fn name(&self, id: IndividualId) -> &str {
        &self.individuals[id].name
    }
}

impl fmt::Display for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} individuals in {} groups of {}",
            self.individuals.len(),
            self.group_count,
            self.capacity
        )
    }
}

/// `max(2, ceil(population / capacity))`.
pub fn default_group_count(population: usize, capacity: usize) -> usize {
    population.div_ceil(capacity.max(1)).max(2)
}

/// Display label of a dense group index: `A1`, `A2`, ...
pub fn group_label(group: usize) -> String {
    format!("A{}", group + 1)
}

/// Trim, collapse internal whitespace and upper-case.
pub fn canonical_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
