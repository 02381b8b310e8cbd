//! Scenarios and scenario pools.
//!
//! A [`Scenario`] is a complete or partial mapping from individual to group
//! with per-individual provenance and a cached [`Metrics`] snapshot. Phases
//! never mutate their parent: they call [`Scenario::derive`] and write into
//! the child. Placements made by a locked phase are frozen; every write path
//! checks the lock before touching the mapping.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::metrics::Metrics;
use crate::relations::AffinityPair;
use crate::roster::{Individual, IndividualId, Roster, group_label};

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Founders,
    Quota,
    Attach,
    Pairs,
    Residual,
    Balance,
    Performance,
    Selection,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Founders,
        Phase::Quota,
        Phase::Attach,
        Phase::Pairs,
        Phase::Residual,
        Phase::Balance,
        Phase::Performance,
        Phase::Selection,
    ];

    /// 1-based stage number.
    pub fn number(self) -> u8 {
        match self {
            Phase::Founders => 1,
            Phase::Quota => 2,
            Phase::Attach => 3,
            Phase::Pairs => 4,
            Phase::Residual => 5,
            Phase::Balance => 6,
            Phase::Performance => 7,
            Phase::Selection => 8,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Founders => "founders",
            Phase::Quota => "quota",
            Phase::Attach => "attach",
            Phase::Pairs => "pairs",
            Phase::Residual => "residual",
            Phase::Balance => "balance",
            Phase::Performance => "performance",
            Phase::Selection => "selection",
        };
        write!(f, "phase {} ({name})", self.number())
    }
}

/// Where an individual sits and which phase put them there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub group: usize,
    pub phase: Phase,
    /// Last repair phase that relocated this individual, if any.
    pub moved_by: Option<Phase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// The phase had nothing to do and passed its parent through.
    CarryForward,
    /// Search produced no feasible candidate; the parent was passed through.
    SearchExhausted,
    /// Repair stopped before reaching its targets.
    RepairIncomplete,
}

/// Diagnostic attached to a scenario by a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    pub phase: Phase,
    pub kind: NoteKind,
    pub message: String,
}

/// One candidate assignment.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    id: String,
    placements: Vec<Option<Placement>>,
    metrics: Metrics,
    capacity: usize,
    locked_through: Option<Phase>,
    broken: BTreeSet<IndividualId>,
    units: Vec<AffinityPair>,
    penalties: BTreeMap<Phase, u32>,
    notes: Vec<Note>,
}

impl Scenario {
    /// Empty scenario for `roster`.
    pub fn root(roster: &Roster) -> Self {
        Self {
            id: "S".to_string(),
            placements: vec![None; roster.len()],
            metrics: Metrics::new(roster.group_count()),
            capacity: roster.capacity(),
            locked_through: None,
            broken: BTreeSet::new(),
            units: Vec::new(),
            penalties: BTreeMap::new(),
            notes: Vec::new(),
        }
    }

    /// Child scenario carrying everything from `self`, tagged with `ordinal`.
    pub fn derive(&self, ordinal: usize) -> Self {
        let mut child = self.clone();
        child.id = format!("{}.{}", self.id, ordinal);
        child
    }

    /// Child that passes the parent through unchanged, annotated with why.
    pub fn carry_forward(&self, phase: Phase, kind: NoteKind, message: impl Into<String>) -> Self {
        let mut child = self.derive(0);
        child.note(phase, kind, message);
        child
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn group_count(&self) -> usize {
        self.metrics.group_count()
    }

    pub fn placement(&self, id: IndividualId) -> Option<Placement> {
        self.placements[id]
    }

    pub fn group_of(&self, id: IndividualId) -> Option<usize> {
        self.placements[id].map(|p| p.group)
    }

    pub fn is_placed(&self, id: IndividualId) -> bool {
        self.placements[id].is_some()
    }

    pub fn placed_by(&self, id: IndividualId) -> Option<Phase> {
        self.placements[id].map(|p| p.phase)
    }

    pub fn unplaced(&self) -> impl Iterator<Item = IndividualId> + '_ {
        self.placements
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(id, _)| id)
    }

    pub fn placed_count(&self) -> usize {
        self.placements.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.placements.iter().all(Option::is_some)
    }

    /// Members of `group` in id order.
    pub fn members(&self, group: usize) -> Vec<IndividualId> {
        self.placements
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some_and(|p| p.group == group))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn has_room(&self, group: usize, extra: usize) -> bool {
        self.metrics.size(group) as usize + extra <= self.capacity
    }

    /// Place a still-unplaced individual.
    pub fn place(&mut self, ind: &Individual, group: usize, phase: Phase) -> CoreResult<()> {
        if group >= self.group_count() {
            return Err(CoreError::UnknownGroup(group));
        }
        if self.placements[ind.id].is_some() {
            return Err(CoreError::AlreadyPlaced(ind.id));
        }
        if !self.has_room(group, 1) {
            return Err(CoreError::GroupFull { group });
        }
        self.placements[ind.id] = Some(Placement {
            group,
            phase,
            moved_by: None,
        });
        self.metrics.apply(ind, group);
        Ok(())
    }

    /// Move an already-placed individual. Fails when the placing phase is
    /// locked. Capacity is the caller's responsibility because swaps pass
    /// through transient over-full states.
    pub fn relocate(&mut self, ind: &Individual, group: usize, phase: Phase) -> CoreResult<()> {
        if group >= self.group_count() {
            return Err(CoreError::UnknownGroup(group));
        }
        let Some(current) = self.placements[ind.id] else {
            return Err(CoreError::NotPlaced(ind.id));
        };
        if let Some(locked) = self.locked_through {
            if current.phase <= locked {
                return Err(CoreError::Locked {
                    individual: ind.id,
                    phase: current.phase,
                });
            }
        }
        self.metrics.transfer(ind, current.group, group);
        self.placements[ind.id] = Some(Placement {
            group,
            moved_by: Some(phase),
            ..current
        });
        Ok(())
    }

    /// Freeze every placement made up to and including `phase`.
    pub fn lock(&mut self, phase: Phase) {
        self.locked_through = Some(self.locked_through.map_or(phase, |p| p.max(phase)));
    }

    pub fn locked_through(&self) -> Option<Phase> {
        self.locked_through
    }

    pub fn is_locked(&self, id: IndividualId) -> bool {
        match (self.placements[id], self.locked_through) {
            (Some(p), Some(locked)) => p.phase <= locked,
            _ => false,
        }
    }

    pub fn mark_broken(&mut self, id: IndividualId) {
        self.broken.insert(id);
    }

    pub fn is_broken(&self, id: IndividualId) -> bool {
        self.broken.contains(&id)
    }

    pub fn broken(&self) -> &BTreeSet<IndividualId> {
        &self.broken
    }

    /// Record a pair placed as an indivisible unit.
    pub fn record_unit(&mut self, pair: AffinityPair) {
        self.units.push(pair);
    }

    pub fn units(&self) -> &[AffinityPair] {
        &self.units
    }

    pub fn set_penalty(&mut self, phase: Phase, value: u32) {
        self.penalties.insert(phase, value);
    }

    pub fn penalty(&self, phase: Phase) -> Option<u32> {
        self.penalties.get(&phase).copied()
    }

    pub fn note(&mut self, phase: Phase, kind: NoteKind, message: impl Into<String>) {
        self.notes.push(Note {
            phase,
            kind,
            message: message.into(),
        });
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Group label per individual, `None` when unplaced.
    pub fn labels(&self) -> Vec<Option<String>> {
        self.placements
            .iter()
            .map(|p| p.map(|p| group_label(p.group)))
            .collect()
    }
}

/// Ordered list of up to `limit` scenarios surviving a phase.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ScenarioPool {
    scenarios: Vec<Scenario>,
}

impl ScenarioPool {
    /// Keep the first `limit` scenarios of an already-ranked list.
    pub fn ranked(mut scenarios: Vec<Scenario>, limit: usize) -> Self {
        scenarios.truncate(limit.max(1));
        Self { scenarios }
    }

    pub fn single(scenario: Scenario) -> Self {
        Self {
            scenarios: vec![scenario],
        }
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scenario> {
        self.scenarios.iter()
    }

    pub fn first(&self) -> Option<&Scenario> {
        self.scenarios.first()
    }

    pub fn into_vec(self) -> Vec<Scenario> {
        self.scenarios
    }
}

impl IntoIterator for ScenarioPool {
    type Item = Scenario;
    type IntoIter = std::vec::IntoIter<Scenario>;

    fn into_iter(self) -> Self::IntoIter {
        self.scenarios.into_iter()
    }
}

impl<'a> IntoIterator for &'a ScenarioPool {
    type Item = &'a Scenario;
    type IntoIter = std::slice::Iter<'a, Scenario>;

    fn into_iter(self) -> Self::IntoIter {
        self.scenarios.iter()
    }
}
