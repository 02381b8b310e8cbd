//! Phase 1: founder seeding.
//!
//! Founders are spread so that per-group counts differ by at most one.
//! Small founder sets go one per group. Larger sets are enumerated
//! depth-first over every group assignment, with equivalent assignments
//! (same member sets up to group relabeling) collapsed by a canonical
//! signature. Survivors are ranked by how many founder pairs they split.

use std::collections::HashSet;

use classgrid_core::{
    CoreResult, IndividualId, NoteKind, Phase, PhaseContext, Scenario, ScenarioPool,
};
use tracing::{debug, info, warn};

/// Canonical form of a founder assignment: sorted member lists, sorted.
type Signature = Vec<Vec<IndividualId>>;

/// Seed founders into `parent`, producing up to `max_scenarios` locked roots.
pub fn seed_founders(ctx: &PhaseContext<'_>, parent: &Scenario) -> ScenarioPool {
    let founders: Vec<IndividualId> = ctx
        .roster
        .individuals()
        .iter()
        .filter(|ind| ind.flags.founder && !parent.is_placed(ind.id))
        .map(|ind| ind.id)
        .collect();

    if founders.is_empty() {
        debug!(scenario = parent.id(), "no founders to seed");
        let mut child =
            parent.carry_forward(Phase::Founders, NoteKind::CarryForward, "no founders");
        child.lock(Phase::Founders);
        return ScenarioPool::single(child);
    }

    let k = ctx.group_count();
    let assignments = if founders.len() <= k {
        vec![(0..founders.len()).collect::<Vec<_>>()]
    } else {
        enumerate(ctx, &founders)
    };

    let mut ranked: Vec<(Vec<usize>, u32)> = assignments
        .into_iter()
        .map(|assignment| {
            let broken = broken_founder_pairs(ctx, &founders, &assignment);
            (assignment, broken)
        })
        .collect();
    ranked.sort_by_key(|(_, broken)| *broken);
    ranked.truncate(ctx.max_scenarios());

    let mut scenarios = Vec::with_capacity(ranked.len());
    for (ordinal, (assignment, broken)) in ranked.iter().enumerate() {
        match materialize(ctx, parent, ordinal + 1, &founders, assignment) {
            Ok(mut child) => {
                child.set_penalty(Phase::Founders, *broken);
                child.lock(Phase::Founders);
                scenarios.push(child);
            }
            Err(err) => warn!(scenario = parent.id(), error = %err, "dropping founder assignment"),
        }
    }

    if scenarios.is_empty() {
        warn!(scenario = parent.id(), "founder search produced no assignment");
        let mut child = parent.carry_forward(
            Phase::Founders,
            NoteKind::SearchExhausted,
            "no balanced founder assignment",
        );
        child.lock(Phase::Founders);
        return ScenarioPool::single(child);
    }

    info!(
        scenario = parent.id(),
        founders = founders.len(),
        kept = scenarios.len(),
        best_broken = ranked.first().map(|(_, b)| *b).unwrap_or(0),
        "founders seeded"
    );
    ScenarioPool::ranked(scenarios, ctx.max_scenarios())
}

fn materialize(
    ctx: &PhaseContext<'_>,
    parent: &Scenario,
    ordinal: usize,
    founders: &[IndividualId],
    assignment: &[usize],
) -> CoreResult<Scenario> {
    let mut child = parent.derive(ordinal);
    for (&id, &group) in founders.iter().zip(assignment) {
        child.place(ctx.individual(id), group, Phase::Founders)?;
    }
    Ok(child)
}

/// Founder affinity pairs split across groups by `assignment`.
fn broken_founder_pairs(
    ctx: &PhaseContext<'_>,
    founders: &[IndividualId],
    assignment: &[usize],
) -> u32 {
    let group_of = |id: IndividualId| {
        founders
            .iter()
            .position(|&f| f == id)
            .map(|pos| assignment[pos])
    };
    ctx.relations
        .pairs_within(|id| founders.contains(&id))
        .filter(|pair| group_of(pair.a) != group_of(pair.b))
        .count() as u32
}

// ── Enumeration ────────────────────────────────────────────────────

struct FounderSearch<'a> {
    founders: &'a [IndividualId],
    group_count: usize,
    /// Per-group ceiling, `ceil(n / K)`.
    ceiling: usize,
    /// Per-group floor, `floor(n / K)`.
    floor: usize,
    max_visits: u64,
    visits: u64,
    counts: Vec<usize>,
    current: Vec<usize>,
    seen: HashSet<Signature>,
    found: Vec<Vec<usize>>,
}

fn enumerate(ctx: &PhaseContext<'_>, founders: &[IndividualId]) -> Vec<Vec<usize>> {
    let n = founders.len();
    let k = ctx.group_count();
    let mut search = FounderSearch {
        founders,
        group_count: k,
        ceiling: n.div_ceil(k),
        floor: n / k,
        max_visits: ctx.config.founders.max_assignments,
        visits: 0,
        counts: vec![0; k],
        current: Vec::with_capacity(n),
        seen: HashSet::new(),
        found: Vec::new(),
    };
    search.descend();

    if search.exhausted() {
        warn!(
            visited = search.visits,
            kept = search.found.len(),
            "founder enumeration hit its assignment cap"
        );
    } else {
        debug!(
            visited = search.visits,
            distinct = search.found.len(),
            "founder enumeration complete"
        );
    }
    search.found
}

impl FounderSearch<'_> {
    fn exhausted(&self) -> bool {
        self.visits >= self.max_visits
    }

    fn descend(&mut self) {
        if self.exhausted() {
            return;
        }
        let depth = self.current.len();
        if depth == self.founders.len() {
            self.visits += 1;
            self.accept_leaf();
            return;
        }

        let remaining = self.founders.len() - depth - 1;
        for group in 0..self.group_count {
            if self.counts[group] >= self.ceiling {
                continue;
            }
            self.counts[group] += 1;
            if self.deficit() <= remaining {
                self.current.push(group);
                self.descend();
                self.current.pop();
            }
            self.counts[group] -= 1;
            if self.exhausted() {
                return;
            }
        }
    }

    /// Seats still needed to lift every group to the floor.
    fn deficit(&self) -> usize {
        self.counts
            .iter()
            .map(|&c| self.floor.saturating_sub(c))
            .sum()
    }

    fn accept_leaf(&mut self) {
        if self.counts.iter().any(|&c| c == self.founders.len()) {
            return;
        }
        let signature = self.signature();
        if self.seen.insert(signature) {
            self.found.push(self.current.clone());
        }
    }

    fn signature(&self) -> Signature {
        let mut groups: Signature = vec![Vec::new(); self.group_count];
        for (&id, &group) in self.founders.iter().zip(&self.current) {
            groups[group].push(id);
        }
        for members in &mut groups {
            members.sort_unstable();
        }
        groups.sort();
        groups
    }
}
