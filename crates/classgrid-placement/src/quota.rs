//! Phase 2: quota seeding of high-energy and special-needs individuals.
//!
//! Every group must end with its fair share of each category, within one
//! unit. The search assigns candidates depth-first with explicit undo,
//! pruning on per-group category ceilings, on incompatibility with members
//! already in the group, on whether the remaining candidates can still
//! lift every group to its floor, and on whether each remaining candidate
//! still has a group that would take it. A node budget bounds the rest.

use std::cmp::Reverse;

use classgrid_core::{
    CoreResult, Individual, IndividualId, Metrics, NoteKind, Phase, PhaseContext, Scenario,
    ScenarioPool, conflict_severity,
};
use tracing::{debug, info, warn};

/// Fair-share bounds for one protected category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// `total / K`.
    pub floor: u32,
    /// `floor + 1` when the share does not divide evenly.
    pub ceiling: u32,
}

impl Quota {
    pub fn new(total: u32, groups: usize) -> Self {
        let k = groups.max(1) as u32;
        let floor = total / k;
        Self {
            floor,
            ceiling: floor + u32::from(total % k > 0),
        }
    }

    pub fn admits(&self, count: u32) -> bool {
        (self.floor..=self.ceiling).contains(&count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    HighEnergy,
    SpecialNeeds,
}

impl Category {
    const BOTH: [Category; 2] = [Category::HighEnergy, Category::SpecialNeeds];

    fn holds(self, ind: &Individual) -> bool {
        match self {
            Category::HighEnergy => ind.flags.high_energy,
            Category::SpecialNeeds => ind.flags.special_needs,
        }
    }

    fn count(self, metrics: &Metrics, group: usize) -> u32 {
        let tally = metrics.tally(group);
        match self {
            Category::HighEnergy => tally.high_energy,
            Category::SpecialNeeds => tally.special_needs,
        }
    }
}

/// Scores of one complete assignment.
#[derive(Debug, Clone)]
struct Leaf {
    assignment: Vec<usize>,
    conflict_pairs: u32,
    broken: u32,
    total: u32,
}

/// Seed quota candidates into `parent`.
pub fn seed_quota(ctx: &PhaseContext<'_>, parent: &Scenario) -> ScenarioPool {
    let mut candidates: Vec<&Individual> = parent
        .unplaced()
        .map(|id| ctx.individual(id))
        .filter(|ind| ind.flags.high_energy || ind.flags.special_needs)
        .collect();

    if candidates.is_empty() {
        debug!(scenario = parent.id(), "no quota candidates");
        let mut child =
            parent.carry_forward(Phase::Quota, NoteKind::CarryForward, "no quota candidates");
        child.lock(Phase::Quota);
        return ScenarioPool::single(child);
    }

    candidates.sort_by_key(|ind| {
        let rank = match (ind.flags.special_needs, ind.flags.high_energy) {
            (true, true) => 0,
            (true, false) => 1,
            _ => 2,
        };
        (rank, Reverse(ind.conflicts.len() + ind.friends.len()))
    });

    let mut search = QuotaSearch::new(ctx, parent, &candidates);
    search.descend();
    if search.leaves_seen >= ctx.config.quota.max_leaves {
        warn!(
            scenario = parent.id(),
            leaves = search.leaves_seen,
            "quota search hit its leaf cap"
        );
    }
    if search.nodes >= ctx.config.quota.max_nodes {
        warn!(scenario = parent.id(), nodes = search.nodes, "quota search hit its node cap");
    }

    let selected = select(search.leaves, ctx.max_scenarios());
    if selected.is_empty() {
        warn!(
            scenario = parent.id(),
            candidates = candidates.len(),
            "no feasible quota assignment"
        );
        let mut child = parent.carry_forward(
            Phase::Quota,
            NoteKind::SearchExhausted,
            "no assignment satisfies the category quotas",
        );
        child.lock(Phase::Quota);
        return ScenarioPool::single(child);
    }

    let mut scenarios = Vec::with_capacity(selected.len());
    for (ordinal, leaf) in selected.iter().enumerate() {
        match materialize(ctx, parent, ordinal + 1, &candidates, &leaf.assignment) {
            Ok(mut child) => {
                child.set_penalty(Phase::Quota, leaf.total);
                child.lock(Phase::Quota);
                scenarios.push(child);
            }
            Err(err) => warn!(scenario = parent.id(), error = %err, "dropping quota assignment"),
        }
    }
    if scenarios.is_empty() {
        let mut child = parent.carry_forward(
            Phase::Quota,
            NoteKind::SearchExhausted,
            "quota assignments were rejected on write",
        );
        child.lock(Phase::Quota);
        return ScenarioPool::single(child);
    }

    info!(
        scenario = parent.id(),
        candidates = candidates.len(),
        kept = scenarios.len(),
        conflict_pairs = selected[0].conflict_pairs,
        broken = selected[0].broken,
        "quota seeded"
    );
    ScenarioPool::ranked(scenarios, ctx.max_scenarios())
}

/// Keep the leaves tied at the optimum, in discovery order.
fn select(leaves: Vec<Leaf>, limit: usize) -> Vec<Leaf> {
    let Some(min_total) = leaves.iter().map(|l| l.total).min() else {
        return Vec::new();
    };
    let mut tier: Vec<Leaf> = if leaves.iter().any(|l| l.conflict_pairs == 0) {
        let clean: Vec<Leaf> = leaves.into_iter().filter(|l| l.conflict_pairs == 0).collect();
        let min_broken = clean.iter().map(|l| l.broken).min().unwrap_or(0);
        let clean: Vec<Leaf> = clean.into_iter().filter(|l| l.broken == min_broken).collect();
        let min_total = clean.iter().map(|l| l.total).min().unwrap_or(0);
        clean.into_iter().filter(|l| l.total == min_total).collect()
    } else {
        // Maximum preserved pairs is minimum broken over a fixed scope.
        let tied: Vec<Leaf> = leaves.into_iter().filter(|l| l.total == min_total).collect();
        let min_broken = tied.iter().map(|l| l.broken).min().unwrap_or(0);
        tied.into_iter().filter(|l| l.broken == min_broken).collect()
    };
    tier.truncate(limit);
    tier
}

fn materialize(
    ctx: &PhaseContext<'_>,
    parent: &Scenario,
    ordinal: usize,
    candidates: &[&Individual],
    assignment: &[usize],
) -> CoreResult<Scenario> {
    let mut child = parent.derive(ordinal);
    for (ind, &group) in candidates.iter().zip(assignment) {
        child.place(ctx.individual(ind.id), group, Phase::Quota)?;
    }
    Ok(child)
}

// ── Search ─────────────────────────────────────────────────────────

struct QuotaSearch<'a> {
    ctx: &'a PhaseContext<'a>,
    candidates: &'a [&'a Individual],
    capacity: usize,
    quotas: [Quota; 2],
    /// Candidates of each category at index `i..`.
    suffix: Vec<[u32; 2]>,
    metrics: Metrics,
    members: Vec<Vec<IndividualId>>,
    /// Founders already placed plus every candidate.
    scope: Vec<bool>,
    current: Vec<usize>,
    nodes: usize,
    leaves_seen: usize,
    leaves: Vec<Leaf>,
}

impl<'a> QuotaSearch<'a> {
    fn new(ctx: &'a PhaseContext<'a>, parent: &Scenario, candidates: &'a [&'a Individual]) -> Self {
        let k = ctx.group_count();
        let metrics = parent.metrics().clone();

        let quotas = Category::BOTH.map(|cat| {
            let placed: u32 = (0..k).map(|g| cat.count(&metrics, g)).sum();
            let pending = candidates.iter().filter(|ind| cat.holds(ind)).count() as u32;
            Quota::new(placed + pending, k)
        });

        let mut suffix = vec![[0u32; 2]; candidates.len() + 1];
        for i in (0..candidates.len()).rev() {
            suffix[i] = suffix[i + 1];
            for (c, cat) in Category::BOTH.iter().enumerate() {
                suffix[i][c] += u32::from(cat.holds(candidates[i]));
            }
        }

        let members = (0..k).map(|g| parent.members(g)).collect();
        let mut scope = vec![false; ctx.roster.len()];
        for ind in ctx.roster.individuals() {
            scope[ind.id] = parent.placed_by(ind.id) == Some(Phase::Founders);
        }
        for ind in candidates {
            scope[ind.id] = true;
        }

        Self {
            ctx,
            candidates,
            capacity: parent.capacity(),
            quotas,
            suffix,
            metrics,
            members,
            scope,
            current: Vec::with_capacity(candidates.len()),
            nodes: 0,
            leaves_seen: 0,
            leaves: Vec::new(),
        }
    }

    fn done(&self) -> bool {
        let limits = &self.ctx.config.quota;
        self.leaves_seen >= limits.max_leaves || self.nodes >= limits.max_nodes
    }

    fn descend(&mut self) {
        if self.done() {
            return;
        }
        self.nodes += 1;
        let depth = self.current.len();
        if depth == self.candidates.len() {
            self.leaves_seen += 1;
            self.score_leaf();
            return;
        }

        let ind = self.candidates[depth];
        for group in 0..self.ctx.group_count() {
            if !self.admits(ind, group) {
                continue;
            }
            self.metrics.apply(ind, group);
            self.members[group].push(ind.id);
            self.current.push(group);

            if self.floors_reachable(depth + 1) && self.all_placeable(depth + 1) {
                self.descend();
            }

            self.current.pop();
            self.members[group].pop();
            self.metrics.revert(ind, group);
            if self.done() {
                return;
            }
        }
    }

    fn admits(&self, ind: &Individual, group: usize) -> bool {
        if self.metrics.size(group) as usize >= self.capacity {
            return false;
        }
        for (c, cat) in Category::BOTH.iter().enumerate() {
            if cat.holds(ind) && cat.count(&self.metrics, group) + 1 > self.quotas[c].ceiling {
                return false;
            }
        }
        !self.members[group]
            .iter()
            .any(|&m| self.ctx.relations.are_incompatible(ind.id, m))
    }

    /// Whether candidates from `next` on can still lift every group to its floor.
    fn floors_reachable(&self, next: usize) -> bool {
        Category::BOTH.iter().enumerate().all(|(c, cat)| {
            let needed: u32 = (0..self.ctx.group_count())
                .map(|g| self.quotas[c].floor.saturating_sub(cat.count(&self.metrics, g)))
                .sum();
            needed <= self.suffix[next][c]
        })
    }

    /// Whether every candidate from `next` on still fits some group.
    fn all_placeable(&self, next: usize) -> bool {
        self.candidates[next..]
            .iter()
            .all(|ind| (0..self.ctx.group_count()).any(|g| self.admits(ind, g)))
    }

    fn score_leaf(&mut self) {
        if self.current.len() > 1 && self.ctx.group_count() > 1 {
            let first = self.current[0];
            if self.current.iter().all(|&g| g == first) {
                return;
            }
        }
        for (c, cat) in Category::BOTH.iter().enumerate() {
            let admitted = (0..self.ctx.group_count())
                .all(|g| self.quotas[c].admits(cat.count(&self.metrics, g)));
            if !admitted {
                return;
            }
        }

        let mut conflict_pairs = 0;
        let mut conflict_sum = 0;
        for members in &self.members {
            for (i, &x) in members.iter().enumerate() {
                for &y in &members[i + 1..] {
                    let severity =
                        conflict_severity(self.ctx.individual(x), self.ctx.individual(y));
                    if severity > 0 {
                        conflict_pairs += 1;
                        conflict_sum += severity;
                    }
                }
            }
        }

        let group_of = |id: IndividualId| {
            self.members.iter().position(|m| m.contains(&id))
        };
        let broken = self
            .ctx
            .relations
            .pairs_within(|id| self.scope[id])
            .filter(|p| group_of(p.a) != group_of(p.b))
            .count() as u32;

        self.leaves.push(Leaf {
            assignment: self.current.clone(),
            conflict_pairs,
            broken,
            total: conflict_sum + 5 * broken,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{mutual, person, roster};
    use classgrid_core::{EngineConfig, Gender, Relations};

    #[test]
    fn quota_bounds_round_up_the_remainder() {
        assert_eq!(Quota::new(7, 3), Quota { floor: 2, ceiling: 3 });
        assert_eq!(Quota::new(6, 3), Quota { floor: 2, ceiling: 2 });
        assert!(Quota::new(1, 2).admits(0));
        assert!(!Quota::new(4, 2).admits(1));
    }

    #[test]
    fn no_candidates_carries_forward_and_locks() {
        let roster = roster((0..6).map(|i| person(&format!("P{i}"), Gender::Boy)).collect(), None);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let pool = seed_quota(&ctx, &Scenario::root(&roster));
        let s = pool.first().unwrap();
        assert_eq!(s.notes()[0].kind, NoteKind::CarryForward);
        assert_eq!(s.locked_through(), Some(Phase::Quota));
    }

    #[test]
    fn high_energy_spread_evenly_and_incompatible_kept_apart() {
        let mut records: Vec<_> = (0..10).map(|i| person(&format!("P{i}"), Gender::Girl)).collect();
        for r in records.iter_mut().take(4) {
            r.flags.high_energy = true;
        }
        records[0].conflicts = vec!["P1".into()];
        let roster = roster(records, Some(2));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let pool = seed_quota(&ctx, &Scenario::root(&roster));
        assert!(!pool.is_empty());
        for s in &pool {
            assert_eq!(s.metrics().tally(0).high_energy, 2);
            assert_eq!(s.metrics().tally(1).high_energy, 2);
            assert_ne!(s.group_of(0), s.group_of(1), "incompatible pair separated");
            assert!(s.is_locked(0));
            for id in 4..10 {
                assert!(!s.is_placed(id), "only quota candidates are placed");
            }
        }
    }

    #[test]
    fn prefers_conflict_free_then_fewest_broken() {
        let mut records: Vec<_> = (0..8).map(|i| person(&format!("P{i}"), Gender::Boy)).collect();
        for r in records.iter_mut().take(4) {
            r.flags.special_needs = true;
        }
        mutual(&mut records, 0, 1);
        let roster = roster(records, Some(2));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let pool = seed_quota(&ctx, &Scenario::root(&roster));
        // Two special-needs per group always yields same-group severity-5
        // pairs, so selection falls back to the lowest total.
        for s in &pool {
            assert_eq!(s.group_of(0), s.group_of(1), "affinity pair kept together");
            assert_eq!(s.penalty(Phase::Quota), Some(10));
        }
    }

    #[test]
    fn infeasible_quota_is_search_exhausted() {
        let mut records: Vec<_> = (0..6).map(|i| person(&format!("P{i}"), Gender::Boy)).collect();
        for r in records.iter_mut().take(3) {
            r.flags.high_energy = true;
        }
        records[0].conflicts = vec!["P1".into(), "P2".into()];
        records[1].conflicts = vec!["P2".into()];
        let roster = roster(records, Some(2));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let pool = seed_quota(&ctx, &Scenario::root(&roster));
        assert_eq!(pool.len(), 1);
        let s = pool.first().unwrap();
        assert_eq!(s.placed_count(), 0);
        assert_eq!(s.notes()[0].kind, NoteKind::SearchExhausted);
    }

    fn shunned_last_candidate() -> Vec<classgrid_core::RosterRecord> {
        // P20 is named as a conflict by every other high-energy student, so
        // it sorts last and no group can take it once the others spread out.
        let mut records: Vec<_> = (0..30).map(|i| person(&format!("P{i}"), Gender::Boy)).collect();
        for r in records.iter_mut().take(21) {
            r.flags.high_energy = true;
        }
        for r in records.iter_mut().take(20) {
            r.conflicts = vec!["P20".into()];
        }
        records
    }

    #[test]
    fn unplaceable_late_candidate_ends_the_search() {
        let roster = roster(shunned_last_candidate(), Some(3));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let pool = seed_quota(&ctx, &Scenario::root(&roster));
        assert_eq!(pool.len(), 1);
        let s = pool.first().unwrap();
        assert_eq!(s.placed_count(), 0);
        assert_eq!(s.notes()[0].kind, NoteKind::SearchExhausted);
        assert_eq!(s.locked_through(), Some(Phase::Quota));
    }

    #[test]
    fn node_budget_bounds_the_search() {
        let roster = roster(shunned_last_candidate(), Some(3));
        let relations = Relations::build(&roster);
        let mut config = EngineConfig::default();
        config.quota.max_nodes = 50;
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let candidates: Vec<&Individual> = roster.individuals().iter().take(21).collect();
        let mut search = QuotaSearch::new(&ctx, &Scenario::root(&roster), &candidates);
        search.descend();
        assert_eq!(search.nodes, 50);
        assert!(search.leaves.is_empty());
    }
}
