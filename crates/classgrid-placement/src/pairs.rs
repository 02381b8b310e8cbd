//! Phase 4: atomic placement of fully-unplaced affinity pairs.
//!
//! Pairs are placed rarest category first. Two group-choice strategies are
//! available:
//!
//! - **ideal** (default): each pair goes to the group whose running count
//!   for the pair's category is closest to the category's fair share,
//!   optionally preferring groups whose previous pair had another category.
//!   Only the best-tied groups are branched on.
//! - **backtracking**: every group with room is tried, ordered by the
//!   weighted variance of population, boys-minus-girls and language after
//!   the move.
//!
//! Both stop after `max_scenarios` complete placements. A placement is kept
//! only if the population, gender and language spread bounds hold.

use std::collections::{HashMap, HashSet};

use classgrid_core::{
    AffinityPair, BalanceWeights, CoreResult, Dimension, IndividualId, Metrics, NoteKind,
    PairConfig, Phase, PhaseContext, Scenario, ScenarioPool, UnitCategory,
};
use tracing::{debug, info, warn};

const BOUND_VIOLATION: f64 = 1000.0;

/// Place every fully-unplaced affinity pair of `parent` as a unit.
pub fn place_pairs(ctx: &PhaseContext<'_>, parent: &Scenario) -> ScenarioPool {
    let dyads = actionable_dyads(ctx, parent);
    if dyads.is_empty() || ctx.group_count() < 2 {
        debug!(scenario = parent.id(), "no pairs to place");
        return ScenarioPool::single(parent.carry_forward(
            Phase::Pairs,
            NoteKind::CarryForward,
            "no unplaced affinity pairs",
        ));
    }

    let dyads = by_scarcity(ctx, dyads);
    let mut search = PairSearch::new(ctx, parent, &dyads);
    search.descend();
    if search.nodes >= ctx.config.pairs.max_nodes {
        warn!(scenario = parent.id(), nodes = search.nodes, "pair search hit its node cap");
    }

    let mut solutions = search.solutions;
    if solutions.is_empty() {
        warn!(
            scenario = parent.id(),
            pairs = dyads.len(),
            "no pair placement satisfies the spread bounds"
        );
        return ScenarioPool::single(parent.carry_forward(
            Phase::Pairs,
            NoteKind::SearchExhausted,
            "no pair placement satisfies the spread bounds",
        ));
    }
    solutions.sort_by_key(|(_, metrics)| placement_key(metrics));

    let mut scenarios = Vec::with_capacity(solutions.len());
    for (ordinal, (assignment, metrics)) in solutions.iter().enumerate() {
        match materialize(ctx, parent, ordinal + 1, &dyads, assignment) {
            Ok(mut child) => {
                child.set_penalty(Phase::Pairs, placement_key(metrics).0);
                scenarios.push(child);
            }
            Err(err) => warn!(scenario = parent.id(), error = %err, "dropping pair placement"),
        }
    }
    if scenarios.is_empty() {
        return ScenarioPool::single(parent.carry_forward(
            Phase::Pairs,
            NoteKind::SearchExhausted,
            "pair placements were rejected on write",
        ));
    }

    info!(
        scenario = parent.id(),
        pairs = dyads.len(),
        kept = scenarios.len(),
        penalty = placement_key(&solutions[0].1).0,
        "pairs placed"
    );
    ScenarioPool::ranked(scenarios, ctx.max_scenarios())
}

/// Merge pair-phase pools from sibling lineages, best first.
pub fn rank_paired(ctx: &PhaseContext<'_>, scenarios: Vec<Scenario>) -> ScenarioPool {
    let mut scenarios = scenarios;
    scenarios.sort_by_key(|s| placement_key(s.metrics()));
    ScenarioPool::ranked(scenarios, ctx.max_scenarios())
}

/// `(penalty, population, boys, girls, language)` spreads, lower is better.
pub fn placement_key(metrics: &Metrics) -> (u32, u32, u32, u32, u32) {
    (
        metrics.balance_penalty(&BalanceWeights::placement()),
        metrics.spread(Dimension::Population),
        metrics.spread(Dimension::Boys),
        metrics.spread(Dimension::Girls),
        metrics.spread(Dimension::Language),
    )
}

/// Affinity pairs with both members unplaced and unbroken. Overlapping
/// pairs are matched greedily; the losers are left to the residual phase.
fn actionable_dyads(ctx: &PhaseContext<'_>, parent: &Scenario) -> Vec<AffinityPair> {
    let mut used: HashSet<IndividualId> = HashSet::new();
    let mut dyads = Vec::new();
    for pair in ctx.relations.affinity_pairs() {
        let free = |id| !parent.is_placed(id) && !parent.is_broken(id);
        if !free(pair.a) || !free(pair.b) {
            continue;
        }
        if used.contains(&pair.a) || used.contains(&pair.b) {
            debug!(a = pair.a, b = pair.b, "pair overlaps an earlier pair");
            continue;
        }
        used.insert(pair.a);
        used.insert(pair.b);
        dyads.push(*pair);
    }
    dyads
}

fn category(ctx: &PhaseContext<'_>, pair: &AffinityPair) -> UnitCategory {
    UnitCategory::of(pair.members().map(|id| ctx.individual(id)))
}

/// Rarest category first, pair order within a category.
fn by_scarcity(ctx: &PhaseContext<'_>, mut dyads: Vec<AffinityPair>) -> Vec<AffinityPair> {
    let mut counts: HashMap<UnitCategory, usize> = HashMap::new();
    for pair in &dyads {
        *counts.entry(category(ctx, pair)).or_default() += 1;
    }
    dyads.sort_by_key(|pair| counts.get(&category(ctx, pair)).copied().unwrap_or(0));
    dyads
}

fn materialize(
    ctx: &PhaseContext<'_>,
    parent: &Scenario,
    ordinal: usize,
    dyads: &[AffinityPair],
    assignment: &[usize],
) -> CoreResult<Scenario> {
    let mut child = parent.derive(ordinal);
    for (pair, &group) in dyads.iter().zip(assignment) {
        for id in pair.members() {
            child.place(ctx.individual(id), group, Phase::Pairs)?;
        }
        child.record_unit(*pair);
    }
    Ok(child)
}

// ── Search ─────────────────────────────────────────────────────────

type Solution = (Vec<usize>, Metrics);

struct PairSearch<'a> {
    ctx: &'a PhaseContext<'a>,
    config: &'a PairConfig,
    dyads: &'a [AffinityPair],
    categories: Vec<UnitCategory>,
    capacity: usize,
    /// Spreads at phase entry; a bound already exceeded may not grow.
    entry: [u32; 4],
    metrics: Metrics,
    current: Vec<usize>,
    /// Individuals placed by this phase, per category and group.
    category_counts: HashMap<UnitCategory, Vec<u32>>,
    ideals: HashMap<UnitCategory, f64>,
    last_category: Vec<Option<UnitCategory>>,
    nodes: usize,
    solutions: Vec<Solution>,
}

impl<'a> PairSearch<'a> {
    fn new(ctx: &'a PhaseContext<'a>, parent: &Scenario, dyads: &'a [AffinityPair]) -> Self {
        let k = ctx.group_count();
        let categories: Vec<UnitCategory> = dyads.iter().map(|p| category(ctx, p)).collect();

        let mut ideals: HashMap<UnitCategory, f64> = HashMap::new();
        for cat in &categories {
            *ideals.entry(*cat).or_default() += 2.0;
        }
        for ideal in ideals.values_mut() {
            *ideal = (*ideal / k as f64).round_ties_even();
        }
        let category_counts = ideals.keys().map(|cat| (*cat, vec![0; k])).collect();

        let metrics = parent.metrics().clone();
        Self {
            ctx,
            config: &ctx.config.pairs,
            dyads,
            categories,
            capacity: parent.capacity(),
            entry: spreads(&metrics),
            metrics,
            current: Vec::with_capacity(dyads.len()),
            category_counts,
            ideals,
            last_category: vec![None; k],
            nodes: 0,
            solutions: Vec::new(),
        }
    }

    fn done(&self) -> bool {
        self.solutions.len() >= self.ctx.max_scenarios() || self.nodes >= self.config.max_nodes
    }

    fn within_bounds(&self) -> bool {
        let limits = [
            self.config.max_population_spread,
            self.config.max_gender_spread,
            self.config.max_gender_spread,
            self.config.max_language_spread,
        ];
        spreads(&self.metrics)
            .iter()
            .zip(limits.iter().zip(&self.entry))
            .all(|(&s, (&limit, &entry))| s <= limit.max(entry))
    }

    fn apply(&mut self, index: usize, group: usize) {
        for id in self.dyads[index].members() {
            self.metrics.apply(self.ctx.individual(id), group);
        }
    }

    fn revert(&mut self, index: usize, group: usize) {
        for id in self.dyads[index].members() {
            self.metrics.revert(self.ctx.individual(id), group);
        }
    }

    fn descend(&mut self) {
        if self.done() {
            return;
        }
        self.nodes += 1;
        let index = self.current.len();
        if index == self.dyads.len() {
            if self.within_bounds() {
                self.solutions.push((self.current.clone(), self.metrics.clone()));
            }
            return;
        }

        let groups = if self.config.ideal_strategy {
            self.ideal_groups(index)
        } else {
            self.variance_groups(index)
        };

        let cat = self.categories[index];
        for group in groups {
            if self.done() {
                break;
            }
            self.apply(index, group);
            self.current.push(group);
            if let Some(counts) = self.category_counts.get_mut(&cat) {
                counts[group] += 2;
            }
            let previous = self.last_category[group].replace(cat);

            self.descend();

            self.last_category[group] = previous;
            if let Some(counts) = self.category_counts.get_mut(&cat) {
                counts[group] -= 2;
            }
            self.current.pop();
            self.revert(index, group);
        }
    }

    fn has_room(&self, group: usize) -> bool {
        self.metrics.size(group) as usize + 2 <= self.capacity
    }

    /// Best-tied groups by distance to the category's fair share.
    fn ideal_groups(&mut self, index: usize) -> Vec<usize> {
        let cat = self.categories[index];
        let ideal = self.ideals.get(&cat).copied().unwrap_or(0.0);
        let mut scored: Vec<(f64, usize)> = Vec::new();
        for group in 0..self.ctx.group_count() {
            if !self.has_room(group) {
                continue;
            }
            self.apply(index, group);
            let ok = self.within_bounds();
            self.revert(index, group);
            if !ok {
                continue;
            }
            let count = self.category_counts.get(&cat).map_or(0, |c| c[group]);
            let mut gap = (f64::from(count) + 2.0 - ideal).abs();
            if self.config.alternate_categories
                && self.last_category[group].is_some_and(|last| last != cat)
            {
                gap -= 0.5;
            }
            scored.push((gap, group));
        }

        let Some(best) = scored.iter().map(|(gap, _)| *gap).reduce(f64::min) else {
            return Vec::new();
        };
        let width = 2.max(self.ctx.max_scenarios().saturating_sub(self.solutions.len()));
        scored
            .into_iter()
            .filter(|(gap, _)| *gap == best)
            .map(|(_, group)| group)
            .take(width)
            .collect()
    }

    /// Every group with room, lowest weighted variance first.
    fn variance_groups(&mut self, index: usize) -> Vec<usize> {
        let mut scored: Vec<(f64, usize)> = Vec::new();
        for group in 0..self.ctx.group_count() {
            if !self.has_room(group) {
                continue;
            }
            self.apply(index, group);
            let mut score = self.weighted_variance();
            if !self.within_bounds() {
                score += BOUND_VIOLATION;
            }
            self.revert(index, group);
            scored.push((score, group));
        }
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, group)| group).collect()
    }

    fn weighted_variance(&self) -> f64 {
        let tallies = self.metrics.tallies();
        let totals = Metrics::variance(tallies.iter().map(|t| f64::from(t.total)));
        let gender = Metrics::variance(
            tallies
                .iter()
                .map(|t| f64::from(t.boys) - f64::from(t.girls)),
        );
        let language = Metrics::variance(tallies.iter().map(|t| f64::from(t.good_language)));
        self.config.population_weight * totals
            + self.config.gender_weight * gender
            + self.config.language_weight * language
    }
}

fn spreads(metrics: &Metrics) -> [u32; 4] {
    [
        metrics.spread(Dimension::Population),
        metrics.spread(Dimension::Boys),
        metrics.spread(Dimension::Girls),
        metrics.spread(Dimension::Language),
    ]
}
