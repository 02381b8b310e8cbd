//! Phase 6: balance repair of gender and language spreads.
//!
//! Each iteration picks an objective from the current spreads, enumerates
//! unit swaps between the most and least loaded groups for that objective,
//! ranks the admissible ones and commits the first that strictly lowers the
//! repair penalty. Only phase-4 pair units and phase-5 singles move.

use std::cmp::Reverse;

use classgrid_core::{
    BalanceConfig, Dimension, Gender, IndividualId, Metrics, NoteKind, Phase, PhaseContext,
    Scenario,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::units::{Move, ProtectedBaseline, Swap, SwapGuard};

/// What an iteration is trying to fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Gender,
    Language,
    /// Everything is within target; any strict improvement is taken.
    Balance,
}

/// Spreads tracked by the balance phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Spreads {
    pub population: u32,
    pub boys: u32,
    pub girls: u32,
    pub language: u32,
}

impl Spreads {
    pub fn of(metrics: &Metrics) -> Self {
        Self {
            population: metrics.spread(Dimension::Population),
            boys: metrics.spread(Dimension::Boys),
            girls: metrics.spread(Dimension::Girls),
            language: metrics.spread(Dimension::Language),
        }
    }

    pub fn gender(&self) -> u32 {
        self.boys.max(self.girls)
    }

    pub fn within(&self, targets: &BalanceConfig) -> bool {
        self.population <= targets.target_population
            && self.gender() <= targets.target_gender
            && self.language <= targets.target_language
    }
}

/// A committed balance swap.
#[derive(Debug, Clone, Serialize)]
pub struct SwapRecord {
    pub objective: Objective,
    pub swap: Swap,
    pub penalty_before: u32,
    pub penalty_after: u32,
}

#[derive(Debug, Clone)]
pub struct BalanceOutcome {
    pub scenario: Scenario,
    pub swaps: Vec<SwapRecord>,
    pub iterations: usize,
    pub spreads: Spreads,
    pub targets_met: bool,
}

/// Spread penalty over population, boys, girls and language, weighted by
/// the configured scoring rules.
pub fn repair_penalty(ctx: &PhaseContext<'_>, metrics: &Metrics) -> u32 {
    metrics.balance_penalty(&ctx.config.scoring.balance_weights())
}

/// Run balance repair on a complete scenario.
pub fn repair_balance(
    ctx: &PhaseContext<'_>,
    parent: &Scenario,
    baseline: &ProtectedBaseline,
) -> BalanceOutcome {
    let targets = &ctx.config.balance;
    let guard = SwapGuard::new(ctx, baseline);
    let mut scenario = parent.derive(0);
    let mut swaps = Vec::new();
    let mut iterations = 0;

    while iterations < targets.max_iterations {
        iterations += 1;
        let spreads = Spreads::of(scenario.metrics());
        let plan: &[Objective] = if spreads.within(targets) {
            &[Objective::Balance]
        } else if spreads.gender() > targets.target_gender
            && spreads.language > targets.target_language
        {
            &[Objective::Gender, Objective::Language]
        } else if spreads.gender() > targets.target_gender {
            &[Objective::Gender]
        } else {
            &[Objective::Language]
        };

        let committed = plan
            .iter()
            .find_map(|&objective| commit_best(ctx, &guard, &mut scenario, objective));
        match committed {
            Some(record) => {
                debug!(
                    scenario = scenario.id(),
                    iteration = iterations,
                    objective = ?record.objective,
                    before = record.penalty_before,
                    after = record.penalty_after,
                    "balance swap committed"
                );
                swaps.push(record);
            }
            None => break,
        }
    }

    let spreads = Spreads::of(scenario.metrics());
    let targets_met = spreads.within(targets);
    if !targets_met {
        scenario.note(
            Phase::Balance,
            NoteKind::RepairIncomplete,
            format!(
                "spreads after {iterations} iterations: population {}, gender {}, language {}",
                spreads.population,
                spreads.gender(),
                spreads.language
            ),
        );
    }
    scenario.set_penalty(Phase::Balance, repair_penalty(ctx, scenario.metrics()));
    info!(
        scenario = scenario.id(),
        swaps = swaps.len(),
        iterations,
        targets_met,
        "balance repair complete"
    );

    BalanceOutcome {
        scenario,
        swaps,
        iterations,
        spreads,
        targets_met,
    }
}

// ── Units ────────────────────────────────────────────────────────────

/// Movable units per group.
struct UnitIndex {
    singles: Vec<Vec<IndividualId>>,
    pairs: Vec<Vec<[IndividualId; 2]>>,
}

impl UnitIndex {
    /// Phase-5 individuals outside any pair unit are singles. Pair units are
    /// listed under every group they touch.
    fn build(ctx: &PhaseContext<'_>, scenario: &Scenario) -> Self {
        let k = scenario.group_count();
        let mut singles = vec![Vec::new(); k];
        let mut pairs = vec![Vec::new(); k];

        let in_unit = |id: IndividualId| scenario.units().iter().any(|u| u.contains(id));
        for ind in ctx.roster.individuals() {
            if scenario.placed_by(ind.id) != Some(Phase::Residual) || in_unit(ind.id) {
                continue;
            }
            if let Some(g) = scenario.group_of(ind.id) {
                singles[g].push(ind.id);
            }
        }

        for unit in scenario.units() {
            let members = unit.members();
            let mut touched: Vec<usize> =
                members.iter().filter_map(|&m| scenario.group_of(m)).collect();
            touched.dedup();
            for g in touched {
                pairs[g].push(members);
            }
        }
        Self { singles, pairs }
    }

    fn singles_where(
        &self,
        group: usize,
        keep: impl Fn(IndividualId) -> bool,
    ) -> Vec<IndividualId> {
        self.singles[group].iter().copied().filter(|&i| keep(i)).collect()
    }

    /// Pair units in `group` whose members all pass `keep`.
    fn pairs_where(
        &self,
        group: usize,
        keep: impl Fn(IndividualId) -> bool,
    ) -> Vec<&[IndividualId; 2]> {
        self.pairs[group].iter().filter(|p| p.iter().all(|&m| keep(m))).collect()
    }
}

/// `outgoing` moves to `low`, `incoming` moves to `high`.
fn exchange(
    scenario: &Scenario,
    outgoing: &[IndividualId],
    high: usize,
    incoming: &[IndividualId],
    low: usize,
) -> Swap {
    let relocate = |ids: &[IndividualId], to: usize| -> Vec<Move> {
        ids.iter()
            .filter_map(|&individual| {
                scenario
                    .group_of(individual)
                    .map(|from| Move { individual, from, to })
            })
            .collect()
    };
    let mut moves = relocate(outgoing, low);
    moves.extend(relocate(incoming, high));
    Swap { moves }
}

fn two_of(ids: &[IndividualId]) -> impl Iterator<Item = [IndividualId; 2]> + '_ {
    ids.iter()
        .enumerate()
        .flat_map(move |(i, &a)| ids[i + 1..].iter().map(move |&b| [a, b]))
}

/// Top and bottom groups by `dim`.
fn extremes(metrics: &Metrics, dim: Dimension, n: usize) -> (Vec<usize>, Vec<usize>) {
    let order = metrics.ranked_desc(dim);
    let high = order.iter().take(n).copied().collect();
    let low = order.iter().rev().take(n).copied().collect();
    (high, low)
}

// ── Candidates ───────────────────────────────────────────────────────

fn language_candidates(
    ctx: &PhaseContext<'_>,
    scenario: &Scenario,
    units: &UnitIndex,
) -> Vec<Swap> {
    let good = |id: IndividualId| ctx.individual(id).good_language;
    let (highs, lows) = extremes(
        scenario.metrics(),
        Dimension::Language,
        ctx.config.balance.extreme_groups,
    );
    let mut out = Vec::new();

    for &high in &highs {
        for &low in &lows {
            if high == low {
                continue;
            }
            let high_good = units.singles_where(high, good);
            let low_not = units.singles_where(low, |i| !good(i));
            let low_good = units.singles_where(low, good);
            let high_both_good = units.pairs_where(high, good);
            let high_both_not = units.pairs_where(high, |i| !good(i));
            let low_both_not = units.pairs_where(low, |i| !good(i));

            for &i in &high_good {
                for &j in &low_not {
                    out.push(exchange(scenario, &[i], high, &[j], low));
                }
            }
            for p in &high_both_good {
                for q in &low_both_not {
                    out.push(exchange(scenario, &p[..], high, &q[..], low));
                }
            }
            for p in &high_both_good {
                for two in two_of(&low_not) {
                    out.push(exchange(scenario, &p[..], high, &two, low));
                }
            }
            for p in &high_both_not {
                for two in two_of(&low_good) {
                    out.push(exchange(scenario, &p[..], high, &two, low));
                }
            }
        }
    }
    out
}

fn gender_candidates(ctx: &PhaseContext<'_>, scenario: &Scenario, units: &UnitIndex) -> Vec<Swap> {
    let metrics = scenario.metrics();
    let (target, dim) = if metrics.spread(Dimension::Boys) >= metrics.spread(Dimension::Girls) {
        (Gender::Boy, Dimension::Boys)
    } else {
        (Gender::Girl, Dimension::Girls)
    };
    let opposite = target.opposite();
    let gender = |id: IndividualId| ctx.individual(id).gender;
    let (highs, lows) = extremes(metrics, dim, ctx.config.balance.extreme_groups);
    let mut out = Vec::new();

    for &high in &highs {
        for &low in &lows {
            if high == low {
                continue;
            }
            let high_target = units.singles_where(high, |i| gender(i) == target);
            let low_opposite = units.singles_where(low, |i| gender(i) == opposite);

            for &i in &high_target {
                let language = ctx.individual(i).good_language;
                let (same, other): (Vec<_>, Vec<_>) = low_opposite
                    .iter()
                    .partition(|&&j| ctx.individual(j).good_language == language);
                for &j in same.into_iter().chain(other) {
                    out.push(exchange(scenario, &[i], high, &[j], low));
                }
            }

            let high_pairs = units.pairs_where(high, |i| gender(i) == target);
            let low_pairs = units.pairs_where(low, |i| gender(i) == opposite);
            for p in &high_pairs {
                for q in &low_pairs {
                    out.push(exchange(scenario, &p[..], high, &q[..], low));
                }
            }
            for p in &high_pairs {
                for two in two_of(&low_opposite) {
                    out.push(exchange(scenario, &p[..], high, &two, low));
                }
            }
        }
    }
    out
}

// ── Ranking ──────────────────────────────────────────────────────────

struct Ranked {
    key: (Reverse<i64>, Reverse<i64>, Reverse<i64>, usize),
    swap: Swap,
    penalty: u32,
}

fn commit_best(
    ctx: &PhaseContext<'_>,
    guard: &SwapGuard<'_>,
    scenario: &mut Scenario,
    objective: Objective,
) -> Option<SwapRecord> {
    let units = UnitIndex::build(ctx, scenario);
    let candidates = match objective {
        Objective::Language => language_candidates(ctx, scenario, &units),
        Objective::Gender => gender_candidates(ctx, scenario, &units),
        Objective::Balance => {
            let mut all = language_candidates(ctx, scenario, &units);
            all.extend(gender_candidates(ctx, scenario, &units));
            all
        }
    };

    let targets = &ctx.config.balance;
    let base = Spreads::of(scenario.metrics());
    let base_penalty = repair_penalty(ctx, scenario.metrics());
    let mut ranked: Vec<Ranked> = Vec::new();

    for swap in candidates {
        let Ok(after) = guard.evaluate(scenario, &swap) else {
            continue;
        };
        let spreads = Spreads::of(&after);
        if spreads.population > targets.target_population.max(base.population) {
            continue;
        }
        if base.population <= targets.target_population && spreads.population > base.population {
            continue;
        }

        let gender_gain = i64::from(base.gender()) - i64::from(spreads.gender());
        let language_gain = i64::from(base.language) - i64::from(spreads.language);
        let penalty = repair_penalty(ctx, &after);
        let penalty_gain = i64::from(base_penalty) - i64::from(penalty);

        let regresses = match objective {
            Objective::Gender => language_gain < 0,
            Objective::Language => gender_gain < 0,
            Objective::Balance => language_gain < 0 || gender_gain < 0,
        };
        if regresses {
            continue;
        }

        let (primary, secondary) = match objective {
            Objective::Language => (language_gain, gender_gain),
            Objective::Gender | Objective::Balance => (gender_gain, language_gain),
        };
        ranked.push(Ranked {
            key: (Reverse(primary), Reverse(secondary), Reverse(penalty_gain), swap.size()),
            swap,
            penalty,
        });
    }
    ranked.sort_by(|a, b| a.key.cmp(&b.key));

    for candidate in ranked {
        if candidate.penalty >= base_penalty {
            continue;
        }
        match candidate.swap.commit(ctx, scenario, Phase::Balance) {
            Ok(()) => {
                return Some(SwapRecord {
                    objective,
                    swap: candidate.swap,
                    penalty_before: base_penalty,
                    penalty_after: candidate.penalty,
                });
            }
            Err(err) => {
                warn!(scenario = scenario.id(), error = %err, "balance swap failed to commit")
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{mutual, person, roster};
    use classgrid_core::{AffinityPair, EngineConfig, PenaltyRule, Relations, RosterRecord};

    fn place_all(s: &mut Scenario, roster: &classgrid_core::Roster, layout: &[(usize, Phase)]) {
        for (id, &(group, phase)) in layout.iter().enumerate() {
            s.place(roster.get(id), group, phase).unwrap();
        }
    }

    fn split_by_gender(boy_phase: Phase) -> (Vec<RosterRecord>, Vec<(usize, Phase)>) {
        let mut records = Vec::new();
        let mut layout = Vec::new();
        for i in 0..6 {
            records.push(person(&format!("B{i}"), Gender::Boy, true));
            layout.push((0, boy_phase));
        }
        for i in 0..6 {
            records.push(person(&format!("G{i}"), Gender::Girl, true));
            layout.push((1, Phase::Residual));
        }
        (records, layout)
    }

    #[test]
    fn single_swaps_even_out_gender() {
        let (records, layout) = split_by_gender(Phase::Residual);
        let roster = roster(records, 2);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let mut s = Scenario::root(&roster);
        place_all(&mut s, &roster, &layout);
        s.lock(Phase::Attach);
        let baseline = ProtectedBaseline::capture(&s);

        let outcome = repair_balance(&ctx, &s, &baseline);
        assert!(outcome.targets_met);
        assert_eq!(outcome.spreads.boys, 0);
        assert_eq!(outcome.swaps.len(), 3);
        assert_eq!(outcome.swaps[0].objective, Objective::Gender);
        assert_eq!(outcome.swaps[2].objective, Objective::Balance);
        assert!(outcome.swaps.iter().all(|r| r.penalty_after < r.penalty_before));
        assert_eq!(outcome.scenario.penalty(Phase::Balance), Some(0));
        assert!(outcome.scenario.metrics().fits(25));
        assert_eq!(s.metrics().spread(Dimension::Boys), 6, "parent untouched");
    }

    #[test]
    fn penalty_follows_configured_weights() {
        let (records, layout) = split_by_gender(Phase::Residual);
        let roster = roster(records, 2);
        let relations = Relations::build(&roster);
        let mut s = Scenario::root(&roster);
        place_all(&mut s, &roster, &layout);

        let defaults = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &defaults);
        // boys and girls spreads of 6 at (free 1, weight 2)
        assert_eq!(repair_penalty(&ctx, s.metrics()), 10 + 10);

        let mut heavy = EngineConfig::default();
        heavy.scoring.boys = PenaltyRule::new(0, 10);
        let ctx = PhaseContext::new(&roster, &relations, &heavy);
        assert_eq!(repair_penalty(&ctx, s.metrics()), 60 + 10);
    }

    #[test]
    fn locked_placements_block_repair_and_note_it() {
        let (records, layout) = split_by_gender(Phase::Founders);
        let roster = roster(records, 2);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let mut s = Scenario::root(&roster);
        place_all(&mut s, &roster, &layout);
        s.lock(Phase::Attach);
        let baseline = ProtectedBaseline::capture(&s);

        let outcome = repair_balance(&ctx, &s, &baseline);
        assert!(outcome.swaps.is_empty());
        assert!(!outcome.targets_met);
        assert_eq!(outcome.iterations, 1);
        assert!(
            outcome
                .scenario
                .notes()
                .iter()
                .any(|n| n.kind == NoteKind::RepairIncomplete)
        );
    }

    #[test]
    fn protected_subtotals_survive_repair() {
        let (mut records, layout) = split_by_gender(Phase::Residual);
        for r in records.iter_mut().take(6) {
            r.flags.high_energy = true;
        }
        let roster = roster(records, 2);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let mut s = Scenario::root(&roster);
        place_all(&mut s, &roster, &layout);
        let baseline = ProtectedBaseline::capture(&s);

        let outcome = repair_balance(&ctx, &s, &baseline);
        assert!(outcome.swaps.is_empty());
        assert!(baseline.matches(outcome.scenario.metrics()));
    }

    #[test]
    fn pair_units_move_together() {
        // Group 0 holds eight good-language boys, group 1 eight without.
        // P0/P1 and P8/P9 are phase-4 pair units.
        let mut records: Vec<_> = (0..16)
            .map(|i| person(&format!("P{i}"), Gender::Boy, i < 8))
            .collect();
        mutual(&mut records, 0, 1);
        mutual(&mut records, 8, 9);
        let roster = roster(records, 2);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let mut s = Scenario::root(&roster);
        for id in 0..16 {
            let group = usize::from(id >= 8);
            let phase = if matches!(id, 0 | 1 | 8 | 9) { Phase::Pairs } else { Phase::Residual };
            s.place(roster.get(id), group, phase).unwrap();
        }
        s.record_unit(AffinityPair::new(0, 1));
        s.record_unit(AffinityPair::new(8, 9));
        s.lock(Phase::Attach);
        let baseline = ProtectedBaseline::capture(&s);

        let outcome = repair_balance(&ctx, &s, &baseline);
        let first = &outcome.swaps[0];
        assert_eq!(first.objective, Objective::Language);
        assert_eq!(first.swap.size(), 4);

        let out = &outcome.scenario;
        assert_eq!(out.group_of(0), out.group_of(1));
        assert_eq!(out.group_of(8), out.group_of(9));
        assert_eq!(out.group_of(0), Some(1));
        assert!(outcome.spreads.language <= 3);
        assert!(outcome.targets_met);
    }

    #[test]
    fn split_pair_state_is_preserved() {
        // P0 and P1 name each other but sit apart after phase 5.
        let mut records: Vec<_> = (0..8)
            .map(|i| person(&format!("P{i}"), if i < 4 { Gender::Boy } else { Gender::Girl }, true))
            .collect();
        mutual(&mut records, 0, 4);
        let roster = roster(records, 2);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let mut s = Scenario::root(&roster);
        for id in 0..8 {
            s.place(roster.get(id), usize::from(id >= 4), Phase::Residual).unwrap();
        }
        let baseline = ProtectedBaseline::capture(&s);

        let outcome = repair_balance(&ctx, &s, &baseline);
        let out = &outcome.scenario;
        assert!(!outcome.swaps.is_empty());
        assert_ne!(out.group_of(0), out.group_of(4), "no re-union");
        assert!(relations.broken_pairs(|id| out.group_of(id)).len() == 1);
    }
}
