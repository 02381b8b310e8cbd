//! Score breakdown for a complete scenario.
//!
//! Everything is computed fresh from the roster, the relationship model and
//! the scenario's placements, so scoring the same scenario twice yields the
//! same breakdown regardless of what earlier phases recorded.

use classgrid_core::{
    Dimension, IndividualId, Performance, PhaseContext, Scenario, conflict_severity, group_label,
};
use serde::Serialize;
use tracing::debug;

/// Every sub-penalty and pairwise difference behind a scenario's total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub population_penalty: u32,
    pub boys_penalty: u32,
    pub girls_penalty: u32,
    /// `boys_penalty + girls_penalty`.
    pub gender_penalty: u32,
    pub language_penalty: u32,
    pub performance_penalty: u32,
    pub conflict_penalty: u32,
    pub broken_penalty: u32,
    pub broken_count: u32,

    pub diff_population: u32,
    pub diff_boys: u32,
    pub diff_girls: u32,
    pub diff_gender_total: u32,
    pub diff_language: u32,

    /// Spreads of performance tiers 1, 2 and 3.
    pub performance_spreads: [u32; 3],

    pub total: u32,

    pub groups: Vec<GroupReport>,
    pub unresolved_incompatibilities: Vec<IncompatibilityReport>,
    pub broken_pairs: Vec<BrokenPairReport>,
}

/// Tallies and anomalies for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub label: String,
    pub total: u32,
    pub boys: u32,
    pub girls: u32,
    pub good_language: u32,
    pub founders: u32,
    pub high_energy: u32,
    pub special_needs: u32,
    pub performance: [u32; 3],
    pub conflict_count: usize,
    /// Incompatible pairs seated here, as `"A / B"`.
    pub conflicts: Vec<String>,
    /// Broken affinity pairs with one member here, as `"A / B"`.
    pub broken: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompatibilityReport {
    pub group: String,
    pub first: String,
    pub second: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenPairReport {
    pub first: String,
    pub first_group: String,
    pub second: String,
    pub second_group: String,
}

/// Score one scenario.
pub fn score_scenario(ctx: &PhaseContext<'_>, scenario: &Scenario) -> ScoreBreakdown {
    let weights = &ctx.config.scoring;
    let metrics = scenario.metrics();

    let population_penalty = metrics.pairwise_penalty(Dimension::Population, weights.population);
    let boys_penalty = metrics.pairwise_penalty(Dimension::Boys, weights.boys);
    let girls_penalty = metrics.pairwise_penalty(Dimension::Girls, weights.girls);
    let gender_penalty = boys_penalty + girls_penalty;
    let language_penalty = metrics.pairwise_penalty(Dimension::Language, weights.language);

    let performance_spreads = [Performance::One, Performance::Two, Performance::Three]
        .map(|tier| metrics.spread(Dimension::Performance(tier)));
    let performance_penalty = weights.performance.charge(performance_spreads[0])
        + weights.performance.charge(performance_spreads[2]);

    let mut conflict_penalty = 0;
    for group in 0..scenario.group_count() {
        let members = scenario.members(group);
        for (i, &x) in members.iter().enumerate() {
            for &y in &members[i + 1..] {
                conflict_penalty += conflict_severity(ctx.individual(x), ctx.individual(y));
            }
        }
    }

    let broken = ctx.relations.broken_pairs(|id| scenario.group_of(id));
    let broken_count = broken.len() as u32;
    let broken_penalty = weights.broken_weight * broken_count;

    let diff_boys = metrics.pairwise_sum(Dimension::Boys);
    let diff_girls = metrics.pairwise_sum(Dimension::Girls);

    let total = population_penalty
        + gender_penalty
        + language_penalty
        + performance_penalty
        + conflict_penalty
        + broken_penalty;

    let name = |id: IndividualId| ctx.roster.name(id).to_string();
    let label_of = |id: IndividualId| scenario.group_of(id).map(group_label).unwrap_or_default();

    let unresolved_incompatibilities: Vec<IncompatibilityReport> = ctx
        .relations
        .incompatibility_pairs()
        .iter()
        .filter_map(|p| match (scenario.group_of(p.a), scenario.group_of(p.b)) {
            (Some(x), Some(y)) if x == y => Some(IncompatibilityReport {
                group: group_label(x),
                first: name(p.a),
                second: name(p.b),
            }),
            _ => None,
        })
        .collect();

    let broken_pairs: Vec<BrokenPairReport> = broken
        .iter()
        .map(|p| BrokenPairReport {
            first: name(p.a),
            first_group: label_of(p.a),
            second: name(p.b),
            second_group: label_of(p.b),
        })
        .collect();

    let groups = (0..scenario.group_count())
        .map(|g| {
            let tally = metrics.tally(g);
            let label = group_label(g);
            let conflicts: Vec<String> = unresolved_incompatibilities
                .iter()
                .filter(|r| r.group == label)
                .map(|r| format!("{} / {}", r.first, r.second))
                .collect();
            let broken: Vec<String> = broken_pairs
                .iter()
                .filter(|r| r.first_group == label || r.second_group == label)
                .map(|r| format!("{} / {}", r.first, r.second))
                .collect();
            GroupReport {
                label,
                total: tally.total,
                boys: tally.boys,
                girls: tally.girls,
                good_language: tally.good_language,
                founders: tally.founders,
                high_energy: tally.high_energy,
                special_needs: tally.special_needs,
                performance: tally.performance,
                conflict_count: conflicts.len(),
                conflicts,
                broken,
            }
        })
        .collect();

    debug!(
        scenario = scenario.id(),
        total,
        broken = broken_count,
        conflict_penalty,
        "scored scenario"
    );

    ScoreBreakdown {
        population_penalty,
        boys_penalty,
        girls_penalty,
        gender_penalty,
        language_penalty,
        performance_penalty,
        conflict_penalty,
        broken_penalty,
        broken_count,
        diff_population: metrics.pairwise_sum(Dimension::Population),
        diff_boys,
        diff_girls,
        diff_gender_total: diff_boys + diff_girls,
        diff_language: metrics.pairwise_sum(Dimension::Language),
        performance_spreads,
        total,
        groups,
        unresolved_incompatibilities,
        broken_pairs,
    }
}
