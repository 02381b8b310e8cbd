//! The eight-phase pipeline.
//!
//! Phase 1 fans the empty root out into founder lineages. Every lineage
//! then runs phases 2 to 7 on its own: search phases widen the pool up to
//! `max_scenarios`, the remaining phases map one scenario to one scenario.
//! Phase 8 scores the final scenario of every lineage together and picks
//! one. A single seeded generator drives every random tie-break.

use classgrid_core::{
    CoreResult, EngineConfig, Phase, PhaseContext, Relations, Roster, RosterRecord, Scenario,
};
use classgrid_placement::{
    attach_partners, place_pairs, place_residual, rank_paired, seed_founders, seed_quota,
    select_attached,
};
use classgrid_repair::{
    ProtectedBaseline, Spreads, SwapRecord, TierReport, repair_balance, repair_performance,
};
use classgrid_scoring::{ScoredScenario, rank_scenarios, select_best};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info};

/// The pool one phase produced inside one lineage.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTrace {
    /// Id of the scenario the lineage started from.
    pub lineage: String,
    pub phase: Phase,
    pub scenarios: Vec<Scenario>,
}

impl PhaseTrace {
    fn new<'a>(
        lineage: &str,
        phase: Phase,
        scenarios: impl IntoIterator<Item = &'a Scenario>,
    ) -> Self {
        Self {
            lineage: lineage.to_string(),
            phase,
            scenarios: scenarios.into_iter().cloned().collect(),
        }
    }
}

/// What phases 6 and 7 did to one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct RepairRecord {
    pub lineage: String,
    /// Id of the scenario phase 7 returned.
    pub scenario: String,
    pub balance_swaps: Vec<SwapRecord>,
    pub balance_spreads: Spreads,
    pub balance_targets_met: bool,
    /// The tier whose result was kept.
    pub tier: TierReport,
    /// Every tier attempted, in order.
    pub tier_attempts: Vec<TierReport>,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub roster: Roster,
    pub traces: Vec<PhaseTrace>,
    /// One record per repaired scenario, in lineage order.
    pub repairs: Vec<RepairRecord>,
    /// Final scenarios of every lineage, best first.
    pub ranked: Vec<ScoredScenario>,
    /// Index into `ranked` of the chosen scenario.
    pub selected: Option<usize>,
}

impl PipelineOutcome {
    pub fn selected(&self) -> Option<&ScoredScenario> {
        self.selected.and_then(|i| self.ranked.get(i))
    }

    /// Repair record of the final scenario `id`.
    pub fn repair_of(&self, id: &str) -> Option<&RepairRecord> {
        self.repairs.iter().find(|r| r.scenario == id)
    }

    /// Pools recorded for `phase`, in lineage order.
    pub fn traces_for(&self, phase: Phase) -> impl Iterator<Item = &PhaseTrace> {
        self.traces.iter().filter(move |t| t.phase == phase)
    }
}

/// Runs the assignment pipeline with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: EngineConfig,
}

impl Pipeline {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate the configuration and roster, then run every phase.
    ///
    /// Only infeasible input is an error; every later condition degrades
    /// to a carried-forward or best-effort scenario.
    pub fn run(&self, records: Vec<RosterRecord>) -> CoreResult<PipelineOutcome> {
        self.config.validate()?;
        let roster = Roster::from_records(records, self.config.group_count, self.config.capacity)?;
        Ok(self.run_roster(roster))
    }

    /// Run every phase on an already validated roster.
    pub fn run_roster(&self, roster: Roster) -> PipelineOutcome {
        let relations = Relations::build(&roster);
        let ctx = PhaseContext::new(&roster, &relations, &self.config);
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut traces = Vec::new();
        let mut repairs = Vec::new();
        info!(
            %roster,
            affinity_pairs = relations.affinity_pairs().len(),
            incompatibility_pairs = relations.incompatibility_pairs().len(),
            seed = self.config.seed,
            "pipeline started"
        );

        // Phase 1: one lineage per founder arrangement.
        let root = Scenario::root(&roster);
        let founders = seed_founders(&ctx, &root);
        traces.push(PhaseTrace::new(root.id(), Phase::Founders, &founders));

        let mut finals = Vec::new();
        for lineage in &founders {
            finals.extend(run_lineage(&ctx, lineage, &mut rng, &mut traces, &mut repairs));
        }

        // Phase 8: score across lineages.
        let ranked = rank_scenarios(&ctx, finals);
        traces.push(PhaseTrace::new(
            root.id(),
            Phase::Selection,
            ranked.iter().map(|s| &s.scenario),
        ));
        let selected = select_best(&ranked, &mut rng);

        if let Some(best) = selected.and_then(|i| ranked.get(i)) {
            info!(
                scenario = best.scenario.id(),
                total = best.breakdown.total,
                broken = best.breakdown.broken_count,
                tier = selected_tier(&repairs, best.scenario.id()),
                "pipeline complete"
            );
        }

        PipelineOutcome {
            roster,
            traces,
            repairs,
            ranked,
            selected,
        }
    }
}

/// Phases 2 to 7 for the lineage rooted at `founders`.
fn run_lineage(
    ctx: &PhaseContext<'_>,
    founders: &Scenario,
    rng: &mut ChaCha8Rng,
    traces: &mut Vec<PhaseTrace>,
    repairs: &mut Vec<RepairRecord>,
) -> Vec<Scenario> {
    let lineage = founders.id();

    let quota = seed_quota(ctx, founders);
    traces.push(PhaseTrace::new(lineage, Phase::Quota, &quota));

    let attached = select_attached(ctx, quota.iter().map(|s| attach_partners(ctx, s)).collect());
    traces.push(PhaseTrace::new(lineage, Phase::Attach, &attached));

    let paired = rank_paired(ctx, attached.iter().flat_map(|s| place_pairs(ctx, s)).collect());
    traces.push(PhaseTrace::new(lineage, Phase::Pairs, &paired));

    let mut residual = Vec::with_capacity(paired.len());
    for scenario in &paired {
        residual.push(place_residual(ctx, scenario, rng));
    }
    traces.push(PhaseTrace::new(lineage, Phase::Residual, &residual));

    // Repair shares one protected baseline per scenario across phases 6 and 7.
    let mut balanced = Vec::with_capacity(residual.len());
    let mut finals = Vec::with_capacity(residual.len());
    for scenario in &residual {
        let baseline = ProtectedBaseline::capture(scenario);
        let balance = repair_balance(ctx, scenario, &baseline);
        let tiers = repair_performance(ctx, &balance.scenario, &baseline, rng);
        debug!(
            scenario = tiers.scenario.id(),
            balance_swaps = balance.swaps.len(),
            tier = %tiers.report.tier,
            "repair finished"
        );
        repairs.push(RepairRecord {
            lineage: lineage.to_string(),
            scenario: tiers.scenario.id().to_string(),
            balance_swaps: balance.swaps,
            balance_spreads: balance.spreads,
            balance_targets_met: balance.targets_met,
            tier: tiers.report,
            tier_attempts: tiers.attempts,
        });
        balanced.push(balance.scenario);
        finals.push(tiers.scenario);
    }
    traces.push(PhaseTrace::new(lineage, Phase::Balance, &balanced));
    traces.push(PhaseTrace::new(lineage, Phase::Performance, &finals));

    info!(lineage, candidates = finals.len(), "lineage complete");
    finals
}

fn selected_tier<'a>(repairs: &'a [RepairRecord], id: &str) -> &'a str {
    repairs
        .iter()
        .find(|r| r.scenario == id)
        .map_or("", |r| r.tier.tier.as_str())
}
