//! Phase 8 ranking and final selection.

use classgrid_core::{Phase, PhaseContext, Scenario};
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::scorer::{ScoreBreakdown, score_scenario};

/// A final scenario with its breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredScenario {
    pub scenario: Scenario,
    pub breakdown: ScoreBreakdown,
}

impl ScoredScenario {
    /// Total, broken count, then population, gender and language pairwise sums.
    pub fn key(&self) -> (u32, u32, u32, u32, u32) {
        let b = &self.breakdown;
        (
            b.total,
            b.broken_count,
            b.diff_population,
            b.diff_gender_total,
            b.diff_language,
        )
    }
}

/// Score every scenario and order them by [`ScoredScenario::key`].
/// The sort is stable, so exact ties keep their input order.
pub fn rank_scenarios(
    ctx: &PhaseContext<'_>,
    scenarios: impl IntoIterator<Item = Scenario>,
) -> Vec<ScoredScenario> {
    let mut ranked: Vec<ScoredScenario> = scenarios
        .into_iter()
        .map(|mut scenario| {
            let breakdown = score_scenario(ctx, &scenario);
            scenario.set_penalty(Phase::Selection, breakdown.total);
            ScoredScenario { scenario, breakdown }
        })
        .collect();
    ranked.sort_by_key(ScoredScenario::key);
    ranked
}

/// Index of the selected scenario in a ranked list.
///
/// An exact tie on the full key at the top is resolved by the seeded `rng`.
pub fn select_best<R: Rng + ?Sized>(ranked: &[ScoredScenario], rng: &mut R) -> Option<usize> {
    let best = ranked.first()?.key();
    let tied = ranked.iter().take_while(|s| s.key() == best).count();
    let index = if tied > 1 { rng.gen_range(0..tied) } else { 0 };
    info!(
        scenario = ranked[index].scenario.id(),
        total = best.0,
        candidates = ranked.len(),
        tied,
        "selected scenario"
    );
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{person, roster};
    use classgrid_core::{EngineConfig, Gender, Relations, Roster};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn mirrored(roster: &Roster) -> (Scenario, Scenario) {
        // Same layout with groups 0 and 1 swapped.
        let root = Scenario::root(roster);
        let mut left = root.derive(1);
        let mut right = root.derive(2);
        for id in 0..roster.len() {
            let g = usize::from(id >= 2);
            left.place(roster.get(id), g, Phase::Residual).unwrap();
            right.place(roster.get(id), 1 - g, Phase::Residual).unwrap();
        }
        (left, right)
    }

    #[test]
    fn lower_total_ranks_first() {
        let records: Vec<_> = (0..4).map(|i| person(&format!("P{i}"), Gender::Boy)).collect();
        let roster = roster(records, 2);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let root = Scenario::root(&roster);
        let mut even = root.derive(1);
        let mut lopsided = root.derive(2);
        for id in 0..4 {
            even.place(roster.get(id), id % 2, Phase::Residual).unwrap();
            lopsided.place(roster.get(id), usize::from(id == 3), Phase::Residual).unwrap();
        }

        let ranked = rank_scenarios(&ctx, vec![lopsided, even]);
        assert_eq!(ranked[0].scenario.id(), "S.1");
        assert!(ranked[0].key() < ranked[1].key());
        assert_eq!(ranked[0].scenario.penalty(Phase::Selection), Some(ranked[0].breakdown.total));

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(select_best(&ranked, &mut rng), Some(0));
    }

    #[test]
    fn symmetric_tie_is_resolved_by_seed() {
        let records: Vec<_> = (0..4).map(|i| person(&format!("P{i}"), Gender::Girl)).collect();
        let roster = roster(records, 2);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let pick = |seed| {
            let (left, right) = mirrored(&roster);
            let ranked = rank_scenarios(&ctx, vec![left, right]);
            assert_eq!(ranked[0].key(), ranked[1].key());
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let index = select_best(&ranked, &mut rng).unwrap();
            ranked[index].scenario.id().to_string()
        };
        assert_eq!(pick(99), pick(99));
    }

    #[test]
    fn empty_input_selects_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(select_best(&[], &mut rng), None);
    }
}
