//! Phase 5: greedy placement of everyone still unplaced.

use classgrid_core::{BalanceWeights, Dimension, Individual, Metrics, Phase, PhaseContext, Scenario};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

/// Place every remaining individual, completing the scenario.
///
/// Individuals without an affinity partner, or marked broken, go first in
/// roster order. Any other leftover joins a placed partner when that group
/// has room and otherwise follows the same rule: smallest group with room,
/// then post-placement population spread within the preferred bound, then
/// smallest combined gender spread, then a seeded random choice.
pub fn place_residual<R: Rng + ?Sized>(
    ctx: &PhaseContext<'_>,
    parent: &Scenario,
    rng: &mut R,
) -> Scenario {
    let mut child = parent.derive(0);

    let (residual, leftover): (Vec<usize>, Vec<usize>) = parent
        .unplaced()
        .partition(|&id| !ctx.relations.has_partner(id) || parent.is_broken(id));

    for id in residual {
        let ind = ctx.individual(id);
        if let Some(group) = choose_group(ctx, child.metrics(), child.capacity(), ind, rng) {
            commit(&mut child, ind, group);
        }
    }

    for id in leftover {
        let ind = ctx.individual(id);
        let with_partner = ctx
            .relations
            .partners(id)
            .iter()
            .filter_map(|&p| child.group_of(p))
            .find(|&g| child.has_room(g, 1));
        let group = match with_partner {
            Some(g) => Some(g),
            None => choose_group(ctx, child.metrics(), child.capacity(), ind, rng),
        };
        if let Some(group) = group {
            commit(&mut child, ind, group);
        }
    }

    if !child.is_complete() {
        warn!(
            scenario = child.id(),
            unplaced = child.unplaced().count(),
            "residual placement left individuals unplaced"
        );
    }

    let broken = ctx.relations.broken_pairs(|id| child.group_of(id)).len() as u32;
    let penalty = child.metrics().balance_penalty(&BalanceWeights::placement())
        + ctx.config.residual.broken_weight * broken;
    child.set_penalty(Phase::Residual, penalty);
    debug!(scenario = child.id(), penalty, broken, "residual placement complete");
    child
}

fn commit(child: &mut Scenario, ind: &Individual, group: usize) {
    match child.place(ind, group, Phase::Residual) {
        Ok(()) => debug!(scenario = child.id(), individual = %ind.name, group, "placed residual"),
        Err(err) => warn!(
            scenario = child.id(),
            individual = %ind.name,
            error = %err,
            "residual placement rejected"
        ),
    }
}

fn choose_group<R: Rng + ?Sized>(
    ctx: &PhaseContext<'_>,
    metrics: &Metrics,
    capacity: usize,
    ind: &Individual,
    rng: &mut R,
) -> Option<usize> {
    let open: Vec<usize> = (0..metrics.group_count())
        .filter(|&g| (metrics.size(g) as usize) < capacity)
        .collect();
    let smallest = open.iter().map(|&g| metrics.size(g)).min()?;
    let mut ties: Vec<usize> = open
        .into_iter()
        .filter(|&g| metrics.size(g) == smallest)
        .collect();

    let after = |g: usize| {
        let mut m = metrics.clone();
        m.apply(ind, g);
        m
    };

    let preferred = ctx.config.residual.preferred_population_spread;
    let within: Vec<usize> = ties
        .iter()
        .copied()
        .filter(|&g| after(g).spread(Dimension::Population) <= preferred)
        .collect();
    if !within.is_empty() {
        ties = within;
    }

    let gender_spread = |g: usize| {
        let m = after(g);
        m.spread(Dimension::Boys) + m.spread(Dimension::Girls)
    };
    let best = ties.iter().map(|&g| gender_spread(g)).min()?;
    ties.retain(|&g| gender_spread(g) == best);

    if ties.len() == 1 {
        return ties.first().copied();
    }
    ties.choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{mutual, person, roster};
    use classgrid_core::{EngineConfig, Gender, Relations};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn everyone_is_placed_and_groups_stay_even() {
        let records: Vec<_> = (0..12)
            .map(|i| person(&format!("P{i}"), if i % 3 == 0 { Gender::Girl } else { Gender::Boy }))
            .collect();
        let roster = roster(records, Some(3));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let s = place_residual(&ctx, &Scenario::root(&roster), &mut rng);
        assert!(s.is_complete());
        assert_eq!(s.metrics().spread(Dimension::Population), 0);
        assert!(s.penalty(Phase::Residual).is_some());
    }

    #[test]
    fn leftover_joins_placed_partner() {
        let mut records: Vec<_> = (0..6).map(|i| person(&format!("P{i}"), Gender::Boy)).collect();
        mutual(&mut records, 0, 1);
        let roster = roster(records, Some(2));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let mut parent = Scenario::root(&roster);
        parent.place(roster.get(0), 1, Phase::Founders).unwrap();

        let s = place_residual(&ctx, &parent, &mut rng);
        assert_eq!(s.group_of(1), Some(1));
        assert!(s.is_complete());
    }

    #[test]
    fn same_seed_gives_same_placement() {
        let records: Vec<_> = (0..9).map(|i| person(&format!("P{i}"), Gender::Girl)).collect();
        let roster = roster(records, Some(3));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let run = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            place_residual(&ctx, &Scenario::root(&roster), &mut rng).labels()
        };
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn broken_pairs_are_charged() {
        let mut records: Vec<_> = (0..4).map(|i| person(&format!("P{i}"), Gender::Boy)).collect();
        mutual(&mut records, 0, 1);
        let roster = roster(records, Some(2));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let mut parent = Scenario::root(&roster);
        parent.place(roster.get(0), 0, Phase::Founders).unwrap();
        parent.place(roster.get(2), 0, Phase::Founders).unwrap();
        parent.mark_broken(1);

        let s = place_residual(&ctx, &parent, &mut rng);
        // P1 is broken, so it follows the smallest-group rule into group 1.
        assert_eq!(s.group_of(1), Some(1));
        assert_eq!(s.penalty(Phase::Residual), Some(5));
    }
}
