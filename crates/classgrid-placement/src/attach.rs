//! Phase 3: attach unplaced individuals to an already-placed partner.

use classgrid_core::{
    Dimension, IndividualId, Metrics, NoteKind, Phase, PhaseContext, Scenario, ScenarioPool,
};
use tracing::{debug, info, warn};

/// Join each unplaced individual to the group of a placed affinity partner.
///
/// Individuals with fewer placed partners go first. An individual whose
/// partners' groups are all full is marked broken and left for phase 5.
pub fn attach_partners(ctx: &PhaseContext<'_>, parent: &Scenario) -> Scenario {
    let mut candidates: Vec<(usize, usize, IndividualId)> = Vec::new();
    for u in parent.unplaced() {
        let placed: Vec<usize> = ctx
            .relations
            .partners(u)
            .iter()
            .filter_map(|&v| parent.group_of(v))
            .collect();
        for &group in &placed {
            candidates.push((placed.len(), group, u));
        }
    }

    if candidates.is_empty() {
        debug!(scenario = parent.id(), "no partner to attach");
        let mut child =
            parent.carry_forward(Phase::Attach, NoteKind::CarryForward, "no placed partners");
        child.set_penalty(Phase::Attach, attach_penalty(child.metrics()));
        child.lock(Phase::Attach);
        return child;
    }
    candidates.sort_by_key(|&(degree, group, _)| (degree, group));

    let mut child = parent.derive(0);
    let mut attached = 0;
    for &(_, group, u) in &candidates {
        if child.is_placed(u) || !child.has_room(group, 1) {
            continue;
        }
        match child.place(ctx.individual(u), group, Phase::Attach) {
            Ok(()) => {
                attached += 1;
                debug!(scenario = child.id(), individual = u, group, "attached to partner");
            }
            Err(err) => {
                warn!(scenario = child.id(), individual = u, error = %err, "attach rejected")
            }
        }
    }

    let mut broken = 0;
    for &(_, _, u) in &candidates {
        if !child.is_placed(u) && !child.is_broken(u) {
            child.mark_broken(u);
            broken += 1;
        }
    }

    child.set_penalty(Phase::Attach, attach_penalty(child.metrics()));
    child.lock(Phase::Attach);
    debug!(scenario = child.id(), attached, broken, "attach complete");
    child
}

/// `Σ max(0, spread - 2)` over boys, girls and population.
pub fn attach_penalty(metrics: &Metrics) -> u32 {
    [Dimension::Boys, Dimension::Girls, Dimension::Population]
        .into_iter()
        .map(|dim| metrics.spread(dim).saturating_sub(2))
        .sum()
}

/// Affinity pairs not yet together: a member unplaced or groups differ.
pub fn open_pairs(ctx: &PhaseContext<'_>, scenario: &Scenario) -> u32 {
    ctx.relations
        .affinity_pairs()
        .iter()
        .filter(|p| match (scenario.group_of(p.a), scenario.group_of(p.b)) {
            (Some(x), Some(y)) => x != y,
            _ => true,
        })
        .count() as u32
}

/// Rank attached scenarios from every quota sibling.
///
/// When any scenario leaves no pair open, only those survive, ordered by
/// penalty. Otherwise all are ordered by open pairs, then penalty.
pub fn select_attached(ctx: &PhaseContext<'_>, scenarios: Vec<Scenario>) -> ScenarioPool {
    let mut keyed: Vec<(u32, u32, Scenario)> = scenarios
        .into_iter()
        .map(|s| {
            let open = open_pairs(ctx, &s);
            let penalty = s.penalty(Phase::Attach).unwrap_or(0);
            (open, penalty, s)
        })
        .collect();

    if keyed.iter().any(|(open, _, _)| *open == 0) {
        keyed.retain(|(open, _, _)| *open == 0);
        keyed.sort_by_key(|(_, penalty, _)| *penalty);
    } else {
        keyed.sort_by_key(|(open, penalty, _)| (*open, *penalty));
    }

    if let Some((open, penalty, best)) = keyed.first() {
        info!(scenario = best.id(), open, penalty, candidates = keyed.len(), "attach selection");
    }
    ScenarioPool::ranked(keyed.into_iter().map(|(_, _, s)| s).collect(), ctx.max_scenarios())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{mutual, person, roster, roster_with_capacity};
    use classgrid_core::{EngineConfig, Gender, Relations};

    #[test]
    fn unplaced_partner_joins_placed_partner() {
        let mut records: Vec<_> = (0..6).map(|i| person(&format!("P{i}"), Gender::Boy)).collect();
        mutual(&mut records, 0, 1);
        let roster = roster(records, Some(2));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let mut parent = Scenario::root(&roster);
        parent.place(roster.get(0), 1, Phase::Founders).unwrap();

        let child = attach_partners(&ctx, &parent);
        assert_eq!(child.group_of(1), Some(1));
        assert_eq!(child.placed_by(1), Some(Phase::Attach));
        assert!(!parent.is_placed(1), "parent untouched");
        assert!(child.broken().is_empty());
    }

    #[test]
    fn full_partner_group_marks_broken_without_error() {
        let mut records: Vec<_> = (0..4).map(|i| person(&format!("P{i}"), Gender::Girl)).collect();
        mutual(&mut records, 0, 1);
        let roster = roster_with_capacity(records, 2, 2);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let mut parent = Scenario::root(&roster);
        parent.place(roster.get(0), 0, Phase::Founders).unwrap();
        parent.place(roster.get(2), 0, Phase::Quota).unwrap();

        let child = attach_partners(&ctx, &parent);
        assert!(!child.is_placed(1));
        assert!(child.is_broken(1), "capacity-blocked partner is recorded as broken");
        assert!(child.metrics().fits(2));
    }

    #[test]
    fn fewer_placed_partners_attach_first() {
        // P2 is partnered with P0 (group 0) and P1 (group 1); P3 only with P0.
        let mut records: Vec<_> = (0..6).map(|i| person(&format!("P{i}"), Gender::Boy)).collect();
        mutual(&mut records, 2, 0);
        mutual(&mut records, 2, 1);
        mutual(&mut records, 3, 0);
        let roster = roster_with_capacity(records, 2, 3);
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let mut parent = Scenario::root(&roster);
        parent.place(roster.get(0), 0, Phase::Founders).unwrap();
        parent.place(roster.get(4), 0, Phase::Founders).unwrap();
        parent.place(roster.get(1), 1, Phase::Founders).unwrap();

        let child = attach_partners(&ctx, &parent);
        assert_eq!(child.group_of(3), Some(0), "single-partner individual takes the last seat");
        assert_eq!(child.group_of(2), Some(1));
    }

    #[test]
    fn selection_prefers_scenarios_without_open_pairs() {
        let mut records: Vec<_> = (0..4).map(|i| person(&format!("P{i}"), Gender::Boy)).collect();
        mutual(&mut records, 0, 1);
        let roster = roster(records, Some(2));
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let root = Scenario::root(&roster);
        let mut split = root.derive(1);
        split.place(roster.get(0), 0, Phase::Attach).unwrap();
        split.place(roster.get(1), 1, Phase::Attach).unwrap();
        let mut joined = root.derive(2);
        joined.place(roster.get(0), 0, Phase::Attach).unwrap();
        joined.place(roster.get(1), 0, Phase::Attach).unwrap();

        let pool = select_attached(&ctx, vec![split, joined]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.first().unwrap().id(), "S.2");
    }
}
