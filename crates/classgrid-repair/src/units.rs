//! Swap units and the invariant guard shared by both repair phases.
//!
//! A [`Swap`] is a set of simultaneous moves. It is always simulated on a
//! copy of the scenario metrics first; only a swap that passes the
//! [`SwapGuard`] is written back, and the write is all-or-nothing.

use classgrid_core::{CoreResult, IndividualId, Metrics, Phase, PhaseContext, Scenario};
use serde::Serialize;

/// One individual moving to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Move {
    pub individual: IndividualId,
    pub from: usize,
    pub to: usize,
}

/// Simultaneous moves evaluated and committed as one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Swap {
    pub moves: Vec<Move>,
}

impl Swap {
    /// `outgoing` leaves `from` for `to` while `incoming` makes the reverse trip.
    pub fn between(
        outgoing: &[IndividualId],
        from: usize,
        incoming: &[IndividualId],
        to: usize,
    ) -> Self {
        let moves = outgoing
            .iter()
            .map(|&individual| Move { individual, from, to })
            .chain(incoming.iter().map(|&individual| Move {
                individual,
                from: to,
                to: from,
            }))
            .collect();
        Self { moves }
    }

    /// Each `(x, y)` trades places. `None` when someone is unplaced.
    pub fn trade(pairs: &[(IndividualId, IndividualId)], scenario: &Scenario) -> Option<Self> {
        let mut moves = Vec::with_capacity(pairs.len() * 2);
        for &(x, y) in pairs {
            let gx = scenario.group_of(x)?;
            let gy = scenario.group_of(y)?;
            moves.push(Move { individual: x, from: gx, to: gy });
            moves.push(Move { individual: y, from: gy, to: gx });
        }
        Some(Self { moves })
    }

    /// Number of individuals moved.
    pub fn size(&self) -> usize {
        self.moves.len()
    }

    pub fn movers(&self) -> impl Iterator<Item = IndividualId> + '_ {
        self.moves.iter().map(|m| m.individual)
    }

    fn destination(&self, id: IndividualId) -> Option<usize> {
        self.moves.iter().find(|m| m.individual == id).map(|m| m.to)
    }

    /// Metrics after the swap, leaving `scenario` untouched.
    pub fn simulate(&self, ctx: &PhaseContext<'_>, scenario: &Scenario) -> Metrics {
        let mut metrics = scenario.metrics().clone();
        for mv in &self.moves {
            metrics.transfer(ctx.individual(mv.individual), mv.from, mv.to);
        }
        metrics
    }

    /// Write the swap into `scenario`. Either every move lands or none does.
    pub fn commit(
        &self,
        ctx: &PhaseContext<'_>,
        scenario: &mut Scenario,
        phase: Phase,
    ) -> CoreResult<()> {
        let mut next = scenario.clone();
        for mv in &self.moves {
            next.relocate(ctx.individual(mv.individual), mv.to, phase)?;
        }
        *scenario = next;
        Ok(())
    }
}

/// Per-group founder, high-energy and special-needs subtotals, captured once
/// per lineage when repair starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedBaseline {
    profile: Vec<[u32; 3]>,
}

impl ProtectedBaseline {
    pub fn capture(scenario: &Scenario) -> Self {
        Self {
            profile: scenario.metrics().protected_profile(),
        }
    }

    pub fn profile(&self) -> &[[u32; 3]] {
        &self.profile
    }

    pub fn matches(&self, metrics: &Metrics) -> bool {
        metrics.protected_profile() == self.profile
    }
}

/// Why a candidate swap was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A mover is unplaced, not where the swap expects, or locked.
    Immovable,
    /// A group would exceed capacity.
    Capacity,
    /// A protected subtotal would differ from the baseline.
    Protected,
    /// An affinity pair would be split or re-united.
    Affinity,
}

/// Hard checks every committed repair swap must pass.
#[derive(Debug, Clone, Copy)]
pub struct SwapGuard<'a> {
    ctx: &'a PhaseContext<'a>,
    baseline: &'a ProtectedBaseline,
}

impl<'a> SwapGuard<'a> {
    pub fn new(ctx: &'a PhaseContext<'a>, baseline: &'a ProtectedBaseline) -> Self {
        Self { ctx, baseline }
    }

    /// Simulate `swap` and return the resulting metrics if it is admissible.
    pub fn evaluate(&self, scenario: &Scenario, swap: &Swap) -> Result<Metrics, Rejection> {
        for mv in &swap.moves {
            if scenario.group_of(mv.individual) != Some(mv.from)
                || scenario.is_locked(mv.individual)
            {
                return Err(Rejection::Immovable);
            }
        }

        let metrics = swap.simulate(self.ctx, scenario);
        if !metrics.fits(scenario.capacity()) {
            return Err(Rejection::Capacity);
        }
        if !self.baseline.matches(&metrics) {
            return Err(Rejection::Protected);
        }
        if !self.preserves_affinity(scenario, swap) {
            return Err(Rejection::Affinity);
        }
        Ok(metrics)
    }

    /// Every affinity pair touching a mover keeps its together/apart state.
    fn preserves_affinity(&self, scenario: &Scenario, swap: &Swap) -> bool {
        let after = |id: IndividualId| swap.destination(id).or_else(|| scenario.group_of(id));
        swap.movers().all(|m| {
            self.ctx.relations.partners(m).iter().all(|&p| {
                let before = scenario.group_of(m) == scenario.group_of(p);
                before == (after(m) == after(p))
            })
        })
    }
}
