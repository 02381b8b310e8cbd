//! Metrics engine.
//!
//! Per-group counters are maintained incrementally with [`Metrics::apply`]
//! and [`Metrics::revert`]. Spreads, pairwise-difference sums and weighted
//! balance penalties are derived from the counters on demand, so a phase
//! that explores a move pays for the move, not for a roster rescan.
//!
//! # Components
//!
//! - **`GroupTally`**: counters for one group
//! - **`Dimension`**: the counter a spread or sum is taken over
//! - **`PenaltyRule`** / **`BalanceWeights`**: free tolerance plus weight
//! - **`Metrics`**: fixed-size array of tallies indexed by group id

use serde::{Deserialize, Serialize};

use crate::roster::{Individual, Performance, Roster};

/// Counters for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupTally {
    pub total: u32,
    pub boys: u32,
    pub girls: u32,
    pub good_language: u32,
    pub founders: u32,
    pub high_energy: u32,
    pub special_needs: u32,
    /// Counts for performance tiers 1, 2 and 3.
    pub performance: [u32; 3],
}

impl GroupTally {
    pub fn apply(&mut self, ind: &Individual) {
        self.adjust(ind, true);
    }

    pub fn revert(&mut self, ind: &Individual) {
        self.adjust(ind, false);
    }

    fn adjust(&mut self, ind: &Individual, add: bool) {
        let step = |v: &mut u32, hit: bool| {
            if hit {
                *v = if add { *v + 1 } else { v.saturating_sub(1) };
            }
        };
        step(&mut self.total, true);
        step(&mut self.boys, ind.is_boy());
        step(&mut self.girls, ind.is_girl());
        step(&mut self.good_language, ind.good_language);
        step(&mut self.founders, ind.flags.founder);
        step(&mut self.high_energy, ind.flags.high_energy);
        step(&mut self.special_needs, ind.flags.special_needs);
        step(&mut self.performance[ind.performance.index()], true);
    }

    pub fn get(&self, dim: Dimension) -> u32 {
        match dim {
            Dimension::Population => self.total,
            Dimension::Boys => self.boys,
            Dimension::Girls => self.girls,
            Dimension::Language => self.good_language,
            Dimension::Founders => self.founders,
            Dimension::HighEnergy => self.high_energy,
            Dimension::SpecialNeeds => self.special_needs,
            Dimension::Performance(tier) => self.performance[tier.index()],
        }
    }

    /// Founder, high-energy and special-needs subtotals.
    pub fn protected(&self) -> [u32; 3] {
        [self.founders, self.high_energy, self.special_needs]
    }
}

/// A per-group counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Population,
    Boys,
    Girls,
    /// Individuals with good language proficiency.
    Language,
    Founders,
    HighEnergy,
    SpecialNeeds,
    Performance(Performance),
}

/// `weight * max(0, value - free)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyRule {
    pub free: u32,
    pub weight: u32,
}

impl PenaltyRule {
    pub const fn new(free: u32, weight: u32) -> Self {
        Self { free, weight }
    }

    pub fn charge(&self, value: u32) -> u32 {
        value.saturating_sub(self.free) * self.weight
    }
}

/// Penalty rules for the four balance dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceWeights {
    pub population: PenaltyRule,
    pub boys: PenaltyRule,
    pub girls: PenaltyRule,
    pub language: PenaltyRule,
}

impl BalanceWeights {
    /// Unit weights used while groups are still being filled.
    pub const fn placement() -> Self {
        Self {
            population: PenaltyRule::new(1, 1),
            boys: PenaltyRule::new(1, 1),
            girls: PenaltyRule::new(1, 1),
            language: PenaltyRule::new(2, 1),
        }
    }
}

/// Fixed-size tally array indexed by dense group id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Metrics {
    tallies: Vec<GroupTally>,
}

impl Metrics {
    pub fn new(group_count: usize) -> Self {
        Self {
            tallies: vec![GroupTally::default(); group_count],
        }
    }

    /// Build counters from an explicit group lookup.
    pub fn from_groups<F>(roster: &Roster, group_of: F) -> Self
    where
        F: Fn(usize) -> Option<usize>,
    {
        let mut metrics = Self::new(roster.group_count());
        for ind in roster.individuals() {
            if let Some(g) = group_of(ind.id) {
                metrics.apply(ind, g);
            }
        }
        metrics
    }

    pub fn group_count(&self) -> usize {
        self.tallies.len()
    }

    pub fn apply(&mut self, ind: &Individual, group: usize) {
        self.tallies[group].apply(ind);
    }

    pub fn revert(&mut self, ind: &Individual, group: usize) {
        self.tallies[group].revert(ind);
    }

    /// Move `ind` between groups.
    pub fn transfer(&mut self, ind: &Individual, from: usize, to: usize) {
        if from != to {
            self.revert(ind, from);
            self.apply(ind, to);
        }
    }

    pub fn tallies(&self) -> &[GroupTally] {
        &self.tallies
    }

    pub fn tally(&self, group: usize) -> &GroupTally {
        &self.tallies[group]
    }

    pub fn size(&self, group: usize) -> u32 {
        self.tallies[group].total
    }

    pub fn values(&self, dim: Dimension) -> impl Iterator<Item = u32> + '_ {
        self.tallies.iter().map(move |t| t.get(dim))
    }

    /// `max - min` across groups.
    pub fn spread(&self, dim: Dimension) -> u32 {
        let (lo, hi) = self
            .values(dim)
            .fold((u32::MAX, 0), |(lo, hi), v| (lo.min(v), hi.max(v)));
        hi.saturating_sub(lo)
    }

    /// Sum of `|a - b|` over all unordered group pairs.
    pub fn pairwise_sum(&self, dim: Dimension) -> u32 {
        self.pairwise(dim, |d| d)
    }

    /// Sum of `rule.charge(|a - b|)` over all unordered group pairs.
    pub fn pairwise_penalty(&self, dim: Dimension, rule: PenaltyRule) -> u32 {
        self.pairwise(dim, |d| rule.charge(d))
    }

    fn pairwise(&self, dim: Dimension, f: impl Fn(u32) -> u32) -> u32 {
        let vals: Vec<u32> = self.values(dim).collect();
        let mut sum = 0;
        for i in 0..vals.len() {
            for j in i + 1..vals.len() {
                sum += f(vals[i].abs_diff(vals[j]));
            }
        }
        sum
    }

    /// Weighted spread penalty over population, boys, girls and language.
    pub fn balance_penalty(&self, weights: &BalanceWeights) -> u32 {
        weights.population.charge(self.spread(Dimension::Population))
            + weights.boys.charge(self.spread(Dimension::Boys))
            + weights.girls.charge(self.spread(Dimension::Girls))
            + weights.language.charge(self.spread(Dimension::Language))
    }

    /// Groups ordered by descending value of `dim`; ties keep group order.
    pub fn ranked_desc(&self, dim: Dimension) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.tallies.len()).collect();
        order.sort_by(|&x, &y| self.tallies[y].get(dim).cmp(&self.tallies[x].get(dim)));
        order
    }

    /// Groups at the smallest population.
    pub fn smallest_groups(&self) -> Vec<usize> {
        let min = self.values(Dimension::Population).min().unwrap_or(0);
        (0..self.tallies.len())
            .filter(|&g| self.tallies[g].total == min)
            .collect()
    }

    /// Protected subtotals per group.
    pub fn protected_profile(&self) -> Vec<[u32; 3]> {
        self.tallies.iter().map(GroupTally::protected).collect()
    }

    pub fn fits(&self, capacity: usize) -> bool {
        self.tallies.iter().all(|t| t.total as usize <= capacity)
    }

    /// Population variance of a per-group series.
    pub fn variance(values: impl IntoIterator<Item = f64>) -> f64 {
        let vals: Vec<f64> = values.into_iter().collect();
        if vals.len() < 2 {
            return 0.0;
        }
        let n = vals.len() as f64;
        let mean = vals.iter().sum::<f64>() / n;
        vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    }
}
