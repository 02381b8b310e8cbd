//! Relationship model.
//!
//! Affinity pairs require reciprocal nominations. Incompatibility pairs are
//! the union of one-directional conflict nominations and are only used for
//! scoring. Both sets are derived once per roster.

use serde::Serialize;

use crate::roster::{Gender, Individual, IndividualId, Roster};

/// Unordered pair stored with `a < b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AffinityPair {
    pub a: IndividualId,
    pub b: IndividualId,
}

impl AffinityPair {
    pub fn new(x: IndividualId, y: IndividualId) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn members(&self) -> [IndividualId; 2] {
        [self.a, self.b]
    }

    pub fn contains(&self, id: IndividualId) -> bool {
        self.a == id || self.b == id
    }

    pub fn other(&self, id: IndividualId) -> Option<IndividualId> {
        if self.a == id {
            Some(self.b)
        } else if self.b == id {
            Some(self.a)
        } else {
            None
        }
    }
}

/// Unordered pair where at least one side named the other as incompatible.
pub type IncompatibilityPair = AffinityPair;

/// Gender make-up of a multi-member unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderMix {
    Boys,
    Girls,
    Mixed,
}

/// Language make-up of a multi-member unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageMix {
    Good,
    NotGood,
    Mixed,
}

/// Category of a unit used for scarcity ordering and swap matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitCategory {
    pub gender: GenderMix,
    pub language: LanguageMix,
}

impl UnitCategory {
    pub fn of<'a>(members: impl IntoIterator<Item = &'a Individual>) -> Self {
        let (mut boys, mut girls, mut good, mut not_good) = (0, 0, 0, 0);
        for ind in members {
            match ind.gender {
                Gender::Boy => boys += 1,
                Gender::Girl => girls += 1,
            }
            if ind.good_language {
                good += 1;
            } else {
                not_good += 1;
            }
        }
        let gender = match (boys, girls) {
            (_, 0) => GenderMix::Boys,
            (0, _) => GenderMix::Girls,
            _ => GenderMix::Mixed,
        };
        let language = match (good, not_good) {
            (_, 0) => LanguageMix::Good,
            (0, _) => LanguageMix::NotGood,
            _ => LanguageMix::Mixed,
        };
        Self { gender, language }
    }
}

/// Pedagogical severity of seating `x` and `y` in the same group.
///
/// Keyed on the high-energy and special-needs flags of both sides:
/// special-needs with special-needs is 5, special-needs with high-energy
/// (either way round) is 4, high-energy with high-energy is 3.
pub fn conflict_severity(x: &Individual, y: &Individual) -> u32 {
    let (xz, xi) = (x.flags.high_energy, x.flags.special_needs);
    let (yz, yi) = (y.flags.high_energy, y.flags.special_needs);
    if xi && yi {
        5
    } else if (xi && yz) || (yi && xz) {
        4
    } else if xz && yz {
        3
    } else {
        0
    }
}

/// Affinity and incompatibility graphs for one roster.
#[derive(Debug, Clone)]
pub struct Relations {
    affinity: Vec<AffinityPair>,
    partners: Vec<Vec<IndividualId>>,
    incompatible: Vec<IncompatibilityPair>,
}

impl Relations {
    pub fn build(roster: &Roster) -> Self {
        let n = roster.len();
        let mut partners = vec![Vec::new(); n];
        let mut affinity = Vec::new();
        let mut incompatible = Vec::new();

        for ind in roster.individuals() {
            for &friend in &ind.friends {
                if ind.id < friend && roster.get(friend).friends.contains(&ind.id) {
                    affinity.push(AffinityPair::new(ind.id, friend));
                    partners[ind.id].push(friend);
                    partners[friend].push(ind.id);
                }
            }
            for &other in &ind.conflicts {
                let pair = IncompatibilityPair::new(ind.id, other);
                if !incompatible.contains(&pair) {
                    incompatible.push(pair);
                }
            }
        }

        affinity.sort();
        incompatible.sort();
        for list in &mut partners {
            list.sort_unstable();
        }

        Self {
            affinity,
            partners,
            incompatible,
        }
    }

    /// All reciprocal pairs in ascending order.
    pub fn affinity_pairs(&self) -> &[AffinityPair] {
        &self.affinity
    }

    /// Reciprocal partners of `id`.
    pub fn partners(&self, id: IndividualId) -> &[IndividualId] {
        &self.partners[id]
    }

    pub fn has_partner(&self, id: IndividualId) -> bool {
        !self.partners[id].is_empty()
    }

    pub fn is_mutual(&self, x: IndividualId, y: IndividualId) -> bool {
        self.partners[x].binary_search(&y).is_ok()
    }

    pub fn incompatibility_pairs(&self) -> &[IncompatibilityPair] {
        &self.incompatible
    }

    pub fn are_incompatible(&self, x: IndividualId, y: IndividualId) -> bool {
        self.incompatible
            .binary_search(&IncompatibilityPair::new(x, y))
            .is_ok()
    }

    /// Affinity pairs whose members both satisfy `scope`.
    pub fn pairs_within<'a>(
        &'a self,
        scope: impl Fn(IndividualId) -> bool + 'a,
    ) -> impl Iterator<Item = AffinityPair> + 'a {
        self.affinity
            .iter()
            .copied()
            .filter(move |p| scope(p.a) && scope(p.b))
    }

    /// Affinity pairs whose members are both placed in different groups.
    pub fn broken_pairs<F>(&self, group_of: F) -> Vec<AffinityPair>
    where
        F: Fn(IndividualId) -> Option<usize>,
    {
        self.affinity
            .iter()
            .copied()
            .filter(|p| match (group_of(p.a), group_of(p.b)) {
                (Some(x), Some(y)) => x != y,
                _ => false,
            })
            .collect()
    }
}
