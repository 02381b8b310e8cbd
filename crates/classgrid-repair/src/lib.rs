//! classgrid repair phases 6 and 7.
//!
//! Both phases work on complete scenarios through simulate-then-commit
//! swaps. A [`ProtectedBaseline`] captured once per lineage is shared by the
//! two phases so the protected-category distribution never drifts.
//!
//! # Components
//!
//! - **`units`**: swaps, the protected baseline and the swap guard
//! - **`balance`**: phase 6, gender and language balance repair
//! - **`tiered`**: phase 7, performance repair through tolerance tiers

pub mod balance;
pub mod tiered;
pub mod units;

pub use balance::{BalanceOutcome, Objective, Spreads, SwapRecord, repair_balance, repair_penalty};
pub use tiered::{TierOutcome, TierReport, extreme_spreads, repair_performance};
pub use units::{Move, ProtectedBaseline, Rejection, Swap, SwapGuard};

#[cfg(test)]
pub(crate) mod fixtures {
    use classgrid_core::{Gender, Roster, RosterRecord};

    pub fn person(name: &str, gender: Gender, good_language: bool) -> RosterRecord {
        RosterRecord {
            name: name.to_string(),
            gender,
            good_language,
            flags: Default::default(),
            performance: Default::default(),
            friends: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn mutual(records: &mut [RosterRecord], i: usize, j: usize) {
        let (a, b) = (records[i].name.clone(), records[j].name.clone());
        records[i].friends.push(b);
        records[j].friends.push(a);
    }

    pub fn roster(records: Vec<RosterRecord>, groups: usize) -> Roster {
        Roster::from_records(records, Some(groups), 25).unwrap()
    }
}
