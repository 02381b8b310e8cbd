//! classgrid placement phases 1 to 5.
//!
//! Each phase takes a parent [`Scenario`](classgrid_core::Scenario) and
//! returns children; parents are never mutated. Search phases fan out into
//! a [`ScenarioPool`](classgrid_core::ScenarioPool), the rest map one
//! scenario to one scenario.
//!
//! # Components
//!
//! - **`founders`**: phase 1, canonical enumeration of founder assignments
//! - **`quota`**: phase 2, quota-bounded backtracking for flagged individuals
//! - **`attach`**: phase 3, partners joining an already-placed affinity partner
//! - **`pairs`**: phase 4, atomic placement of unplaced affinity pairs
//! - **`residual`**: phase 5, greedy placement of everyone left

pub mod attach;
pub mod founders;
pub mod pairs;
pub mod quota;
pub mod residual;

pub use attach::{attach_partners, select_attached};
pub use founders::seed_founders;
pub use pairs::{place_pairs, rank_paired};
pub use quota::{Quota, seed_quota};
pub use residual::place_residual;
