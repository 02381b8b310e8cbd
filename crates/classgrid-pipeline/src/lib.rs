//! classgrid pipeline: roster in, selected assignment out.
//!
//! # Components
//!
//! - **`pipeline`**: validation, per-lineage phase orchestration, the
//!   per-phase trace, repair records and final selection

pub mod pipeline;

pub use pipeline::{PhaseTrace, Pipeline, PipelineOutcome, RepairRecord};
