//! Proposal filtering/ranking ([`pipeline`]), parallel-execution wave
//! partitioning ([`waves`]), and the trajectory planner's scope-narrowing
//! behavior ([`trajectory`]). Each module is pure: no agent invocation, no
//! persistence — callers supply scout output and cross-cycle memory,
//! and get back accepted/deferred/rejected proposals or ticket waves.

pub mod pipeline;
pub mod trajectory;
pub mod waves;

pub use pipeline::{
    adversarial_review, reinject_deferred, run_pipeline, should_retry_scout, CategoryFilter, PipelineConfig,
    PipelineContext, PipelineOutcome, Rejection, RunMode,
};
pub use trajectory::{complete_active_step, narrow_to_active_step, reset as reset_trajectory, skip_active_step, TrajectoryFocus};
pub use waves::{conflict_components, partition_into_waves, tickets_conflict};
