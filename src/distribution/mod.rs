//! Distribution orchestration.
//!
//! A job pushes one artifact to a set of (node, unit) targets under a
//! [`DistributionPolicy`]:
//!
//! - `Parallel`: every target at once, bounded by the configured limit
//! - `SequentialContinueOnFailure`: one target at a time in `sort_value`
//!   order, pausing `interval` between targets
//! - `SequentialAbortOnFailure`: as above, but the first failure marks the
//!   remaining targets `ArtificiallyCancelled` and stops the job
//!
//! Each target's terminal transition is decided by whoever claims it from
//! the [`JobLogRegistry`]. The scheduling path and the cancellation path
//! race for that claim under the job's slice lock, so a target's log record
//! leaves `Prepared` exactly once and the job's terminal status is written
//! exactly once by the [`StatusAggregator`].

pub mod aggregator;
pub mod coordinator;
pub mod distributor;
pub mod job;
pub mod log_registry;
pub mod strategy;

pub use aggregator::{StatusAggregator, Verdict};
pub use coordinator::{pool_name, Coordinator, CoordinatorRegistry, WorkSummary};
pub use distributor::{CompletionHandle, Distributor};
pub use job::{
    AfterAction, ArtifactRef, DistributionJob, DistributionMode, DistributionPolicy, JobOutcome,
    JobSpec, JobStatus, PushOptions, TargetKey, TargetLog, TargetRef, TargetSpec, TargetStatus,
    ValidationError, SYSTEM_ACTOR,
};
pub use log_registry::{JobLogRegistry, JobLogs};
pub use strategy::ExecutionPlan;
