use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DistributorConfig;
use crate::distribution::coordinator::Coordinator;
use crate::distribution::job::{
    DistributionJob, DistributionPolicy, TargetKey, TargetRef, TargetStatus,
};
use crate::distribution::log_registry::JobLogRegistry;
use crate::store::DistributionStore;
use crate::transport::{TargetOutcome, TargetTransport};

pub const TARGET_SUCCEEDED: &str = "distribution succeeded";
pub const PREVIOUS_TARGET_FAILED: &str = "previous target failed";
pub const CANCELLED_MANUALLY: &str = "distribution cancelled manually";
pub const NO_RESULT_REPORTED: &str = "no result reported by worker";

/// Targets in execution order plus the worker count for the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub policy: DistributionPolicy,
    pub targets: Vec<TargetRef>,
    pub parallelism: usize,
}

impl ExecutionPlan {
    pub fn new(job: &DistributionJob, config: &DistributorConfig) -> Self {
        let mut targets = job.targets.clone();
        targets.sort_by_key(|t| t.sort_value);

        let parallelism = if job.policy.is_sequential() {
            1
        } else {
            config.parallelism_for(targets.len())
        };

        Self {
            policy: job.policy,
            targets,
            parallelism,
        }
    }
}

/// A target whose terminal transition went through the scheduling path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub key: TargetKey,
    pub status: TargetStatus,
}

/// Everything a worker needs to attempt targets of one job.
pub struct RunContext {
    pub job: DistributionJob,
    pub store: Arc<dyn DistributionStore>,
    pub transport: Arc<dyn TargetTransport>,
    pub logs: Arc<JobLogRegistry>,
    pub reports: mpsc::UnboundedSender<TargetReport>,
}

/// Submit the plan's work to the job's coordinator.
///
/// Parallel jobs get one unit per target. Sequential jobs get a single
/// unit walking the targets in order, so target N+1 never starts before
/// target N has finished.
pub async fn schedule(ctx: Arc<RunContext>, coordinator: &Coordinator, plan: ExecutionPlan) {
    match plan.policy {
        DistributionPolicy::Parallel => {
            for target in plan.targets {
                let ctx = ctx.clone();
                coordinator
                    .submit(async move {
                        attempt_target(&ctx, &target).await;
                    })
                    .await;
            }
        }
        DistributionPolicy::SequentialContinueOnFailure
        | DistributionPolicy::SequentialAbortOnFailure => {
            let token = coordinator.token();
            coordinator
                .submit(run_sequential(ctx, plan.targets, token))
                .await;
        }
    }
}

async fn run_sequential(ctx: Arc<RunContext>, targets: Vec<TargetRef>, token: CancellationToken) {
    let abort_on_failure = ctx.job.policy == DistributionPolicy::SequentialAbortOnFailure;
    let interval = ctx.job.interval();

    for (index, target) in targets.iter().enumerate() {
        if token.is_cancelled() {
            tracing::debug!(job_id = %ctx.job.id, "Rolling distribution stopped by cancellation");
            return;
        }

        match attempt_target(&ctx, target).await {
            Some(TargetStatus::Ok) => {}
            Some(status) if abort_on_failure => {
                let remaining = &targets[index + 1..];
                tracing::warn!(
                    job_id = %ctx.job.id,
                    node_id = %target.node_id,
                    unit_id = %target.unit_id,
                    status = %status,
                    skipped = remaining.len(),
                    "Target failed, aborting rolling distribution"
                );
                sweep_unattempted(&ctx, remaining).await;
                return;
            }
            Some(_) => {}
            // Claimed by a cancellation while in flight.
            None => return,
        }

        let has_next = index + 1 < targets.len();
        if has_next && !interval.is_zero() {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

/// Push one target and record its outcome.
///
/// Returns `None` when the target had already been finalized by a
/// cancellation, in which case the outcome is discarded.
pub async fn attempt_target(ctx: &RunContext, target: &TargetRef) -> Option<TargetStatus> {
    let job_id = ctx.job.id;
    let outcome = ctx
        .transport
        .push(target, &ctx.job.artifact, &ctx.job.options)
        .await;

    let (status, result) = match outcome {
        TargetOutcome::Ok => (TargetStatus::Ok, TARGET_SUCCEEDED.to_string()),
        TargetOutcome::Fail(reason) => (TargetStatus::Fail, reason),
    };

    let Some(log_id) = ctx.logs.remove(&job_id, &target.key()).await else {
        tracing::debug!(
            job_id = %job_id,
            node_id = %target.node_id,
            unit_id = %target.unit_id,
            discarded = %status,
            "Target already finalized, outcome discarded"
        );
        return None;
    };

    if let Err(e) = ctx.store.finish_log(&log_id, status, &result).await {
        tracing::error!(job_id = %job_id, log_id = %log_id, error = %e, "Failed to record target result");
    }
    let _ = ctx.reports.send(TargetReport {
        key: target.key(),
        status,
    });
    Some(status)
}

/// Mark targets that a rolling distribution will never reach.
async fn sweep_unattempted(ctx: &RunContext, targets: &[TargetRef]) {
    let claimed: Vec<_> = match ctx.logs.lock(&ctx.job.id).await {
        Some(mut logs) => targets
            .iter()
            .filter_map(|t| logs.remove(&t.key()))
            .collect(),
        None => Vec::new(),
    };

    for log_id in claimed {
        if let Err(e) = ctx
            .store
            .finish_log(
                &log_id,
                TargetStatus::ArtificiallyCancelled,
                PREVIOUS_TARGET_FAILED,
            )
            .await
        {
            tracing::error!(job_id = %ctx.job.id, log_id = %log_id, error = %e, "Failed to record skipped target");
        }
    }
}
