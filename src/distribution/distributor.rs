use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DistributorConfig;
use crate::distribution::aggregator::StatusAggregator;
use crate::distribution::coordinator::{Coordinator, CoordinatorRegistry, WorkSummary};
use crate::distribution::job::{
    ArtifactRef, DistributionJob, JobOutcome, JobSpec, JobStatus, TargetLog, TargetStatus,
    SYSTEM_ACTOR,
};
use crate::distribution::log_registry::JobLogRegistry;
use crate::distribution::strategy::{
    self, ExecutionPlan, RunContext, CANCELLED_MANUALLY, NO_RESULT_REPORTED,
};
use crate::error::{DistributeError, Result};
use crate::notify::Notifier;
use crate::store::DistributionStore;
use crate::transport::TargetTransport;

/// Resolves once the job's terminal status has been persisted.
#[derive(Debug)]
pub struct CompletionHandle {
    job_id: Uuid,
    handle: JoinHandle<JobOutcome>,
}

impl CompletionHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<JobOutcome> {
        let job_id = self.job_id;
        self.handle.await.map_err(|e| {
            DistributeError::Internal(format!("distribution driver for {} failed: {}", job_id, e))
        })
    }
}

/// Entry point for running and cancelling distribution jobs.
///
/// Cloning is cheap; clones share the store, the transport and both
/// registries.
#[derive(Clone)]
pub struct Distributor {
    config: DistributorConfig,
    store: Arc<dyn DistributionStore>,
    transport: Arc<dyn TargetTransport>,
    logs: Arc<JobLogRegistry>,
    coordinators: Arc<CoordinatorRegistry>,
    aggregator: StatusAggregator,
}

impl Distributor {
    pub fn new(
        config: DistributorConfig,
        store: Arc<dyn DistributionStore>,
        transport: Arc<dyn TargetTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::with_registries(
            config,
            store,
            transport,
            notifier,
            Arc::new(JobLogRegistry::new()),
            Arc::new(CoordinatorRegistry::new()),
        )
    }

    /// Build a distributor over registries shared with other components.
    pub fn with_registries(
        config: DistributorConfig,
        store: Arc<dyn DistributionStore>,
        transport: Arc<dyn TargetTransport>,
        notifier: Arc<dyn Notifier>,
        logs: Arc<JobLogRegistry>,
        coordinators: Arc<CoordinatorRegistry>,
    ) -> Self {
        let aggregator = StatusAggregator::new(store.clone(), notifier);
        Self {
            config,
            store,
            transport,
            logs,
            coordinators,
            aggregator,
        }
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    pub fn log_registry(&self) -> &Arc<JobLogRegistry> {
        &self.logs
    }

    pub fn coordinators(&self) -> &Arc<CoordinatorRegistry> {
        &self.coordinators
    }

    /// Validate a spec, start the job and return its id without waiting.
    pub async fn submit(&self, spec: JobSpec, actor: &str) -> Result<Uuid> {
        let job = DistributionJob::from_spec(spec, actor, self.config.default_interval_secs)?;
        let handle = self.run(job).await?;
        Ok(handle.job_id())
    }

    /// Start a pending job.
    ///
    /// The job, its prepared target logs and its registry slice all exist
    /// before this returns, so a cancel issued right after sees every
    /// target.
    pub async fn run(&self, job: DistributionJob) -> Result<CompletionHandle> {
        job.check_targets()?;
        match job.status {
            JobStatus::Pending => {}
            status if status.is_terminal() => {
                return Err(DistributeError::JobAlreadyTerminal(job.id))
            }
            _ => return Err(DistributeError::JobAlreadyRunning(job.id)),
        }

        let plan = ExecutionPlan::new(&job, &self.config);
        let coordinator = self.coordinators.create(job.id, plan.parallelism).await?;

        let target_logs: Vec<TargetLog> = plan
            .targets
            .iter()
            .map(|t| TargetLog::prepared(&job, t, self.config.mode_data_max_len))
            .collect();
        let entries: Vec<_> = target_logs.iter().map(|l| (l.key(), l.id)).collect();
        if !self.logs.register(job.id, entries).await {
            self.coordinators.dispose(&job.id).await;
            return Err(DistributeError::JobAlreadyRunning(job.id));
        }

        // Held until the job is running so cancellation waits for a
        // fully prepared job.
        let guard = self.logs.lock(&job.id).await;

        if let Err(e) = self.store.insert_job(job.clone()).await {
            drop(guard);
            self.release(&job.id).await;
            return Err(e);
        }
        let started = match self.store.insert_logs(target_logs).await {
            Ok(()) => self.store.mark_running(&job.id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            drop(guard);
            self.abandon(&job, &e).await;
            return Err(e);
        }
        drop(guard);

        tracing::info!(
            job_id = %job.id,
            name = %job.name,
            policy = %job.policy,
            targets = plan.targets.len(),
            parallelism = plan.parallelism,
            "Starting distribution to {} targets",
            plan.targets.len()
        );

        let job_id = job.id;
        let mut job = job;
        job.status = JobStatus::Running;
        let this = self.clone();
        let handle = tokio::spawn(async move { this.drive(job, plan, coordinator).await });

        Ok(CompletionHandle { job_id, handle })
    }

    /// Request cancellation of a job.
    ///
    /// Every target still outstanding is finalized as `Cancelled` and the
    /// job is persisted as `Cancelled` before this returns. Targets already
    /// in flight keep running, but their outcomes are discarded. Returns
    /// `Ok(false)` when nothing was outstanding, e.g. the job already
    /// finished.
    pub async fn cancel(&self, job_id: &Uuid, actor: &str) -> Result<bool> {
        let actor = if actor.is_empty() { SYSTEM_ACTOR } else { actor };
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(DistributeError::JobNotFound(*job_id))?;

        self.coordinators.cancel(job_id).await;

        let Some(mut logs) = self.logs.lock(job_id).await else {
            tracing::debug!(job_id = %job_id, status = %job.status, "Cancel requested for inactive job");
            return Ok(false);
        };
        let outstanding = logs.drain();
        if outstanding.is_empty() {
            tracing::debug!(job_id = %job_id, "Cancel requested with no outstanding targets");
            return Ok(false);
        }
        logs.mark_cancelled(actor);

        for (key, log_id) in &outstanding {
            if let Err(e) = self
                .store
                .finish_log(log_id, TargetStatus::Cancelled, CANCELLED_MANUALLY)
                .await
            {
                tracing::error!(job_id = %job_id, target = %key, error = %e, "Failed to record cancelled target");
            }
        }

        tracing::info!(
            job_id = %job_id,
            actor,
            cancelled_targets = outstanding.len(),
            "Distribution cancelled"
        );

        let success_count = self.count_successes(job_id).await;
        self.aggregator
            .persist(
                &job,
                JobStatus::Cancelled,
                Some(format!("cancelled by {}", actor)),
                actor,
                success_count,
            )
            .await;
        Ok(true)
    }

    /// Cancel every active job. Returns how many were actually cancelled.
    pub async fn cancel_all(&self, actor: &str) -> usize {
        let mut cancelled = 0;
        for job_id in self.coordinators.active_jobs().await {
            match self.cancel(&job_id, actor).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Failed to cancel job"),
            }
        }
        cancelled
    }

    pub async fn job(&self, job_id: &Uuid) -> Result<DistributionJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(DistributeError::JobNotFound(*job_id))
    }

    pub async fn jobs(&self) -> Result<Vec<DistributionJob>> {
        self.store.list_jobs().await
    }

    pub async fn target_logs(&self, job_id: &Uuid) -> Result<Vec<TargetLog>> {
        self.job(job_id).await?;
        self.store.logs_for_job(job_id).await
    }

    async fn drive(
        self,
        job: DistributionJob,
        plan: ExecutionPlan,
        coordinator: Arc<Coordinator>,
    ) -> JobOutcome {
        let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(RunContext {
            job: job.clone(),
            store: self.store.clone(),
            transport: self.transport.clone(),
            logs: self.logs.clone(),
            reports: reports_tx,
        });
        strategy::schedule(ctx, &coordinator, plan).await;

        let summary = coordinator.await_all().await;
        let mut outcomes = Vec::new();
        while let Ok(report) = reports_rx.try_recv() {
            tracing::debug!(job_id = %job.id, target = %report.key, status = %report.status, "Target reported");
            outcomes.push(report.status);
        }

        let outcome = self.conclude(&job, summary, &outcomes).await;
        self.teardown(&job).await;
        outcome
    }

    /// Decide between the cancellation path and aggregation under the
    /// job's slice lock.
    async fn conclude(
        &self,
        job: &DistributionJob,
        summary: WorkSummary,
        outcomes: &[TargetStatus],
    ) -> JobOutcome {
        let success_count = outcomes.iter().filter(|s| **s == TargetStatus::Ok).count();
        let Some(mut logs) = self.logs.lock(&job.id).await else {
            return self.aggregator.finalize(job, outcomes.len(), outcomes).await;
        };

        if let Some(actor) = logs.cancelled_by() {
            tracing::debug!(job_id = %job.id, actor, "Distribution ended by cancellation");
            return self.stored_outcome(job, JobStatus::Cancelled, success_count).await;
        }

        let leftovers = logs.drain();
        if !leftovers.is_empty() {
            tracing::warn!(
                job_id = %job.id,
                missing = leftovers.len(),
                panicked = summary.panicked,
                skipped = summary.skipped,
                "Targets never reported a result"
            );
            for (key, log_id) in &leftovers {
                if let Err(e) = self
                    .store
                    .finish_log(log_id, TargetStatus::Fail, NO_RESULT_REPORTED)
                    .await
                {
                    tracing::error!(job_id = %job.id, target = %key, error = %e, "Failed to record missing result");
                }
            }
        }

        self.aggregator
            .finalize(job, outcomes.len(), outcomes)
            .await
    }

    async fn stored_outcome(
        &self,
        job: &DistributionJob,
        fallback: JobStatus,
        success_count: usize,
    ) -> JobOutcome {
        let (status, message) = match self.store.get_job(&job.id).await {
            Ok(Some(stored)) => (stored.status, stored.status_message),
            Ok(None) => (fallback, None),
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to read job status");
                (fallback, None)
            }
        };
        JobOutcome {
            job_id: job.id,
            status,
            message,
            success_count,
            total: job.targets.len(),
        }
    }

    async fn count_successes(&self, job_id: &Uuid) -> usize {
        match self.store.logs_for_job(job_id).await {
            Ok(logs) => logs
                .iter()
                .filter(|l| l.status == TargetStatus::Ok)
                .count(),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to count successful targets");
                0
            }
        }
    }

    async fn teardown(&self, job: &DistributionJob) {
        self.release(&job.id).await;

        if !self.config.delete_artifact_on_finish {
            return;
        }
        if let ArtifactRef::File(path) = &job.artifact {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!(job_id = %job.id, path = %path.display(), "Artifact removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    job_id = %job.id,
                    path = %path.display(),
                    error = %e,
                    "Failed to remove artifact"
                ),
            }
        }
    }

    async fn release(&self, job_id: &Uuid) {
        self.coordinators.dispose(job_id).await;
        self.logs.remove_job(job_id).await;
    }

    /// Fail a job that was stored but could not be started.
    async fn abandon(&self, job: &DistributionJob, cause: &DistributeError) {
        tracing::error!(job_id = %job.id, error = %cause, "Failed to start distribution");
        self.release(&job.id).await;
        if let Err(e) = self
            .store
            .finish_job(
                &job.id,
                JobStatus::Failed,
                Some(format!("failed to start: {}", cause)),
                SYSTEM_ACTOR,
            )
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to mark job failed");
        }
    }
}
