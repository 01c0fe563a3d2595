use std::sync::Arc;

use chrono::Utc;

use crate::distribution::job::{DistributionJob, JobOutcome, JobStatus, TargetStatus};
use crate::notify::{NotificationPayload, Notifier};
use crate::store::DistributionStore;

/// Turns per-target outcomes into the job's terminal status, persists it,
/// and fires the job's webhook.
///
/// This is the only writer of a job's terminal status. The cancellation
/// path goes through [`StatusAggregator::persist`] as well.
#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn DistributionStore>,
    notifier: Arc<dyn Notifier>,
}

/// Status decided from the outcomes, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: JobStatus,
    pub message: String,
    pub success_count: usize,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn DistributionStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Decide the terminal status of a job with `total` targets.
    ///
    /// `attempted` counts targets that reported through the scheduling
    /// path. Anything short of `total` means a worker never reported or
    /// targets were skipped, and the job cannot be `Done`.
    pub fn evaluate(total: usize, attempted: usize, outcomes: &[TargetStatus]) -> Verdict {
        let success_count = outcomes.iter().filter(|s| **s == TargetStatus::Ok).count();
        if attempted != total {
            return Verdict {
                status: JobStatus::Failed,
                message: format!(
                    "completed/expected count mismatch: {}/{} (succeeded {})",
                    attempted, total, success_count
                ),
                success_count,
            };
        }
        if success_count == total {
            Verdict {
                status: JobStatus::Done,
                message: format!("distribution succeeded: {}", success_count),
                success_count,
            }
        } else {
            Verdict {
                status: JobStatus::Failed,
                message: format!(
                    "distribution failed: {}/{} targets succeeded",
                    success_count, total
                ),
                success_count,
            }
        }
    }

    pub async fn finalize(
        &self,
        job: &DistributionJob,
        attempted: usize,
        outcomes: &[TargetStatus],
    ) -> JobOutcome {
        let verdict = Self::evaluate(job.targets.len(), attempted, outcomes);
        tracing::info!(
            job_id = %job.id,
            status = %verdict.status,
            message = %verdict.message,
            "Distribution finished"
        );
        self.persist(
            job,
            verdict.status,
            Some(verdict.message),
            &job.created_by,
            verdict.success_count,
        )
        .await
    }

    /// Write a terminal status. If another path already finished the job,
    /// the stored status wins and no notification is sent.
    pub async fn persist(
        &self,
        job: &DistributionJob,
        status: JobStatus,
        message: Option<String>,
        actor: &str,
        success_count: usize,
    ) -> JobOutcome {
        let computed = JobOutcome {
            job_id: job.id,
            status,
            message: message.clone(),
            success_count,
            total: job.targets.len(),
        };

        match self
            .store
            .finish_job(&job.id, status, message.clone(), actor)
            .await
        {
            Ok(true) => {
                self.dispatch(job, status, message, actor);
                computed
            }
            Ok(false) => match self.store.get_job(&job.id).await {
                Ok(Some(stored)) => {
                    tracing::debug!(
                        job_id = %job.id,
                        discarded = %status,
                        stored = %stored.status,
                        "Job already finished, terminal write discarded"
                    );
                    JobOutcome {
                        status: stored.status,
                        message: stored.status_message,
                        ..computed
                    }
                }
                Ok(None) => computed,
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to read job status");
                    computed
                }
            },
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to persist job status");
                computed
            }
        }
    }

    fn dispatch(&self, job: &DistributionJob, status: JobStatus, message: Option<String>, actor: &str) {
        let Some(webhook) = job.webhook.clone() else {
            return;
        };
        let payload =
            NotificationPayload::new(job.id, &job.name, status, message, actor, Utc::now());
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&webhook, &payload).await {
                tracing::warn!(
                    job_id = %payload.job_id,
                    webhook = %webhook,
                    error = %e,
                    "Webhook notification failed"
                );
            }
        });
    }
}
