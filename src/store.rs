use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::distribution::job::{DistributionJob, JobStatus, TargetLog, TargetStatus};
use crate::error::{DistributeError, Result};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Persistence for jobs and their per-target log records.
///
/// Terminal writes are compare-and-set: `finish_job` refuses to leave a
/// terminal job status and `finish_log` only moves a record out of
/// `Prepared`. Both return `false` when the write was discarded.
#[async_trait]
pub trait DistributionStore: Send + Sync {
    async fn insert_job(&self, job: DistributionJob) -> Result<()>;

    async fn get_job(&self, id: &Uuid) -> Result<Option<DistributionJob>>;

    async fn list_jobs(&self) -> Result<Vec<DistributionJob>>;

    /// Move a pending job to running.
    async fn mark_running(&self, id: &Uuid) -> Result<bool>;

    async fn finish_job(
        &self,
        id: &Uuid,
        status: JobStatus,
        message: Option<String>,
        actor: &str,
    ) -> Result<bool>;

    async fn insert_logs(&self, logs: Vec<TargetLog>) -> Result<()>;

    async fn finish_log(&self, log_id: &Uuid, status: TargetStatus, result: &str) -> Result<bool>;

    async fn logs_for_job(&self, job_id: &Uuid) -> Result<Vec<TargetLog>>;
}

#[derive(Debug, Default)]
struct StoreState {
    jobs: HashMap<Uuid, DistributionJob>,
    logs: HashMap<Uuid, TargetLog>,
}

/// In-process store used by the CLI, the dashboard and tests.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    max_jobs: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            max_jobs,
        }
    }

    /// Drop finished jobs and their log records. Returns the number of jobs removed.
    pub async fn cleanup_finished_jobs(&self) -> usize {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !job.status.is_terminal());
        let StoreState { jobs, logs } = &mut *state;
        logs.retain(|_, log| jobs.contains_key(&log.job_id));
        before - state.jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.jobs.is_empty()
    }
}

#[async_trait]
impl DistributionStore for MemoryStore {
    async fn insert_job(&self, job: DistributionJob) -> Result<()> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(DistributeError::JobAlreadyExists(job.id));
        }
        if state.jobs.len() >= self.max_jobs {
            return Err(DistributeError::StoreFull);
        }
        state.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: &Uuid) -> Result<Option<DistributionJob>> {
        Ok(self.state.read().await.jobs.get(id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<DistributionJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<DistributionJob> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn mark_running(&self, id: &Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or(DistributeError::JobNotFound(*id))?;
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        Ok(true)
    }

    async fn finish_job(
        &self,
        id: &Uuid,
        status: JobStatus,
        message: Option<String>,
        actor: &str,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or(DistributeError::JobNotFound(*id))?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = status;
        job.status_message = message;
        job.modified_by = actor.to_string();
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn insert_logs(&self, logs: Vec<TargetLog>) -> Result<()> {
        let mut state = self.state.write().await;
        for log in logs {
            state.logs.insert(log.id, log);
        }
        Ok(())
    }

    async fn finish_log(&self, log_id: &Uuid, status: TargetStatus, result: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(log) = state.logs.get_mut(log_id) else {
            return Err(DistributeError::Store(format!("log record {} not found", log_id)));
        };
        if log.status.is_terminal() {
            return Ok(false);
        }
        log.status = status;
        log.result = Some(result.to_string());
        log.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn logs_for_job(&self, job_id: &Uuid) -> Result<Vec<TargetLog>> {
        let state = self.state.read().await;
        let mut logs: Vec<TargetLog> = state
            .logs
            .values()
            .filter(|log| log.job_id == *job_id)
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.started_at);
        Ok(logs)
    }
}
