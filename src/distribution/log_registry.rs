use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::distribution::job::TargetKey;

/// Outstanding log records of one job.
///
/// An entry exists exactly while its target is still `Prepared`. Whoever
/// removes an entry owns that target's terminal transition.
#[derive(Debug, Default)]
pub struct JobLogs {
    entries: HashMap<TargetKey, Uuid>,
    cancelled_by: Option<String>,
}

impl JobLogs {
    pub fn log_id(&self, key: &TargetKey) -> Option<Uuid> {
        self.entries.get(key).copied()
    }

    /// Claim a target. `None` means someone else already finalized it.
    pub fn remove(&mut self, key: &TargetKey) -> Option<Uuid> {
        self.entries.remove(key)
    }

    /// Claim every outstanding target.
    pub fn drain(&mut self) -> Vec<(TargetKey, Uuid)> {
        let mut drained: Vec<(TargetKey, Uuid)> = self.entries.drain().collect();
        drained.sort();
        drained
    }

    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    pub fn mark_cancelled(&mut self, actor: &str) {
        self.cancelled_by = Some(actor.to_string());
    }

    /// Actor whose cancellation won the job, if any.
    pub fn cancelled_by(&self) -> Option<&str> {
        self.cancelled_by.as_deref()
    }
}

/// Job id to outstanding target log records.
///
/// Shared by the per-target completion path and the cancellation path.
/// Each job owns its own slice behind its own lock, so jobs never contend
/// with each other beyond the short map lookup.
#[derive(Debug, Default)]
pub struct JobLogRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<JobLogs>>>>,
}

impl JobLogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the log records of a job. Returns false if the job already
    /// has a slice.
    pub async fn register(
        &self,
        job_id: Uuid,
        entries: impl IntoIterator<Item = (TargetKey, Uuid)>,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job_id) {
            return false;
        }
        let logs = JobLogs {
            entries: entries.into_iter().collect(),
            cancelled_by: None,
        };
        jobs.insert(job_id, Arc::new(Mutex::new(logs)));
        true
    }

    /// Lock a job's slice. The guard serialises cancellation against
    /// completion for that job.
    pub async fn lock(&self, job_id: &Uuid) -> Option<OwnedMutexGuard<JobLogs>> {
        let slice = self.jobs.read().await.get(job_id).cloned()?;
        Some(slice.lock_owned().await)
    }

    pub async fn log_id(&self, job_id: &Uuid, key: &TargetKey) -> Option<Uuid> {
        self.lock(job_id).await?.log_id(key)
    }

    pub async fn remove(&self, job_id: &Uuid, key: &TargetKey) -> Option<Uuid> {
        self.lock(job_id).await?.remove(key)
    }

    pub async fn drain(&self, job_id: &Uuid) -> Vec<(TargetKey, Uuid)> {
        match self.lock(job_id).await {
            Some(mut logs) => logs.drain(),
            None => Vec::new(),
        }
    }

    pub async fn outstanding(&self, job_id: &Uuid) -> usize {
        match self.lock(job_id).await {
            Some(logs) => logs.outstanding(),
            None => 0,
        }
    }

    /// Forget a job entirely. Double removal is a no-op.
    pub async fn remove_job(&self, job_id: &Uuid) -> bool {
        self.jobs.write().await.remove(job_id).is_some()
    }

    pub async fn contains(&self, job_id: &Uuid) -> bool {
        self.jobs.read().await.contains_key(job_id)
    }
}
