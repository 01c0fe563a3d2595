use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{DistributeError, Result};

/// Registry key for a job's worker pool.
pub fn pool_name(job_id: &Uuid) -> String {
    format!("distribute:{}", job_id)
}

/// How the units submitted to a coordinator ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkSummary {
    /// Units that ran to completion
    pub finished: usize,
    /// Units that panicked
    pub panicked: usize,
    /// Units that never started because the pool was cancelled first
    pub skipped: usize,
}

/// Bounded, cancellable worker pool bound to one job.
///
/// At most `parallelism` units run at once. Once cancelled, units that have
/// not started are dropped; units already running finish normally.
#[derive(Debug)]
pub struct Coordinator {
    name: String,
    job_id: Uuid,
    parallelism: usize,
    token: CancellationToken,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<bool>>,
}

impl Coordinator {
    pub fn new(job_id: Uuid, parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            name: pool_name(&job_id),
            job_id,
            parallelism,
            token: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(parallelism)),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Token observed by units that want to stop early, e.g. between
    /// rolling-restart steps.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Queue a unit of work.
    pub async fn submit<F>(&self, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let permits = self.permits.clone();
        self.tasks.lock().await.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return false,
                },
            };
            if token.is_cancelled() {
                return false;
            }
            unit.await;
            true
        });
    }

    /// Wait for every submitted unit to finish or be skipped.
    pub async fn await_all(&self) -> WorkSummary {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        let mut summary = WorkSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => summary.finished += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(pool = %self.name, error = %e, "Distribution worker died");
                    summary.panicked += 1;
                }
            }
        }
        summary
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::info!(pool = %self.name, "Cancelling distribution workers");
        }
        self.token.cancel();
    }
}

/// Process-wide lookup of active coordinators, so a cancel request can
/// reach a pool it did not create.
#[derive(Debug, Default)]
pub struct CoordinatorRegistry {
    pools: RwLock<HashMap<String, Arc<Coordinator>>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, job_id: Uuid, parallelism: usize) -> Result<Arc<Coordinator>> {
        let name = pool_name(&job_id);
        let mut pools = self.pools.write().await;
        if pools.contains_key(&name) {
            return Err(DistributeError::JobAlreadyRunning(job_id));
        }
        let coordinator = Arc::new(Coordinator::new(job_id, parallelism));
        pools.insert(name, coordinator.clone());
        tracing::debug!(job_id = %job_id, parallelism, "Coordinator created");
        Ok(coordinator)
    }

    pub async fn get(&self, job_id: &Uuid) -> Option<Arc<Coordinator>> {
        self.pools.read().await.get(&pool_name(job_id)).cloned()
    }

    /// Signal a job's workers to stop. Returns false if no pool is active.
    pub async fn cancel(&self, job_id: &Uuid) -> bool {
        match self.get(job_id).await {
            Some(coordinator) => {
                coordinator.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a job's pool. Double dispose is a no-op.
    pub async fn dispose(&self, job_id: &Uuid) -> bool {
        let removed = self.pools.write().await.remove(&pool_name(job_id));
        if removed.is_some() {
            tracing::debug!(job_id = %job_id, "Coordinator disposed");
        }
        removed.is_some()
    }

    pub async fn active_jobs(&self) -> Vec<Uuid> {
        self.pools
            .read()
            .await
            .values()
            .map(|c| c.job_id())
            .collect()
    }
}
