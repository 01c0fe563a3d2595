//! Test harness for distribution integration tests.
//!
//! Provides a scripted transport, a recording notifier and helpers for
//! building distributors and job specs.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use fleet_distribute::config::DistributorConfig;
use fleet_distribute::distribution::{
    ArtifactRef, DistributionJob, DistributionPolicy, Distributor, JobSpec, JobStatus,
    PushOptions, TargetLog, TargetRef, TargetSpec, TargetStatus,
};
use fleet_distribute::error::{DistributeError, Result as StoreResult};
use fleet_distribute::notify::{NotificationPayload, Notifier, NotifyError};
use fleet_distribute::store::{DistributionStore, MemoryStore};
use uuid::Uuid;
use fleet_distribute::transport::{TargetOutcome, TargetTransport};

/// What the scripted transport does for one node.
#[derive(Clone)]
pub enum Script {
    Ok,
    Fail(String),
    /// Sleep, then succeed
    Slow(Duration),
    /// Block until the gate is opened, then succeed
    Gated(Gate),
    /// Block until the gate is opened, then fail
    GatedFail(Gate, String),
    /// Crash the worker
    Panic,
}

/// Barrier a test opens to let gated pushes finish.
#[derive(Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn open(&self) {
        self.permits.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// A push the transport received.
#[derive(Debug, Clone)]
pub struct PushCall {
    pub node_id: String,
    pub unit_id: String,
    pub started: Instant,
    pub finished: Option<Instant>,
}

/// Transport whose per-node behaviour is scripted by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<PushCall>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node_id: &str, script: Script) -> Self {
        self.scripts.insert(node_id.to_string(), script);
        self
    }

    /// Nodes in the order their pushes started.
    pub async fn pushed_nodes(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|c| c.node_id.clone())
            .collect()
    }

    pub async fn calls(&self) -> Vec<PushCall> {
        self.calls.lock().await.clone()
    }

    pub async fn finished_count(&self) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.finished.is_some())
            .count()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn record_finish(&self, index: usize) {
        if let Some(call) = self.calls.lock().await.get_mut(index) {
            call.finished = Some(Instant::now());
        }
    }
}

#[async_trait]
impl TargetTransport for ScriptedTransport {
    async fn push(
        &self,
        target: &TargetRef,
        _artifact: &ArtifactRef,
        _options: &PushOptions,
    ) -> TargetOutcome {
        let index = {
            let mut calls = self.calls.lock().await;
            calls.push(PushCall {
                node_id: target.node_id.clone(),
                unit_id: target.unit_id.clone(),
                started: Instant::now(),
                finished: None,
            });
            calls.len() - 1
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = match self.scripts.get(&target.node_id).cloned().unwrap_or(Script::Ok) {
            Script::Ok => TargetOutcome::Ok,
            Script::Fail(reason) => TargetOutcome::Fail(reason),
            Script::Slow(delay) => {
                tokio::time::sleep(delay).await;
                TargetOutcome::Ok
            }
            Script::Gated(gate) => {
                gate.pass().await;
                TargetOutcome::Ok
            }
            Script::GatedFail(gate, reason) => {
                gate.pass().await;
                TargetOutcome::Fail(reason)
            }
            Script::Panic => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("transport crashed on {}", target.node_id);
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record_finish(index).await;
        outcome
    }
}

/// Notifier that keeps every payload it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, NotificationPayload)>>,
}

impl RecordingNotifier {
    pub async fn sent(&self) -> Vec<(String, NotificationPayload)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, webhook: &str, payload: &NotificationPayload) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .await
            .push((webhook.to_string(), payload.clone()));
        Ok(())
    }
}

/// Memory store whose log reads can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_log_reads: AtomicBool,
}

impl FlakyStore {
    pub fn fail_log_reads(&self, fail: bool) {
        self.fail_log_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DistributionStore for FlakyStore {
    async fn insert_job(&self, job: DistributionJob) -> StoreResult<()> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, id: &Uuid) -> StoreResult<Option<DistributionJob>> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self) -> StoreResult<Vec<DistributionJob>> {
        self.inner.list_jobs().await
    }

    async fn mark_running(&self, id: &Uuid) -> StoreResult<bool> {
        self.inner.mark_running(id).await
    }

    async fn finish_job(
        &self,
        id: &Uuid,
        status: JobStatus,
        message: Option<String>,
        actor: &str,
    ) -> StoreResult<bool> {
        self.inner.finish_job(id, status, message, actor).await
    }

    async fn insert_logs(&self, logs: Vec<TargetLog>) -> StoreResult<()> {
        self.inner.insert_logs(logs).await
    }

    async fn finish_log(&self, log_id: &Uuid, status: TargetStatus, result: &str) -> StoreResult<bool> {
        self.inner.finish_log(log_id, status, result).await
    }

    async fn logs_for_job(&self, job_id: &Uuid) -> StoreResult<Vec<TargetLog>> {
        if self.fail_log_reads.load(Ordering::SeqCst) {
            return Err(DistributeError::Store("log table unavailable".to_string()));
        }
        self.inner.logs_for_job(job_id).await
    }
}

/// A distributor wired to in-memory collaborators the test can inspect.
pub struct TestFleet {
    pub distributor: Distributor,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<ScriptedTransport>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestFleet {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self::with_config(transport, test_config())
    }

    pub fn with_config(transport: ScriptedTransport, config: DistributorConfig) -> Self {
        let store = Arc::new(MemoryStore::with_capacity(config.max_jobs));
        let transport = Arc::new(transport);
        let notifier = Arc::new(RecordingNotifier::default());
        let distributor = Distributor::new(
            config,
            store.clone(),
            transport.clone(),
            notifier.clone(),
        );
        Self {
            distributor,
            store,
            transport,
            notifier,
        }
    }
}

/// No pacing and no artifact cleanup unless a test asks for them.
pub fn test_config() -> DistributorConfig {
    DistributorConfig::default()
        .with_default_interval(0)
        .with_artifact_cleanup(false)
}

pub fn target(node_id: &str, sort_value: i64) -> TargetSpec {
    TargetSpec {
        node_id: node_id.to_string(),
        unit_id: "api".to_string(),
        sort_value: Some(sort_value),
    }
}

/// Targets `n1..=nN` with ascending sort values.
pub fn targets(count: usize) -> Vec<TargetSpec> {
    (1..=count)
        .map(|i| target(&format!("n{}", i), i as i64))
        .collect()
}

pub fn job_spec(policy: DistributionPolicy, targets: Vec<TargetSpec>) -> JobSpec {
    JobSpec {
        name: "web-release".to_string(),
        targets,
        policy,
        interval_secs: Some(0),
        artifact: ArtifactRef::Url("https://builds.example.com/web-1.2.3.zip".to_string()),
        options: PushOptions::default(),
        webhook: None,
        mode: Default::default(),
        mode_data: None,
        select: None,
    }
}

/// Poll a condition until it is true or the timeout expires
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(10)).await;
    assert!(result, "{}", message);
}
