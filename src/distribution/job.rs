use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identity recorded when the platform itself triggers a transition.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Stable numeric code carried in webhook payloads.
    pub fn code(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Done => 2,
            JobStatus::Cancelled => 3,
            JobStatus::Failed => 4,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Prepared,
    Ok,
    Fail,
    Cancelled,
    ArtificiallyCancelled,
}

impl TargetStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TargetStatus::Prepared)
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Prepared => write!(f, "prepared"),
            TargetStatus::Ok => write!(f, "ok"),
            TargetStatus::Fail => write!(f, "fail"),
            TargetStatus::Cancelled => write!(f, "cancelled"),
            TargetStatus::ArtificiallyCancelled => write!(f, "artificially_cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionPolicy {
    #[default]
    Parallel,
    SequentialContinueOnFailure,
    SequentialAbortOnFailure,
}

impl DistributionPolicy {
    pub fn is_sequential(self) -> bool {
        !matches!(self, DistributionPolicy::Parallel)
    }
}

impl std::fmt::Display for DistributionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionPolicy::Parallel => write!(f, "parallel"),
            DistributionPolicy::SequentialContinueOnFailure => {
                write!(f, "sequential_continue_on_failure")
            }
            DistributionPolicy::SequentialAbortOnFailure => write!(f, "sequential_abort_on_failure"),
        }
    }
}

/// Where the artifact came from. Recorded on every target log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionMode {
    #[default]
    Upload,
    Download,
    BuildTrigger,
    UseBuild,
    FileStorage,
    StaticFileStorage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "location")]
pub enum ArtifactRef {
    File(PathBuf),
    Url(String),
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactRef::File(path) => write!(f, "{}", path.display()),
            ArtifactRef::Url(url) => write!(f, "{}", url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterAction {
    #[default]
    None,
    Restart,
}

/// Options handed to the transport untouched. The engine never interprets
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushOptions {
    pub after: AfterAction,
    pub clear_old: bool,
    pub close_first: bool,
    pub unzip: bool,
    pub strip_components: u32,
    pub secondary_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub node_id: String,
    pub unit_id: String,
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.unit_id, self.node_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub node_id: String,
    pub unit_id: String,
    pub sort_value: i64,
}

impl TargetRef {
    pub fn new(node_id: impl Into<String>, unit_id: impl Into<String>, sort_value: i64) -> Self {
        Self {
            node_id: node_id.into(),
            unit_id: unit_id.into(),
            sort_value,
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey {
            node_id: self.node_id.clone(),
            unit_id: self.unit_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub node_id: String,
    pub unit_id: String,
    #[serde(default)]
    pub sort_value: Option<i64>,
}

/// Submitted job description. Converted into a [`DistributionJob`] by
/// [`DistributionJob::from_spec`], which is where validation happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub policy: DistributionPolicy,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    pub artifact: ArtifactRef,
    #[serde(default)]
    pub options: PushOptions,
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default)]
    pub mode: DistributionMode,
    #[serde(default)]
    pub mode_data: Option<String>,
    /// Comma separated `unit@node` tokens restricting which targets run
    #[serde(default)]
    pub select: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("job name cannot be empty")]
    EmptyName,
    #[error("job has no targets to distribute to")]
    EmptyTargetSet,
    #[error("target has an empty node or unit id")]
    EmptyTargetId,
    #[error("target {unit_id}@{node_id} is listed more than once")]
    DuplicateTarget { node_id: String, unit_id: String },
    #[error("secondary directory {0:?} must be relative and must not leave the unit directory")]
    InvalidSecondaryDirectory(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionJob {
    pub id: Uuid,
    pub name: String,
    /// Ordered by `sort_value`, ties in submission order
    pub targets: Vec<TargetRef>,
    pub policy: DistributionPolicy,
    pub interval_secs: u64,
    pub artifact: ArtifactRef,
    pub options: PushOptions,
    pub webhook: Option<String>,
    pub mode: DistributionMode,
    pub mode_data: Option<String>,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub created_by: String,
    pub modified_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DistributionJob {
    /// Validate a spec and build a pending job from it.
    pub fn from_spec(
        spec: JobSpec,
        actor: &str,
        default_interval_secs: u64,
    ) -> Result<Self, ValidationError> {
        if spec.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if let Some(dir) = spec.options.secondary_directory.as_deref() {
            check_secondary_directory(dir)?;
        }

        let selection = parse_selection(spec.select.as_deref());
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(spec.targets.len());
        for (index, target) in spec.targets.into_iter().enumerate() {
            if target.node_id.trim().is_empty() || target.unit_id.trim().is_empty() {
                return Err(ValidationError::EmptyTargetId);
            }
            let target = TargetRef::new(
                target.node_id,
                target.unit_id,
                target.sort_value.unwrap_or(index as i64),
            );
            if !seen.insert(target.key()) {
                return Err(ValidationError::DuplicateTarget {
                    node_id: target.node_id,
                    unit_id: target.unit_id,
                });
            }
            let selected = selection
                .as_ref()
                .map_or(true, |tokens| tokens.contains(&target.key().to_string()));
            if selected {
                targets.push(target);
            }
        }
        if targets.is_empty() {
            return Err(ValidationError::EmptyTargetSet);
        }
        // Vec::sort_by_key is stable, so equal sort values keep list order.
        targets.sort_by_key(|t| t.sort_value);

        let webhook = spec.webhook.filter(|w| !w.trim().is_empty());
        let actor = if actor.is_empty() { SYSTEM_ACTOR } else { actor };

        Ok(Self {
            id: Uuid::new_v4(),
            name: spec.name,
            targets,
            policy: spec.policy,
            interval_secs: spec.interval_secs.unwrap_or(default_interval_secs),
            artifact: spec.artifact,
            options: spec.options,
            webhook,
            mode: spec.mode,
            mode_data: spec.mode_data,
            status: JobStatus::Pending,
            status_message: None,
            created_by: actor.to_string(),
            modified_by: actor.to_string(),
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Re-check the target list of a job that may have been built or
    /// edited after [`DistributionJob::from_spec`].
    pub fn check_targets(&self) -> Result<(), ValidationError> {
        if self.targets.is_empty() {
            return Err(ValidationError::EmptyTargetSet);
        }
        let mut seen = HashSet::with_capacity(self.targets.len());
        for target in &self.targets {
            if target.node_id.trim().is_empty() || target.unit_id.trim().is_empty() {
                return Err(ValidationError::EmptyTargetId);
            }
            if !seen.insert(target.key()) {
                return Err(ValidationError::DuplicateTarget {
                    node_id: target.node_id.clone(),
                    unit_id: target.unit_id.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Selection tokens in `unit@node` form. `None` means no selection was
/// given. Tokens without an `@` are kept and simply match no target.
fn parse_selection(select: Option<&str>) -> Option<HashSet<String>> {
    let tokens: HashSet<String> = select?
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| match token.split_once('@') {
            Some((unit_id, node_id)) => format!("{}@{}", unit_id.trim(), node_id.trim()),
            None => token.to_string(),
        })
        .collect();
    (!tokens.is_empty()).then_some(tokens)
}

fn check_secondary_directory(dir: &str) -> Result<(), ValidationError> {
    let escapes = Path::new(dir)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ValidationError::InvalidSecondaryDirectory(dir.to_string()));
    }
    Ok(())
}

/// One pushed (node, unit) pair and its durable log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetLog {
    pub id: Uuid,
    pub job_id: Uuid,
    pub node_id: String,
    pub unit_id: String,
    pub status: TargetStatus,
    pub result: Option<String>,
    pub mode: DistributionMode,
    pub mode_data: Option<String>,
    pub modified_by: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TargetLog {
    pub fn prepared(job: &DistributionJob, target: &TargetRef, mode_data_max_len: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            node_id: target.node_id.clone(),
            unit_id: target.unit_id.clone(),
            status: TargetStatus::Prepared,
            result: None,
            mode: job.mode,
            mode_data: job
                .mode_data
                .as_ref()
                .map(|data| data.chars().take(mode_data_max_len).collect()),
            modified_by: job.modified_by.clone(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey {
            node_id: self.node_id.clone(),
            unit_id: self.unit_id.clone(),
        }
    }
}

/// Final result delivered through a completion handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: Option<String>,
    pub success_count: usize,
    pub total: usize,
}
