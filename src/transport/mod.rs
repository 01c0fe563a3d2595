//! Remote push-and-restart of a single target.
//!
//! The orchestration engine only knows the [`TargetTransport`] trait: hand it
//! a target, the artifact and the opaque push options, get back a
//! [`TargetOutcome`]. Failures are values, never errors, so one target's
//! problem cannot unwind into its siblings.
//!
//! # Implementations
//!
//! - [`CommandTransport`]: runs a configured shell command per target

pub mod command;

use async_trait::async_trait;

use crate::distribution::job::{ArtifactRef, PushOptions, TargetRef};

pub use command::CommandTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Ok,
    Fail(String),
}

impl TargetOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, TargetOutcome::Ok)
    }
}

/// Must be safe to call concurrently for different targets. Retries, if
/// any, belong here and not in the orchestrator.
#[async_trait]
pub trait TargetTransport: Send + Sync {
    async fn push(
        &self,
        target: &TargetRef,
        artifact: &ArtifactRef,
        options: &PushOptions,
    ) -> TargetOutcome;
}
