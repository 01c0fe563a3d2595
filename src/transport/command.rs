use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::CommandTransportConfig;
use crate::distribution::job::{ArtifactRef, PushOptions, TargetRef};
use crate::transport::{TargetOutcome, TargetTransport};

/// Pushes an artifact by running a shell command once per target.
///
/// The command sees the target through environment variables:
/// - `DIST_NODE_ID`, `DIST_UNIT_ID`: the target
/// - `DIST_ARTIFACT`: artifact path or URL
/// - `DIST_OPTIONS`: push options as JSON
///
/// Exit status 0 is success. Anything else, including a timeout or a
/// failure to spawn, becomes [`TargetOutcome::Fail`] carrying stderr when
/// there is any.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    config: CommandTransportConfig,
}

impl CommandTransport {
    pub fn new(config: CommandTransportConfig) -> Self {
        Self { config }
    }

    fn build_command(
        &self,
        target: &TargetRef,
        artifact: &ArtifactRef,
        options: &PushOptions,
    ) -> Command {
        let options_json = serde_json::to_string(options).unwrap_or_else(|_| "{}".to_string());

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(&self.config.command)
            .env("DIST_NODE_ID", &target.node_id)
            .env("DIST_UNIT_ID", &target.unit_id)
            .env("DIST_ARTIFACT", artifact.to_string())
            .env("DIST_OPTIONS", options_json)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn process_output(
        target: &TargetRef,
        result: Result<std::process::Output, std::io::Error>,
    ) -> TargetOutcome {
        match result {
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let exit_code = output.status.code();

                if output.status.success() {
                    tracing::info!(
                        node_id = %target.node_id,
                        unit_id = %target.unit_id,
                        "Push completed"
                    );
                    TargetOutcome::Ok
                } else {
                    tracing::warn!(
                        node_id = %target.node_id,
                        unit_id = %target.unit_id,
                        exit_code = ?exit_code,
                        "Push failed"
                    );
                    TargetOutcome::Fail(if stderr.is_empty() {
                        format!("Exit code: {:?}", exit_code)
                    } else {
                        stderr
                    })
                }
            }
            Err(e) => {
                tracing::error!(
                    node_id = %target.node_id,
                    unit_id = %target.unit_id,
                    error = %e,
                    "Push could not be started"
                );
                TargetOutcome::Fail(e.to_string())
            }
        }
    }
}

#[async_trait]
impl TargetTransport for CommandTransport {
    async fn push(
        &self,
        target: &TargetRef,
        artifact: &ArtifactRef,
        options: &PushOptions,
    ) -> TargetOutcome {
        tracing::info!(
            node_id = %target.node_id,
            unit_id = %target.unit_id,
            artifact = %artifact,
            "Pushing artifact"
        );

        let mut cmd = self.build_command(target, artifact, options);
        let output = cmd.output();
        let result = match self.config.timeout() {
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(result) => result,
                Err(_) => {
                    return TargetOutcome::Fail(format!(
                        "push timed out after {}s",
                        limit.as_secs()
                    ))
                }
            },
            None => output.await,
        };

        Self::process_output(target, result)
    }
}
