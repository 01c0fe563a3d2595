use std::net::SocketAddr;
use std::time::Duration;

/// Tuning for the distribution engine itself.
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// Pacing window between rolling-restart steps when a job spec omits one
    pub default_interval_secs: u64,
    /// Upper bound on concurrent pushes for a parallel job. `None` means one
    /// worker per target.
    pub max_parallel_targets: Option<usize>,
    /// Remove a local-file artifact once the job has been torn down
    pub delete_artifact_on_finish: bool,
    /// Longest `mode_data` copied onto a target log record
    pub mode_data_max_len: usize,
    /// Maximum number of jobs kept by the in-memory store
    pub max_jobs: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 10,
            max_parallel_targets: None,
            delete_artifact_on_finish: true,
            mode_data_max_len: 400,
            max_jobs: 10_000,
        }
    }
}

impl DistributorConfig {
    pub fn with_default_interval(mut self, secs: u64) -> Self {
        self.default_interval_secs = secs;
        self
    }

    pub fn with_max_parallel_targets(mut self, limit: usize) -> Self {
        self.max_parallel_targets = Some(limit.max(1));
        self
    }

    pub fn with_artifact_cleanup(mut self, enabled: bool) -> Self {
        self.delete_artifact_on_finish = enabled;
        self
    }

    /// Number of workers a parallel job with `targets` targets gets.
    pub fn parallelism_for(&self, targets: usize) -> usize {
        let wanted = targets.max(1);
        match self.max_parallel_targets {
            Some(limit) => wanted.min(limit),
            None => wanted,
        }
    }
}

/// Configuration for the shell-command transport.
///
/// The command runs once per target with the target identity, artifact and
/// push options exported as `DIST_*` environment variables.
#[derive(Debug, Clone)]
pub struct CommandTransportConfig {
    /// Shell used to interpret `command`
    pub shell: String,
    /// Command line performing the push-and-restart for one target
    pub command: String,
    /// Kill the push after this many seconds
    pub timeout_secs: Option<u64>,
}

impl Default for CommandTransportConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            command: "true".to_string(),
            timeout_secs: Some(300),
        }
    }
}

impl CommandTransportConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub timeout_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub distributor: DistributorConfig,
    pub transport: CommandTransportConfig,
    pub webhook: WebhookConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            distributor: DistributorConfig::default(),
            transport: CommandTransportConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: CommandTransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_distributor(mut self, distributor: DistributorConfig) -> Self {
        self.distributor = distributor;
        self
    }
}
