use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fleet_distribute::config::{CommandTransportConfig, DistributorConfig, ServerConfig};
use fleet_distribute::dashboard::{run_dashboard, DashboardState};
use fleet_distribute::distribution::{
    DistributionJob, Distributor, JobOutcome, JobSpec, JobStatus, TargetLog,
};
use fleet_distribute::notify::WebhookNotifier;
use fleet_distribute::shutdown::{cancel_on_shutdown, install_shutdown_handler};
use fleet_distribute::store::MemoryStore;
use fleet_distribute::transport::CommandTransport;

#[derive(Parser, Debug)]
#[command(name = "fleet-distribute")]
#[command(version)]
#[command(about = "Push build artifacts to fleet nodes in parallel or as a rolling restart")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API for submitting and cancelling jobs
    Serve(ServeArgs),

    /// Run one job spec to completion in the foreground
    Run {
        /// Path to a JSON job spec
        spec: PathBuf,

        /// Identity recorded as the job's creator
        #[arg(long, default_value = "cli")]
        actor: String,

        #[command(flatten)]
        engine: EngineArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Check a job spec and print the order targets would run in
    Validate {
        /// Path to a JSON job spec
        spec: PathBuf,

        /// Pacing applied when the job spec has no interval
        #[arg(long, default_value = "10")]
        default_interval: u64,
    },
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port for the HTTP API
    #[arg(long, default_value = "8080")]
    port: u16,

    #[command(flatten)]
    engine: EngineArgs,

    /// Maximum number of jobs kept in memory
    #[arg(long, default_value = "10000")]
    max_jobs: usize,
}

#[derive(Parser, Debug)]
struct EngineArgs {
    /// Command that pushes the artifact to one target.
    /// Sees DIST_NODE_ID, DIST_UNIT_ID, DIST_ARTIFACT and DIST_OPTIONS.
    #[arg(long, default_value = "true")]
    command: String,

    /// Shell used to run --command
    #[arg(long, default_value = "sh")]
    shell: String,

    /// Kill a push after this many seconds (0 disables the limit)
    #[arg(long, default_value = "300")]
    timeout_secs: u64,

    /// Upper bound on concurrent pushes for parallel jobs
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Pacing between rolling-restart steps when the job spec has no interval
    #[arg(long, default_value = "10")]
    default_interval: u64,

    /// Keep local artifact files after a job finishes
    #[arg(long)]
    keep_artifacts: bool,
}

impl EngineArgs {
    fn transport_config(&self) -> CommandTransportConfig {
        CommandTransportConfig {
            shell: self.shell.clone(),
            command: self.command.clone(),
            timeout_secs: (self.timeout_secs > 0).then_some(self.timeout_secs),
        }
    }

    fn distributor_config(&self) -> DistributorConfig {
        let mut config = DistributorConfig::default()
            .with_default_interval(self.default_interval)
            .with_artifact_cleanup(!self.keep_artifacts);
        if let Some(limit) = self.max_parallel {
            config = config.with_max_parallel_targets(limit);
        }
        config
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct RunOutput<'a> {
    outcome: &'a JobOutcome,
    targets: &'a [TargetLog],
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn build_distributor(config: &ServerConfig) -> Result<Distributor, Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::with_capacity(config.distributor.max_jobs));
    let transport = Arc::new(CommandTransport::new(config.transport.clone()));
    let notifier = Arc::new(WebhookNotifier::new(&config.webhook)?);
    Ok(Distributor::new(
        config.distributor.clone(),
        store,
        transport,
        notifier,
    ))
}

async fn read_spec(path: &Path) -> Result<JobSpec, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let spec = serde_json::from_str(&raw)
        .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
    Ok(spec)
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(args: ServeArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_tracing();

    let listen_addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let mut distributor_config = args.engine.distributor_config();
    distributor_config.max_jobs = args.max_jobs;
    let config = ServerConfig::new(listen_addr)
        .with_distributor(distributor_config)
        .with_transport(args.engine.transport_config());

    tracing::info!(
        listen_addr = %config.listen_addr,
        command = %config.transport.command,
        max_parallel = ?config.distributor.max_parallel_targets,
        "Starting fleet-distribute server"
    );

    let distributor = build_distributor(&config)?;
    let shutdown = install_shutdown_handler()?;

    let server = tokio::spawn(run_dashboard(
        config.listen_addr,
        DashboardState {
            distributor: distributor.clone(),
        },
    ));

    tokio::select! {
        _ = cancel_on_shutdown(shutdown, distributor) => {
            tracing::info!("Shutdown complete");
        }
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server task failed");
            }
            return Ok(ExitCode::FAILURE);
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn handle_run(
    spec_path: PathBuf,
    actor: String,
    engine: EngineArgs,
    output_format: OutputFormat,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_tracing();

    let spec = read_spec(&spec_path).await?;
    let config = ServerConfig::default()
        .with_distributor(engine.distributor_config())
        .with_transport(engine.transport_config());
    let distributor = build_distributor(&config)?;

    let job = DistributionJob::from_spec(spec, &actor, config.distributor.default_interval_secs)?;
    let handle = distributor.run(job).await?;
    let job_id = handle.job_id();

    let shutdown = install_shutdown_handler()?;
    let canceller = distributor.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        if let Err(e) = canceller.cancel(&job_id, &actor).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to cancel job");
        }
    });

    let outcome = handle.wait().await?;
    let targets = distributor.target_logs(&job_id).await?;

    match output_format {
        OutputFormat::Json => {
            let output = RunOutput {
                outcome: &outcome,
                targets: &targets,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job:     {}", outcome.job_id);
            println!("Status:  {}", outcome.status);
            println!(
                "Message: {}",
                outcome.message.as_deref().unwrap_or("-")
            );
            println!();
            println!("{:<30} {:<24} RESULT", "TARGET", "STATUS");
            println!("{}", "-".repeat(78));
            for log in &targets {
                let target = format!("{}@{}", log.unit_id, log.node_id);
                println!(
                    "{:<30} {:<24} {}",
                    target,
                    log.status,
                    log.result.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(if outcome.status == JobStatus::Done {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn handle_validate(
    spec_path: PathBuf,
    default_interval: u64,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let spec = read_spec(&spec_path).await?;
    match DistributionJob::from_spec(spec, "cli", default_interval) {
        Ok(job) => {
            println!(
                "{}: {} targets, policy {}, interval {}s",
                job.name,
                job.targets.len(),
                job.policy,
                job.interval_secs
            );
            for (i, target) in job.targets.iter().enumerate() {
                println!(
                    "{:>4}. {}@{} (sort {})",
                    i + 1,
                    target.unit_id,
                    target.node_id,
                    target.sort_value
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Invalid job spec: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_server(serve_args).await,
        Commands::Run {
            spec,
            actor,
            engine,
            output,
        } => handle_run(spec, actor, engine, output).await,
        Commands::Validate {
            spec,
            default_interval,
        } => handle_validate(spec, default_interval).await,
    }
}
