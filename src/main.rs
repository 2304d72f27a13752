use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use reco::config::{ClientConfig, RelayConfig, RetryPolicy};
use reco::job::{JobQuery, JobRecord, JobStatus, JobType};
use reco::shutdown::install_shutdown_handler;
use reco::{HttpJobApi, JobFollower, RecoError, Relay, StatusTracker};

#[derive(Parser, Debug)]
#[command(name = "reco")]
#[command(version)]
#[command(about = "Follow builds, simulations and deployments on the build service")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    client: ClientArgs,

    #[command(subcommand)]
    command: Commands,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct ClientArgs {
    /// Platform server address (overrides PLATFORM_SERVER)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Dashboard API key (overrides RECO_USER/RECO_TOKEN)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Seconds between status polls
    #[arg(long, global = true, default_value = "10")]
    interval: u64,

    /// Give up waiting after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

// =============================================================================
// Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Show the current status of a job
    Status {
        /// build, simulation or deployment
        job_type: JobType,
        job_id: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List jobs of one kind, newest first
    List {
        job_type: JobType,
        /// Only show jobs with this status
        #[arg(long)]
        status: Option<String>,
        /// Show at most this many jobs
        #[arg(long)]
        limit: Option<usize>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Wait until a job reaches a status
    Wait {
        job_type: JobType,
        job_id: String,
        /// Status to wait for
        #[arg(long, default_value = "STARTED")]
        target: String,
    },
    /// Stream a job's logs
    Log {
        job_type: JobType,
        job_id: String,
        /// Wait for the job to start before streaming
        #[arg(short, long)]
        wait: bool,
    },
    /// Stop a job
    Stop { job_type: JobType, job_id: String },
    /// Relay a local port to a running deployment
    Connect {
        deployment_id: String,
        /// Port on the instance
        #[arg(long, default_value = "80")]
        port: u16,
    },
}

#[derive(Serialize)]
struct JobStatusOutput {
    job_id: String,
    status: String,
    started_at: Option<String>,
    duration_secs: Option<i64>,
    project: Option<String>,
    build: Option<String>,
    ip_address: Option<String>,
}

impl From<&JobRecord> for JobStatusOutput {
    fn from(record: &JobRecord) -> Self {
        let derived = record.derived();
        Self {
            job_id: record.id.clone(),
            status: derived.status.to_string(),
            started_at: derived.started_at.map(|t| t.to_rfc3339()),
            duration_secs: derived.duration.map(|d| d.num_seconds()),
            project: record.project.clone(),
            build: record.build.clone(),
            ip_address: record.ip_address.clone(),
        }
    }
}

#[derive(Serialize)]
struct JobListOutput {
    jobs: Vec<JobStatusOutput>,
    total_count: usize,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn client_config(args: &ClientArgs) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = ClientConfig::from_env();
    if let Some(server) = &args.server {
        config = ClientConfig::new(server).with_credentials(&config.username, &config.token);
    }
    if let Some(key) = &args.api_key {
        config = config.with_api_key(key)?;
    }
    Ok(config)
}

fn retry_policy(args: &ClientArgs) -> RetryPolicy {
    let policy = RetryPolicy::default().with_interval(Duration::from_secs(args.interval));
    match args.timeout {
        Some(secs) => policy.with_deadline(Duration::from_secs(secs)),
        None => policy,
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_status(
    tracker: &StatusTracker,
    job_type: JobType,
    job_id: String,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = tracker.fetch(job_type, &job_id).await?;
    let derived = record.derived();

    if json {
        let output = JobStatusOutput::from(&record);
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Job ID:    {}", record.id);
    println!("Status:    {}", derived.status);
    if let Some(started) = derived.started_at {
        println!("Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    match derived.duration {
        Some(d) => println!("Duration:  {}s", d.num_seconds()),
        None => println!("Duration:  -"),
    }
    if let Some(project) = &record.project {
        println!("Project:   {}", project);
    }
    if let Some(ip) = &record.ip_address {
        println!("Address:   {}", ip);
    }
    Ok(())
}

async fn handle_list(
    tracker: &StatusTracker,
    job_type: JobType,
    query: JobQuery,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = tracker.list(job_type, &query).await?;

    if json {
        let output = JobListOutput {
            total_count: jobs.len(),
            jobs: jobs.iter().map(JobStatusOutput::from).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No {}s found.", job_type);
        return Ok(());
    }
    for job in &jobs {
        let derived = job.derived();
        let started = derived
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let duration = derived
            .duration
            .map(|d| format!("{}s", d.num_seconds()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<14} {:<20} {}",
            job.id,
            derived.status.to_upper(),
            started,
            duration
        );
    }
    Ok(())
}

async fn handle_connect(
    follower: &JobFollower,
    deployment_id: String,
    port: u16,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    follower
        .tracker()
        .wait_for_status(JobType::Deployment, &deployment_id, &JobStatus::Started, cancel)
        .await?;
    let remote = follower
        .wait_for_instance(&deployment_id, port, cancel)
        .await?;

    let relay = Relay::new(remote, RelayConfig::default());
    let local = relay.start().await?;
    eprintln!("Deployment reachable at http://{}/ (Ctrl-C to stop)", local);

    tokio::select! {
        _ = cancel.cancelled() => relay.stop().await?,
        _ = relay.wait() => {}
    }

    if let Some(e) = relay.info().await.error {
        return Err(RecoError::ProxyAccept(e).into());
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let api = HttpJobApi::new(client_config(&args.client)?);
    let tracker = StatusTracker::new(Arc::new(api), retry_policy(&args.client));
    let follower = JobFollower::new(tracker.clone());
    let cancel = install_shutdown_handler();

    match args.command {
        Commands::Status {
            job_type,
            job_id,
            json,
        } => {
            handle_status(&tracker, job_type, job_id, json).await?;
        }
        Commands::List {
            job_type,
            status,
            limit,
            json,
        } => {
            let mut query = JobQuery::new();
            if let Some(status) = status {
                query = query.with_status(JobStatus::from(status.as_str()));
            }
            if let Some(limit) = limit {
                query = query.with_limit(limit);
            }
            handle_list(&tracker, job_type, query, json).await?;
        }
        Commands::Wait {
            job_type,
            job_id,
            target,
        } => {
            let target = JobStatus::from(target.as_str());
            tracker
                .wait_for_status(job_type, &job_id, &target, &cancel)
                .await?;
        }
        Commands::Log {
            job_type,
            job_id,
            wait,
        } => {
            if wait {
                follower
                    .wait_and_log(job_type, &job_id, &mut tokio::io::stderr(), &cancel)
                    .await?;
            } else {
                follower
                    .log(job_type, &job_id, &mut tokio::io::stderr())
                    .await?;
            }
        }
        Commands::Stop { job_type, job_id } => {
            follower.stop(job_type, &job_id).await?;
            println!("{} {} stopped", job_type, job_id);
        }
        Commands::Connect {
            deployment_id,
            port,
        } => {
            handle_connect(&follower, deployment_id, port, &cancel).await?;
        }
    }

    Ok(())
}
