//! ddbl - run a throwaway DynamoDB Local instance.
//!
//! `ddbl run` launches an instance and tears it down on Ctrl-C or SIGTERM.
//! The same binary doubles as the container supervisor when invoked with the
//! supervisor command token.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ddbl::protocol::{LaunchConfig, SUPERVISOR_COMMAND};
use ddbl::runtime::DockerRuntime;
use ddbl::{Config, DEFAULT_PORT, LaunchError, Orchestrator, SupervisorCommand, supervisor};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "ddbl")]
#[command(version = VERSION)]
#[command(about = "Ephemeral DynamoDB Local instances in Docker")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch an instance and keep it until interrupted
    Run {
        /// Host and service port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Parent directory for instance workspaces
        #[arg(long)]
        temp_root: Option<PathBuf>,

        /// Engine option as key=value (repeatable, replaces the defaults)
        #[arg(short = 'o', long = "option")]
        options: Vec<String>,

        /// Seconds to wait for the port to open
        #[arg(long, default_value_t = 120)]
        readiness_timeout_secs: u64,
    },

    /// Run as container supervisor (internal)
    #[command(name = SUPERVISOR_COMMAND, hide = true)]
    Supervise {
        /// JSON launch configuration
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the supervisor protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("ddbl=info".parse()?))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            port,
            temp_root,
            options,
            readiness_timeout_secs,
        } => {
            let mut config = Config::for_port(port);
            config.supervisor = SupervisorCommand::new(std::env::current_exe()?);
            if let Some(temp_root) = temp_root {
                config.temp_root = temp_root;
            }
            if !options.is_empty() {
                config.options = options;
            }
            config.readiness_timeout = Duration::from_secs(readiness_timeout_secs);
            run(config).await
        }
        Commands::Supervise { config } => supervise(&config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    info!("ddbl v{} starting", VERSION);
    let runtime = Arc::new(DockerRuntime::connect()?);
    let orchestrator = Orchestrator::new(config, runtime);

    let mut instance = match orchestrator.launch().await {
        Ok(instance) => instance,
        Err(LaunchError::ReadinessTimeout {
            port,
            waited,
            mut instance,
        }) => {
            error!(port, ?waited, "Instance not reachable, stopping it");
            instance.stop().await?;
            anyhow::bail!("port {port} not reachable after {waited:?}");
        }
        Err(e) => return Err(e.into()),
    };

    info!(url = %instance.url(), data_dir = %instance.data_dir().display(), "DynamoDB Local ready");
    println!("{}", instance.url());

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    instance.stop().await?;
    info!("Shutdown complete");
    Ok(())
}

async fn supervise(arg: &str) -> Result<()> {
    let config = LaunchConfig::from_arg(arg)?;
    info!(port = config.port, data_dir = %config.data_dir.display(), "Supervisor starting");

    let runtime = Arc::new(DockerRuntime::connect()?);
    let control = BufReader::new(tokio::io::stdin());
    if let Err(e) = supervisor::run(config, runtime, control, tokio::io::stdout()).await {
        error!(error = %e, "Supervisor failed");
        std::process::exit(1);
    }

    info!("Supervisor finished");
    Ok(())
}
