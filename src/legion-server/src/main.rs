//! Legion Server - control plane binary.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use legion_server::{ServerConfig, run_with_shutdown, supervisor};

/// Legion control plane
#[derive(Parser)]
#[command(name = "legion-server")]
#[command(about = "Control plane for supervised legion listeners")]
#[command(version)]
struct Cli {
    /// Log level (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane (default)
    Serve(ServeArgs),

    /// Run one worker under a supervisor
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        id: usize,
    },
}

#[derive(clap::Args, Default)]
struct ServeArgs {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Run in-process without forking workers
    #[arg(long)]
    single: bool,

    /// Number of worker processes (defaults to the CPU count)
    #[arg(short, long)]
    workers: Option<usize>,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

fn load_serve_config(args: &ServeArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::from_env()?,
    };
    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if args.single {
        config.supervisor.workers = Some(1);
    } else if let Some(workers) = args.workers {
        config.supervisor.workers = Some(workers);
    }
    Ok(config)
}

fn load_worker_config() -> anyhow::Result<ServerConfig> {
    match ServerConfig::from_worker_env()? {
        Some(config) => Ok(config),
        None => ServerConfig::from_env(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve(ServeArgs::default()));

    let (loaded, worker_id) = match &command {
        Command::Serve(args) => (load_serve_config(args), None),
        Command::Worker { id } => (load_worker_config(), Some(*id)),
    };

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            setup_logging(cli.log_level.as_deref().unwrap_or("info"), cli.json_logs);
            error!("Failed to load configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // Workers inherit the supervisor's effective logging settings.
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.format = "json".to_string();
    }
    setup_logging(&config.logging.level, config.logging.is_json());

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {:#}", e);
        return ExitCode::FAILURE;
    }

    let result = if worker_id.is_some() || config.worker_count() == 1 {
        info!(listen = %config.listen_addr, ?worker_id, "Starting legion server");
        run_with_shutdown(config, worker_id, shutdown_signal()).await
    } else {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            trigger.cancel();
        });
        supervisor::run(config, token).await
    };

    if let Err(e) = result {
        error!("Server error: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}
