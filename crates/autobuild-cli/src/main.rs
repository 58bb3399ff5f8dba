use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use autobuild_core::{
    ConfigError, EngineConfig, LiveProvisioner, ProvisionError, ProvisionReport, ProvisionRequest,
    Provisioner, RequestError,
};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod server;

use server::{AppState, SUCCESS_MESSAGE};

#[derive(Debug, Parser)]
#[command(name = "autobuild")]
#[command(about = "Provision an ECR repository and a templated GitHub repository", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision repositories for one project and exit
    Provision {
        name: String,
        /// Repository description; words are joined with spaces
        description: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Serve the create-repo HTTP endpoint
    Serve {
        /// Overrides AUTOBUILD_LISTEN
        #[arg(long)]
        listen: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("AUTOBUILD_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("autobuild=debug,autobuild_core=debug")
        } else {
            EnvFilter::new("autobuild=info,autobuild_core=info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .init();

    if let Err(err) = run(cli.command) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Provision {
            name,
            description,
            json,
        } => {
            let request = ProvisionRequest::new(name, description.join(" "))?;
            let config = EngineConfig::from_env()?;
            let report = LiveProvisioner::new(config).provision(&request)?;
            print_report(&report, json)
        }
        Commands::Serve { listen } => serve(listen),
    }
}

fn print_report(report: &ProvisionReport, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{SUCCESS_MESSAGE}");
    println!("Repository: {}", report.name);
    println!("Description: {}", report.description);
    for record in &report.steps {
        println!("  {} ({} ms)", record.step.action(), record.elapsed_ms);
    }
    Ok(())
}

fn serve(listen: Option<String>) -> Result<(), CliError> {
    let config = EngineConfig::from_env()?;
    let listen = listen.unwrap_or_else(|| config.listen.clone());
    let addr: SocketAddr = listen
        .parse()
        .map_err(|_| CliError::InvalidListen(listen.clone()))?;

    let state = AppState::new(Arc::new(LiveProvisioner::new(config)));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "server is starting");
        axum::serve(listener, server::router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("server stopped");
        Ok::<_, CliError>(())
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("invalid listen address {0:?}")]
    InvalidListen(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}
