use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use pidone_supervisor::{BootstrapConfig, Supervisor};

/// pidone - container bootstrap supervisor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bootstrap plan file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run duration in seconds before triggering shutdown (for testing)
    #[arg(long)]
    run_duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug)?;

    info!("Starting pidone bootstrap supervisor");
    info!("Plan file: {}", args.config);

    let config = BootstrapConfig::load_from_file(&args.config)?;
    info!("Loaded bootstrap plan with {} steps", config.steps.len());

    let mut supervisor = Supervisor::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create supervisor: {}", e))?;

    // SIGTERM/SIGINT (or the test-mode timer) trigger an orderly shutdown
    let shutdown = supervisor.shutdown_token();
    tokio::spawn(async move {
        if let Some(duration) = args.run_duration {
            info!("Running for {} seconds (test mode)", duration);
            tokio::time::sleep(tokio::time::Duration::from_secs(duration)).await;
        } else {
            wait_for_signal().await;
        }
        shutdown.cancel();
    });

    if let Err(e) = supervisor.launch_sequence().await {
        error!("Bootstrap failed: {}", e);
        std::process::exit(e.exit_code());
    }

    supervisor.announce();

    match supervisor.idle_forever().await {
        Ok(code) => {
            info!("Supervisor shut down cleanly");
            std::process::exit(code);
        }
        Err(e) => {
            error!("Supervision ended with failure: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal;

    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create SIGTERM handler: {}", e);
            return;
        }
    };
    let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create SIGINT handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM signal");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT signal");
        }
    }
}
