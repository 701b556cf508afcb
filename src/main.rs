use agent_lib::config::{self, AgentConfig};
use agent_lib::{Agent, AgentSources, AgentStatus};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// How often the status snapshot is logged at debug level.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "spiego-agent", version, about = "Spiego activity agent")]
struct Cli {
    /// Configuration file (default: <config dir>/spiego/agent_config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        log::error!("{:#}", e);
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "warn,agent_lib=debug,spiego_agent=debug"
    } else {
        "warn,agent_lib=info,spiego_agent=info"
    };
    // RUST_LOG still wins when set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path().map_err(anyhow::Error::msg)?,
    };
    let config = config::load_config(&config_path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    log::info!("Loaded configuration from {}", config_path.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run_agent(config));
    Ok(())
}

async fn run_agent(config: AgentConfig) {
    let mut agent = Agent::start(&config, AgentSources::default());
    let mut status_ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
    status_ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    log::error!("Could not listen for shutdown signal: {}", e);
                }
                log::info!("Shutdown requested");
                break;
            }
            _ = status_ticker.tick() => log_status(&agent.status(), log::Level::Debug),
        }
    }

    agent.stop().await;
    log_status(&agent.status(), log::Level::Info);
}

fn log_status(status: &AgentStatus, level: log::Level) {
    log::log!(
        level,
        "Status: sent {} events in {} batches, {} in fallback, {} lost, {} queued, \
         {} input signals dropped, last sync {}, last error {}",
        status.events_sent,
        status.batches_sent,
        status.events_in_fallback,
        status.events_lost,
        status.queue_depth,
        status.input_signals_dropped,
        status
            .last_sync_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string()),
        status.last_error.as_deref().unwrap_or("none")
    );
}
