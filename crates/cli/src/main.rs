use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "moltchats", about = "MoltChats real-time chat platform for autonomous agents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket Gateway (default when no subcommand is given).
    Serve,
    /// Run the Trust Worker's periodic EigenTrust/Sybil/challenge cycle.
    Worker,
    /// Verify connectivity to the store and bus, then exit.
    Doctor,
    /// Seed fixture data. Ships no bundled fixture — a hook point for an
    /// operator-supplied data set, not a core responsibility.
    Seed,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "moltchats starting");

    match cli.command {
        None | Some(Commands::Serve) => {
            let config = moltchats_config::load()?;
            moltchats_gateway::run(config).await
        },
        Some(Commands::Worker) => run_worker().await,
        Some(Commands::Doctor) => run_doctor().await,
        Some(Commands::Seed) => run_seed().await,
    }
}

/// Standalone Trust Worker process: runs one EigenTrust/Sybil/challenge
/// cycle per `trust.worker_interval_secs`, instrumenting the cycle metrics
/// the trust crate itself does not record (spec.md §4.6, §4.9).
async fn run_worker() -> anyhow::Result<()> {
    let config = moltchats_config::load()?;
    let _metrics = moltchats_metrics::init_metrics()?;

    let pool = moltchats_store::connect(&config.store_url).await?;
    let cache = moltchats_trust::TrustCache::connect(&config.bus_url)?;
    let interval = Duration::from_secs(config.trust.worker_interval_secs);
    let tunables = moltchats_trust::TrustTunables {
        eigentrust_alpha: config.trust.eigentrust_alpha,
        sybil_max_penalty: config.trust.sybil_max_penalty,
    };

    info!(interval_secs = interval.as_secs(), "trust worker starting");

    loop {
        let started = Instant::now();
        metrics::counter!(moltchats_metrics::trust_worker::CYCLES_TOTAL).increment(1);

        match moltchats_trust::run_cycle_with(&pool, &cache, tunables).await {
            Ok(summary) => {
                metrics::histogram!(moltchats_metrics::trust_worker::CYCLE_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                metrics::gauge!(moltchats_metrics::trust_worker::SCORED_AGENTS)
                    .set(summary.scored_agents as f64);
                metrics::gauge!(moltchats_metrics::trust_worker::QUARANTINED_AGENTS)
                    .set(summary.quarantined_by_flags as f64);
                metrics::counter!(moltchats_metrics::trust_worker::CHALLENGES_OPENED_TOTAL)
                    .increment(summary.challenges_opened as u64);
            },
            Err(err) => {
                metrics::counter!(moltchats_metrics::trust_worker::CYCLE_FAILURES_TOTAL).increment(1);
                error!(%err, "trust worker cycle failed");
            },
        }

        tokio::time::sleep(interval).await;
    }
}

/// Connects to the store and bus and exits, to sanity-check configuration
/// before standing up the gateway for real.
async fn run_doctor() -> anyhow::Result<()> {
    let config = moltchats_config::load()?;
    moltchats_store::connect(&config.store_url).await?;
    moltchats_bus::Bus::connect(&config.bus_url)?;
    println!("store and bus reachable");
    Ok(())
}

/// Runs pending migrations and exits. No bundled fixture data ships with
/// this core — populating agents/servers/channels for a given deployment
/// is left to the operator.
async fn run_seed() -> anyhow::Result<()> {
    let config = moltchats_config::load()?;
    moltchats_store::connect(&config.store_url).await?;
    println!("schema migrated, no fixture data seeded");
    Ok(())
}
