use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tiergate::{
    LimitCatalog, Metering, StaticLimitCatalog, Tier, TiergateConfig,
    models::PeriodKind,
    observability::{init_metrics, init_tracing, render_metrics},
    period::current_period,
    store,
};

/// Exit code for a denied `consume`.
const EXIT_DENIED: i32 = 2;

/// CLI arguments for tiergate
#[derive(Parser, Debug)]
#[command(version, about = "Usage metering and tier-based quota enforcement", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (built-in defaults with in-memory counters when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Write the metrics recorded by this run to stderr in Prometheus text
    /// format (needs metrics enabled without `listen_addr`)
    #[arg(long, global = true)]
    print_metrics: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Check and count one action; exits 2 when denied
    Consume {
        #[arg(short, long)]
        user: String,
        /// Action name, e.g. chat_query
        #[arg(short, long)]
        action: String,
        #[arg(short, long)]
        tier: Tier,
    },
    /// Print the counters of one window
    Read {
        #[arg(short, long)]
        user: String,
        /// daily or monthly
        #[arg(short, long, default_value = "daily")]
        period: PeriodKind,
        /// Instant inside the window to read (RFC 3339, defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Print per-action usage and warnings for a user
    Stats {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        tier: Tier,
    },
    /// Print the effective limit tables
    Limits {
        /// Only this tier
        #[arg(short, long)]
        tier: Option<Tier>,
    },
    /// Run database migrations and exit
    Migrate,
    /// Check that the counter store is reachable
    Health,
}

#[derive(Serialize)]
struct WindowCounts {
    user_id: String,
    period: tiergate::Period,
    counts: tiergate::Counters,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(args.config.as_deref());

    if let Err(e) = init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = init_metrics(&config.observability.metrics) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let code = run(args.command, &config).await;

    if args.print_metrics {
        match render_metrics() {
            Some(rendered) => eprint!("{}", rendered),
            None => eprintln!(
                "Warning: no local metrics recorder; set observability.metrics.enabled = true without listen_addr"
            ),
        }
    }

    std::process::exit(code);
}

/// Run one subcommand and return the process exit code.
async fn run(command: Command, config: &TiergateConfig) -> i32 {
    match command {
        Command::Consume { user, action, tier } => {
            let metering = connect(config).await;
            let decision = metering
                .engine()
                .check_and_consume_named(&user, &action, tier)
                .await;
            print_json(&decision);
            if decision.allowed { 0 } else { EXIT_DENIED }
        }
        Command::Read { user, period, at } => {
            let metering = connect(config).await;
            let at = at.unwrap_or_else(|| metering.store().now());
            let counts = metering.store().read_at(&user, period, at).await;
            print_json(&WindowCounts {
                user_id: user,
                period: current_period(period, at),
                counts,
            });
            0
        }
        Command::Stats { user, tier } => {
            let metering = connect(config).await;
            print_json(&metering.reporter().stats(&user, tier).await);
            0
        }
        Command::Limits { tier } => {
            run_limits(config, tier);
            0
        }
        Command::Migrate => run_migrate(config).await,
        Command::Health => run_health(config).await,
    }
}

fn load_config(path: Option<&str>) -> TiergateConfig {
    let Some(path) = path else {
        return TiergateConfig::default();
    };
    match TiergateConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

async fn connect(config: &TiergateConfig) -> Metering {
    match Metering::from_config(config).await {
        Ok(metering) => metering,
        Err(e) => {
            tracing::error!(
                error = %e,
                backend = config.storage.backend_name(),
                "Failed to connect to counter store"
            );
            eprintln!("Error: Failed to connect to counter store: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: Failed to serialize output: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_limits(config: &TiergateConfig, only: Option<Tier>) {
    let catalog = StaticLimitCatalog::with_overrides(&config.tiers);
    let tables: BTreeMap<_, _> = Tier::ALL
        .iter()
        .filter(|tier| only.is_none_or(|t| t == **tier))
        .filter_map(|tier| catalog.limits(*tier).map(|limits| (*tier, limits.clone())))
        .collect();
    print_json(&tables);
}

/// Apply SQL migrations without starting anything else.
///
/// Returns exit code 0 on success, 1 on failure.
async fn run_migrate(config: &TiergateConfig) -> i32 {
    tracing::info!(
        backend = config.storage.backend_name(),
        "Running counter store migrations"
    );

    match store::run_migrations(&config.storage).await {
        Ok(true) => {
            tracing::info!("Counter store migrations completed successfully");
            0
        }
        Ok(false) => {
            eprintln!(
                "Error: The {} backend has no schema. Nothing to migrate.",
                config.storage.backend_name()
            );
            1
        }
        Err(e) => {
            tracing::error!(error = %e, "Counter store migrations failed");
            eprintln!("Error: Counter store migrations failed: {}", e);
            1
        }
    }
}

async fn run_health(config: &TiergateConfig) -> i32 {
    let metering = connect(config).await;
    let backend = metering.store().backend();
    match backend.health_check().await {
        Ok(()) => {
            print_json(&serde_json::json!({
                "backend": backend.backend_name(),
                "status": "ok",
            }));
            0
        }
        Err(e) => {
            tracing::error!(error = %e, backend = backend.backend_name(), "Health check failed");
            print_json(&serde_json::json!({
                "backend": backend.backend_name(),
                "status": "unavailable",
                "error": e.to_string(),
            }));
            1
        }
    }
}
