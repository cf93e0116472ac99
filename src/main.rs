//! Download-Census main entry point
//!
//! This is the command-line interface for the download-count harvester. Each
//! invocation executes one phase of the current release cycle.

use clap::Parser;
use download_census::build::resolve_cycle;
use download_census::config::{
    load_config_with_hash, month_cycle_name, validate_cycle_name, Config,
};
use download_census::output::summarize_outcome;
use download_census::run_invocation;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Download-Census: a resumable download-count harvester
///
/// Every invocation loads the cycle checkpoint, performs one phase
/// (initialize, fetch, merge or publish) and saves the checkpoint again.
/// Run it periodically until the cycle reports `done`.
#[derive(Parser, Debug)]
#[command(name = "download-census")]
#[command(version)]
#[command(about = "A resumable download-count harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Release cycle to work on (overrides the config)
    #[arg(long, value_name = "NAME")]
    cycle: Option<String>,

    /// Validate config and show the phase the next run would execute
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show cycle progress from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let cycle_override = cli.cycle.as_deref();

    if cli.dry_run {
        handle_dry_run(&config, cycle_override)?;
    } else if cli.stats {
        handle_stats(&config, cycle_override)?;
    } else {
        handle_invocation(config, cycle_override, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("download_census=info,warn"),
            1 => EnvFilter::new("download_census=debug,info"),
            2 => EnvFilter::new("download_census=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the next phase
fn handle_dry_run(
    config: &Config,
    cycle_override: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    use download_census::storage::{CheckpointStore, SqliteStorage};
    use download_census::Phase;

    println!("=== Download-Census Dry Run ===\n");

    println!("API:");
    println!("  Base URL: {}", config.api.base_url);
    println!("  Range: {}", config.api.range);
    println!("  User agent: {}", config.api.user_agent);

    println!("\nFetcher:");
    println!("  Workers: {}", config.fetcher.worker_count);
    println!(
        "  Min request interval: {}ms",
        config.fetcher.min_request_interval_ms
    );
    println!(
        "  Batch size: {} (split floor {})",
        config.fetcher.batch_size, config.fetcher.min_split_size
    );
    println!("  Query budget: {}", config.fetcher.query_budget);
    println!(
        "  Max unexpected errors: {}",
        config.fetcher.max_unexpected_errors
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Artifact: {}", config.storage.artifact_path);
    println!("  Names: {}", config.names.path.display());
    println!("  Publish command: {}", config.publish.command.join(" "));

    // Do not create a database just to look at it
    let db_path = Path::new(&config.storage.database_path);
    let (cycle, phase) = if db_path.exists() {
        let storage = SqliteStorage::new(db_path)?;
        let cycle = resolve_cycle(config, cycle_override, &storage)?;
        let phase = Phase::of(storage.load(&cycle)?.as_ref());
        (cycle, phase)
    } else {
        let cycle = config
            .explicit_cycle_name(cycle_override)
            .unwrap_or_else(month_cycle_name);
        validate_cycle_name(&cycle)?;
        (cycle, Phase::Init)
    };

    println!("\n✓ Configuration is valid");
    println!("✓ Cycle {}: next invocation would run phase {}", cycle, phase);

    Ok(())
}

/// Handles the --stats mode: shows cycle progress from the database
fn handle_stats(
    config: &Config,
    cycle_override: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    use download_census::output::{load_statistics, print_statistics};
    use download_census::storage::SqliteStorage;

    println!("Database: {}\n", config.storage.database_path);

    let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?;
    let cycle = resolve_cycle(config, cycle_override, &storage)?;
    let stats = load_statistics(&storage, &cycle)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles one invocation of the build cycle
async fn handle_invocation(
    config: Config,
    cycle_override: Option<&str>,
    config_hash: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match run_invocation(config, cycle_override, config_hash).await {
        Ok(outcome) => {
            tracing::info!("{}", summarize_outcome(&outcome));
            Ok(())
        }
        Err(e) if e.is_error_ceiling() => {
            tracing::error!("{}; no shard or checkpoint was written", e);
            Err(e.into())
        }
        Err(e) => {
            tracing::error!("Invocation failed: {}", e);
            Err(e.into())
        }
    }
}
