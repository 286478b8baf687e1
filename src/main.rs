//! GolfRecs harvest main entry point
//!
//! This is the command-line interface for the course, user and review
//! ingestion pipeline.

use anyhow::{bail, Context};
use clap::Parser;
use golfrecs_harvest::config::{load_config_with_hash, Config};
use golfrecs_harvest::harvest::discover_courses;
use golfrecs_harvest::output::{load_statistics, print_run_report, print_statistics};
use golfrecs_harvest::pipeline::{
    split_shards, Orchestrator, ProcessExecutor, ShardAssignment, ShardWorker,
};
use golfrecs_harvest::session::SessionPool;
use golfrecs_harvest::storage::{open_storage, SequenceCounter, SqliteCounter, StorageError};
use golfrecs_harvest::EntityClass;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

/// GolfRecs harvest: course, user and review ingestion
///
/// Discovers course pages from the site's sitemap, harvests every course and
/// its review pages through a pool of proxy circuits, and writes the merged
/// documents with stable integer IDs.
#[derive(Parser, Debug)]
#[command(name = "golfrecs-harvest")]
#[command(version = "1.0.0")]
#[command(about = "Course, user and review ingestion for GolfRecs", long_about = None)]
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

    /// Validate config and show the harvest plan without fetching anything
    #[arg(long, conflicts_with_all = ["stats", "bootstrap"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "bootstrap"])]
    stats: bool,

    /// Create and seed the sequence counters, then exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    bootstrap: bool,

    /// Harvest the course URLs listed in FILE instead of the sitemap
    #[arg(long, value_name = "FILE")]
    courses: Option<PathBuf>,

    /// Re-harvest courses that are already stored
    #[arg(long)]
    refresh: bool,

    /// Run as a shard child process (assignment on stdin, outcome on stdout)
    #[arg(long, value_name = "INDEX", hide = true)]
    shard: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
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

    if let Some(index) = cli.shard {
        handle_shard(&config, index).await
    } else if cli.dry_run {
        handle_dry_run(&config, cli.courses.as_deref())
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.bootstrap {
        handle_bootstrap(&config)
    } else {
        handle_harvest(&cli, config, &config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs always go to stderr; stdout of a shard child carries its result.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("golfrecs_harvest=info,warn"),
            1 => EnvFilter::new("golfrecs_harvest=debug,info"),
            2 => EnvFilter::new("golfrecs_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Verbosity flags forwarded to shard children
fn child_args(cli: &Cli) -> Vec<String> {
    if cli.quiet {
        vec!["--quiet".to_string()]
    } else if cli.verbose > 0 {
        vec![format!("-{}", "v".repeat(cli.verbose as usize))]
    } else {
        Vec::new()
    }
}

/// Handles the --dry-run mode: validates config and shows the plan
fn handle_dry_run(config: &Config, courses: Option<&Path>) -> anyhow::Result<()> {
    println!("=== GolfRecs Harvest Dry Run ===\n");

    println!("Harvest Configuration:");
    println!("  Sitemap: {}", config.harvest.sitemap_url);
    println!("  Sitemap pages: {}", config.harvest.sitemap_pages);
    println!("  Threads per shard: {}", config.harvest.threads_per_shard);
    println!("  Reviews per page: {}", config.harvest.reviews_per_page);
    match config.harvest.batch_size {
        0 => println!("  Batch size: unbounded"),
        n => println!("  Batch size: {}", n),
    }
    println!("  Skip stored courses: {}", config.harvest.skip_known_courses);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nCircuits ({}):", config.circuits.len());
    for (index, circuit) in config.circuits.iter().enumerate() {
        let control = circuit
            .control_address
            .as_deref()
            .or(config.tor.control_address.as_deref())
            .unwrap_or("none");
        println!(
            "  [{}] proxy {} (control: {})",
            index,
            circuit.proxy.as_deref().unwrap_or("direct"),
            control
        );
    }
    println!(
        "  Rotation interval: {}ms, rotate after {} requests",
        config.tor.rotation_interval, config.tor.rotate_after_requests
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    if let Some(path) = courses {
        let urls = read_course_list(path)?;
        println!("\nCourse list {} ({} URLs):", path.display(), urls.len());
        for shard in split_shards(&urls, config.circuits.len()) {
            println!("  shard {}: {} courses", shard.index, shard.urls.len());
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would harvest across {} shards",
        config.circuits.len()
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --bootstrap mode: creates missing counters
fn handle_bootstrap(config: &Config) -> anyhow::Result<()> {
    let path = Path::new(&config.output.database_path);
    let counter = SqliteCounter::open(path)
        .with_context(|| format!("opening counters in {}", path.display()))?;

    for (entity, seq) in counter.bootstrap()? {
        println!("{}: next ID {}", entity, seq + 1);
    }

    Ok(())
}

/// Handles the --shard mode: harvests one shard for the parent process
async fn handle_shard(config: &Config, index: usize) -> anyhow::Result<()> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("reading shard assignment")?;
    let assignment: ShardAssignment =
        serde_json::from_str(&input).context("parsing shard assignment")?;
    if assignment.index != index {
        bail!(
            "assignment is for shard {} but this is shard {}",
            assignment.index,
            index
        );
    }

    let pool = SessionPool::from_config(config)?;
    let worker = ShardWorker::new(index, pool.acquire(index)?, &config.harvest);
    let outcome = worker.run(assignment.urls).await;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&serde_json::to_vec(&outcome)?).await?;
    stdout.flush().await?;

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(cli: &Cli, config: Config, config_hash: &str) -> anyhow::Result<()> {
    let path = Path::new(&config.output.database_path);
    let mut storage = open_storage(path)?;
    let counter = SqliteCounter::open(path)?;

    // Refuse to scrape anything if IDs could not be allocated afterwards
    for entity in EntityClass::counted() {
        if counter.current(entity)?.is_none() {
            return Err(StorageError::CounterMissing(entity).into());
        }
    }

    let urls = match &cli.courses {
        Some(file) => read_course_list(file)?,
        None => {
            let pool = SessionPool::from_config(&config)?;
            discover_courses(
                &pool,
                &config.harvest.sitemap_url,
                config.harvest.sitemap_pages,
            )
            .await
        }
    };
    if urls.is_empty() {
        tracing::warn!("No course URLs to harvest");
        return Ok(());
    }

    let executor = ProcessExecutor::current(&cli.config)?.with_args(child_args(cli));
    let orchestrator = Orchestrator::new(executor, config.circuits.len(), &config.harvest)
        .refresh(cli.refresh);

    match orchestrator.run(urls, &mut storage, &counter, config_hash).await {
        Ok(report) => {
            print_run_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}

/// Reads newline-separated course URLs, ignoring blanks and `#` comments
fn read_course_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading course list {}", path.display()))?;

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
