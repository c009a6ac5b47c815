//! blackhole-refresh CLI - replication-safe copy of a MySQL table into a BLACKHOLE shadow.

use blackhole_refresh::{
    ClusterResolver, ConnectionResolver, MigrationOptions, RefreshEngine, RefreshError,
    RefreshSummary, SessionProvider, TopologyCache,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "blackhole-refresh")]
#[command(about = "Replication-safe copy of a MySQL table into a BLACKHOLE shadow table")]
#[command(version)]
struct Cli {
    /// Path to YAML options file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Override topology file location
    #[arg(long)]
    topology_path: Option<PathBuf>,

    /// Override topology cluster name
    #[arg(long)]
    cluster: Option<String>,

    /// Override database holding the table
    #[arg(long)]
    database: Option<String>,

    /// Query returning replica lag in seconds, run on the read-write connection
    #[arg(long)]
    lag_query: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Options that decide which rows are copied. A resume must repeat them.
#[derive(Args, Default)]
struct TableArgs {
    /// Source table to copy
    #[arg(long)]
    table_name: Option<String>,

    /// Column used to order batch windows
    #[arg(long)]
    primary: Option<String>,

    /// Row filter, inserted verbatim after WHERE
    #[arg(long = "where")]
    where_clause: Option<String>,

    /// Rows per batch
    #[arg(long)]
    batch_size: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the table into a fresh shadow table
    Run {
        #[command(flatten)]
        table: TableArgs,

        /// Log CREATE/INSERT/DROP statements instead of executing them
        #[arg(long)]
        dry_run: bool,

        /// Leave the shadow table in place after the copy
        #[arg(long)]
        keep_shadow: bool,

        /// Do not wait for replication to catch up before starting
        #[arg(long)]
        no_start_up_replication_wait: bool,

        /// Cap on the average rows copied per second
        #[arg(long)]
        rows_per_second_cap: Option<u64>,

        /// First batch offset
        #[arg(long)]
        start_offset: Option<u64>,
    },

    /// Continue an interrupted refresh from its state file
    Resume {
        #[command(flatten)]
        table: TableArgs,
    },

    /// Test connections to the cluster
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), RefreshError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    match &cli.command {
        Commands::Run {
            table,
            dry_run,
            keep_shadow,
            no_start_up_replication_wait,
            rows_per_second_cap,
            start_offset,
        } => {
            let mut options = load_options(&cli, table)?;
            options.dry_run |= *dry_run;
            options.keep_shadow |= *keep_shadow;
            options.skip_replication_wait |= *no_start_up_replication_wait;
            if let Some(cap) = rows_per_second_cap {
                options.rows_per_second_cap = Some(*cap);
            }
            if let Some(offset) = start_offset {
                options.start_offset = *offset;
            }
            options.validate()?;

            let resolver = ClusterResolver::new(TopologyCache::new(options.topology_path.clone()));
            let mut engine = RefreshEngine::new(options, resolver);
            if let Some(path) = &cli.state_file {
                engine = engine.with_state_file(path.clone());
            }

            let summary = run_engine(&mut engine).await?;
            print_summary(&summary, cli.output_json)?;
        }

        Commands::Resume { table } => {
            // State file is required for resume
            let state_file = cli.state_file.clone().ok_or_else(|| {
                RefreshError::Config("--state-file is required for resume".to_string())
            })?;
            if !state_file.exists() {
                return Err(RefreshError::Config(format!(
                    "State file not found: {:?}",
                    state_file
                )));
            }

            let options = load_options(&cli, table)?;
            options.validate()?;

            let resolver = ClusterResolver::new(TopologyCache::new(options.topology_path.clone()));
            let mut engine = RefreshEngine::new(options, resolver)
                .with_state_file(state_file)
                .resume()?;

            info!("Resuming from previous state");
            let summary = run_engine(&mut engine).await?;
            print_summary(&summary, cli.output_json)?;
        }

        Commands::HealthCheck => {
            let options = load_options(&cli, &TableArgs::default())?;
            let set = ClusterResolver::new(TopologyCache::new(options.topology_path.clone()))
                .resolve(&options.cluster, &options.database)
                .await?;
            let result = set.health_check().await;
            set.close().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results ({}/{}):", result.cluster, result.database);
                println!(
                    "  Read-write: {} ({}ms)",
                    if result.read_write_connected { "OK" } else { "FAILED" },
                    result.read_write_latency_ms
                );
                if let Some(ref err) = result.read_write_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Read-only: {} ({}ms)",
                    if result.read_only_connected { "OK" } else { "FAILED" },
                    result.read_only_latency_ms
                );
                if let Some(ref err) = result.read_only_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(RefreshError::connection(
                    "health check failed",
                    format!("cluster {}", result.cluster),
                ));
            }
        }
    }

    Ok(())
}

/// Options from the file (if any) with command-line overrides applied.
fn load_options(cli: &Cli, table: &TableArgs) -> Result<MigrationOptions, RefreshError> {
    let mut options = match &cli.config {
        Some(path) => {
            let options = MigrationOptions::load_unvalidated(path)?;
            info!("Loaded options from {:?}", path);
            options
        }
        None => {
            let database = cli.database.clone().ok_or_else(|| {
                RefreshError::Config("--database is required without --config".to_string())
            })?;
            MigrationOptions::new(table.table_name.clone().unwrap_or_default(), database)
        }
    };

    if let Some(name) = &table.table_name {
        options.table = name.clone();
    }
    if let Some(primary) = &table.primary {
        options.primary = primary.clone();
    }
    if let Some(clause) = &table.where_clause {
        options.where_clause = Some(clause.clone());
    }
    if let Some(size) = table.batch_size {
        options.batch_size = size;
    }
    if let Some(database) = &cli.database {
        options.database = database.clone();
    }
    if let Some(cluster) = &cli.cluster {
        options.cluster = cluster.clone();
    }
    if let Some(path) = &cli.topology_path {
        options.topology_path = path.clone();
    }
    if let Some(query) = &cli.lag_query {
        options.throttle.lag_query = query.clone();
    }

    Ok(options)
}

/// Run the engine; on failure print where it stopped before returning the error.
async fn run_engine(
    engine: &mut RefreshEngine<ClusterResolver>,
) -> Result<RefreshSummary, RefreshError> {
    match engine.run().await {
        Ok(summary) => Ok(summary),
        Err(e) => {
            eprintln!("Refresh failed: {}", engine.progress().describe());
            Err(e)
        }
    }
}

fn print_summary(summary: &RefreshSummary, output_json: bool) -> Result<(), RefreshError> {
    if output_json {
        println!("{}", summary.to_json()?);
        return Ok(());
    }

    let status_msg = if summary.dry_run { "Dry run completed!" } else { "Refresh completed!" };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", summary.run_id);
    println!("  Table: {} -> {}", summary.table, summary.shadow_table);
    println!("  Duration: {:.2}s", summary.duration_seconds);
    println!("  Rows: {}/{}", summary.rows_copied, summary.rows_total);
    println!("  Batches: {}", summary.batches);
    println!("  Throughput: {} rows/sec", summary.rows_per_second);
    if summary.shadow_kept {
        println!("  Shadow table kept: {}", summary.shadow_table);
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
