//! sqlite-pg-migrate CLI - idempotent SQLite to PostgreSQL migration.

use clap::{Parser, Subcommand};
use sqlite_pg_migrate::{health_check, Config, MigrateError, MigrationResult, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "sqlite-pg-migrate")]
#[command(about = "Idempotent SQLite to PostgreSQL migration of the movie catalogue")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every configured table
    Run {
        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Dry run: resolve tables and row counts without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
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

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            batch_size,
            dry_run,
        } => {
            if let Some(size) = batch_size {
                config.migration.batch_size = size;
                config.validate()?;
            }

            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.run(dry_run).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_summary(&result, dry_run);
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.validate().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Row counts:");
                for table in &report.tables {
                    println!(
                        "  {} {}: source={}, target={}",
                        if table.matches { "✓" } else { "✗" },
                        table.table,
                        table.source_count,
                        table.target_count
                    );
                }
                if report.is_consistent() {
                    println!("\nAll tables consistent");
                } else {
                    println!("\n{} table(s) inconsistent", report.mismatches().count());
                }
            }
        }

        Commands::HealthCheck => {
            let result = health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (SQLite): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn print_summary(result: &MigrationResult, dry_run: bool) {
    let status_msg = if dry_run {
        "Dry run completed!"
    } else {
        "Migration completed!"
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Tables: {} migrated, {} skipped, {} total",
        result.tables_completed, result.tables_skipped, result.tables_total
    );
    for outcome in &result.tables {
        match (outcome.skip_reason, outcome.target_rows) {
            (Some(reason), _) => println!("    {}: skipped ({:?})", outcome.table, reason),
            (None, Some(target)) => println!(
                "    {}: {} read, {} inserted, {} in target",
                outcome.table, outcome.rows_migrated, outcome.rows_inserted, target
            ),
            (None, None) => println!("    {}: {} rows in source", outcome.table, outcome.source_rows),
        }
    }
    println!("  Rows: {}", result.rows_transferred);
    println!("  Throughput: {} rows/sec", result.rows_per_second);

    let mismatched: Vec<&str> = result
        .consistency
        .mismatches()
        .map(|t| t.table.as_str())
        .collect();
    if !mismatched.is_empty() {
        println!("  Inconsistent tables: {:?}", mismatched);
    }
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
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
