use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use quarry_client::SourceFactory;
use quarry_core::config::{ConfigLoader, FetcherKind, ScrapeConfig};
use quarry_core::models::{Bucket, RunOutcome};
use quarry_core::processor::ProcessorRegistry;
use quarry_core::runner::{Runner, TracingRunReporter};
use quarry_db::{Database, DatabaseConfig, RecordRepository};

#[derive(Parser)]
#[command(name = "quarry", version, about = "Declarative instruction-driven scraper")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more scraper configurations concurrently
    Run {
        /// Scraper configuration files (.json or .toml)
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        /// Write results to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Skip persistence even when DATABASE_URL is set
        #[arg(long, default_value_t = false)]
        no_database: bool,

        /// Load and validate only, do not fetch anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Validate scraper configurations
    Validate {
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },

    /// List the available field processors
    Processors,

    /// List the available fetcher types
    Fetchers,

    /// Show persisted records of a scraper
    History {
        /// Scraper name (`meta.name`)
        scraper: String,

        /// Only show one bucket
        #[arg(short, long, value_enum)]
        bucket: Option<BucketArg>,

        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum BucketArg {
    Events,
    Markets,
    Selections,
    Other,
}

impl From<BucketArg> for Bucket {
    fn from(arg: BucketArg) -> Self {
        match arg {
            BucketArg::Events => Bucket::Events,
            BucketArg::Markets => Bucket::Markets,
            BucketArg::Selections => Bucket::Selections,
            BucketArg::Other => Bucket::Other,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = if cli.verbose { "quarry=debug" } else { "quarry=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Built once, shared read-only by every run.
    let registry = Arc::new(ProcessorRegistry::with_builtins());

    match cli.command {
        Commands::Run {
            configs,
            output,
            format,
            no_database,
            dry_run,
        } => {
            cmd_run(
                registry,
                &configs,
                output.as_deref(),
                format,
                no_database,
                dry_run,
            )
            .await
        }
        Commands::Validate { configs } => Ok(cmd_validate(&registry, &configs)),
        Commands::Processors => {
            for name in registry.names() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fetchers => {
            for kind in FetcherKind::ALL {
                println!("{:<8} {}", kind.as_str(), kind.description());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::History {
            scraper,
            bucket,
            limit,
        } => {
            let repo = connect_db().await?;
            cmd_history(&repo, &scraper, bucket.map(Bucket::from), limit).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<RecordRepository> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db.record_repository())
}

fn load_all(registry: &ProcessorRegistry, paths: &[PathBuf]) -> Result<Vec<ScrapeConfig>> {
    paths
        .iter()
        .map(|path| {
            ConfigLoader::load_validated(path, registry)
                .with_context(|| format!("Invalid scraper configuration: {}", path.display()))
        })
        .collect()
}

async fn cmd_run(
    registry: Arc<ProcessorRegistry>,
    paths: &[PathBuf],
    output: Option<&Path>,
    format: OutputFormat,
    no_database: bool,
    dry_run: bool,
) -> Result<ExitCode> {
    let configs = load_all(&registry, paths)?;

    if dry_run {
        for config in &configs {
            println!(
                "{}: valid ({} fetcher, {} instructions)",
                config.meta.name,
                config.fetcher.kind.as_str(),
                config.instructions.len()
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let runner = if no_database || std::env::var_os("DATABASE_URL").is_none() {
        tracing::info!("Persistence disabled");
        Runner::<RecordRepository>::new(registry)
    } else {
        Runner::with_store(registry, connect_db().await?)
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling runs");
            on_signal.cancel();
        }
    });

    let mut tasks = JoinSet::new();
    for config in configs {
        let runner = runner.clone();
        let cancel = cancel.child_token();
        tasks.spawn(async move {
            let name = config.meta.name.clone();
            let outcome = match SourceFactory::create(&config.fetcher).await {
                Ok(source) => {
                    runner
                        .run_with_cancel(&config, source, cancel, &TracingRunReporter)
                        .await
                }
                Err(e) => Err(e),
            };
            (name, outcome)
        });
    }

    let mut outcomes = Vec::new();
    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (name, outcome) = joined.context("Run task panicked")?;
        match outcome {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                failed += 1;
                tracing::error!(scraper = %name, error = %e, "Run failed");
            }
        }
    }
    // Keep output order stable regardless of completion order.
    outcomes.sort_by(|a, b| a.result.scraper.cmp(&b.result.scraper));

    let rendered = match format {
        OutputFormat::Json => render_json(&outcomes)?,
        OutputFormat::Csv => render_csv(&outcomes)?,
    };
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Results written");
        }
        None => std::io::stdout().write_all(&rendered)?,
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn render_json(outcomes: &[RunOutcome]) -> Result<Vec<u8>> {
    let mut out = match outcomes {
        [single] => serde_json::to_vec_pretty(single)?,
        many => serde_json::to_vec_pretty(many)?,
    };
    out.push(b'\n');
    Ok(out)
}

/// One row per record: scraper, run_id, bucket, collection, key, fields (JSON).
fn render_csv(outcomes: &[RunOutcome]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["scraper", "run_id", "bucket", "collection", "key", "fields"])?;
    for outcome in outcomes {
        let result = &outcome.result;
        let run_id = result.run_id.to_string();
        for (bucket, record) in result.records() {
            writer.write_record([
                result.scraper.as_str(),
                run_id.as_str(),
                bucket.as_str(),
                record.collection.as_str(),
                record.key.as_str(),
                serde_json::to_string(&record.fields)?.as_str(),
            ])?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {e}"))
}

fn cmd_validate(registry: &ProcessorRegistry, paths: &[PathBuf]) -> ExitCode {
    let mut invalid = 0;
    for path in paths {
        let config = match ConfigLoader::from_path(path) {
            Ok(config) => config,
            Err(e) => {
                invalid += 1;
                println!("{}: {e}", path.display());
                continue;
            }
        };
        match quarry_core::validate_config(&config, registry) {
            Ok(()) => println!("{}: valid", path.display()),
            Err(errors) => {
                invalid += 1;
                println!("{}: {} error(s)", path.display(), errors.len());
                for error in errors {
                    println!("  - {error}");
                }
            }
        }
    }
    if invalid == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn cmd_history(
    repo: &RecordRepository,
    scraper: &str,
    bucket: Option<Bucket>,
    limit: usize,
) -> Result<()> {
    let records = repo.get_records(scraper, bucket, limit).await?;
    if records.is_empty() {
        println!("No records found for scraper={scraper}");
        return Ok(());
    }

    println!("Records for {scraper}:\n");
    for record in &records {
        println!(
            "  [{}] {} {} (key: {}..., last seen {})",
            record.bucket,
            record.collection,
            record.fields,
            &record.natural_key[..8.min(record.natural_key.len())],
            record.last_seen_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
    }
    println!("\nShown: {} of {}", records.len(), repo.count_records(scraper).await?);
    Ok(())
}
