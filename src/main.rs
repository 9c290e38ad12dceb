use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use quire::config::{self, DatabaseConfig, PipelineConfig};
use quire::pipeline::{Pipeline, RunOutcome, RunStatus};
use quire::postgres::PgStore;
use quire::staging;
use quire::store::{MemoryStore, Repository};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Stage article exports and bulk load them into PostgreSQL")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage a CSV export and load publications and articles
    Run(RunArgs),
    /// Stage a CSV export and report what it contains, without writing
    Stage(StageArgs),
    /// Create the publications and articles tables if they do not exist
    InitDb,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the CSV export (columns: url, title, subtitle, publication, date)
    input: String,

    /// Rows per write transaction
    #[arg(long, default_value_t = config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Abort the whole run after this many seconds
    #[arg(long, default_value_t = config::DEFAULT_DEADLINE_SECS)]
    deadline_secs: u64,

    /// Article chunks written concurrently
    #[arg(long, default_value_t = config::DEFAULT_MAX_PARALLEL_CHUNKS)]
    max_parallel_chunks: usize,

    /// Run against an in-memory store instead of Postgres
    #[arg(long)]
    dry_run: bool,

    /// Print the run outcome as JSON
    #[arg(long)]
    json: bool,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct StageArgs {
    /// Path to the CSV export
    input: String,
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("quire-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

async fn connect_store() -> Result<PgStore> {
    let db = DatabaseConfig::from_env()?;
    PgStore::connect(&db)
        .await
        .with_context(|| format!("Cannot connect to Postgres at {}", db.redacted()))
}

fn run_pipeline(args: RunArgs) -> Result<RunStatus> {
    let config = PipelineConfig::new(args.chunk_size, Duration::from_secs(args.deadline_secs))?
        .with_max_parallel_chunks(args.max_parallel_chunks)
        .with_progress(!args.no_progress && !args.json);

    let rt = build_runtime()?;
    let outcome = rt.block_on(async {
        let repo: Arc<dyn Repository> = if args.dry_run {
            info!("Dry run: using in-memory store");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(connect_store().await?)
        };
        let pipeline = Pipeline::new(config, repo);
        Ok::<_, anyhow::Error>(pipeline.run(&args.input).await)
    })?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?
        );
    } else {
        print_summary(&outcome);
    }
    Ok(outcome.status)
}

fn print_summary(outcome: &RunOutcome) {
    println!();
    println!("=== Summary ===");
    println!("Status:             {:?}", outcome.status);
    if let Some(ref e) = outcome.error {
        println!("Error:              {e}");
    }
    println!("Total time:         {:.2}s", outcome.elapsed_secs);
    println!();
    println!("Rows staged:        {}", outcome.rows_staged);
    println!("Publications:       {}", outcome.publications_upserted);
    println!("Articles inserted:  {}", outcome.articles_inserted);
    println!("Rows excluded:      {}", outcome.rows_excluded);
    println!("Invalid dates:      {}", outcome.invalid_dates);
    if !outcome.missing_publication_names.is_empty() {
        println!("Missing publications:");
        for name in &outcome.missing_publication_names {
            println!("  {name:?}");
        }
    }
    if !outcome.is_completed() {
        println!();
        println!("The store may be partially loaded; see the counts above.");
    }
}

fn run_stage(args: StageArgs) -> Result<()> {
    let start = Instant::now();
    let handle = staging::load(&args.input)?;
    let publications = handle.distinct_publications()?;
    let invalid_dates = handle.invalid_dates()?;

    println!();
    println!("=== Staging ===");
    println!("Input:              {}", handle.path().display());
    println!("Staging time:       {:.2}s", start.elapsed().as_secs_f64());
    println!("Rows staged:        {}", handle.row_count());
    println!("Publications:       {}", publications.len());
    println!("Invalid dates:      {invalid_dates}");
    Ok(())
}

fn run_init_db() -> Result<()> {
    let rt = build_runtime()?;
    rt.block_on(async {
        let store = connect_store().await?;
        store.ensure_schema().await.context("Failed to create schema")?;
        Ok(())
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            error!(error = %e, "Failed to read .env file");
        }
    }
    info!(environment = %config::environment(), "Starting quire");

    let result = match cli.command {
        Commands::Run(args) => run_pipeline(args).map(|status| status == RunStatus::Completed),
        Commands::Stage(args) => run_stage(args).map(|()| true),
        Commands::InitDb => run_init_db().map(|()| true),
    };

    match result {
        Ok(true) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
