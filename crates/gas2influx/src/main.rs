use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gas2influx_config::{RuntimeConfig, SinkBackend};
use gas2influx_core::MEASUREMENT_COLUMNS;
use gas2influx_ledger::{Ledger, SqliteLedger};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// Ingest gas-sensor CSV captures into InfluxDB, each file exactly once
#[derive(Parser)]
#[command(name = "gas2influx")]
#[command(version)]
#[command(about = "Ingest gas-sensor CSV captures into InfluxDB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every CSV in the input directory (default if no subcommand given)
    Run(RunArgs),
    /// Transform one file and print its first rows without touching the ledger or sink
    Preview {
        /// CSV file to transform
        file: PathBuf,

        /// Number of rows to print
        #[arg(short = 'n', long, default_value_t = 10)]
        rows: usize,
    },
    /// Report whether a file name is recorded in the ledger
    Status {
        /// File name as used by the ledger, e.g. 20160930_203718.csv
        identifier: String,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Directory to scan for CSV files (overrides config file)
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Delivery mode: at-most-once or at-least-once
    #[arg(long, value_name = "MODE")]
    delivery: Option<String>,

    /// Files processed in parallel
    #[arg(short = 'j', long, value_name = "N")]
    concurrency: Option<usize>,

    /// Print line protocol to stdout instead of writing to InfluxDB
    #[arg(long)]
    dry_run: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<ExitCode> {
    let Cli {
        command,
        config: config_path,
        log_level,
    } = cli;

    // Step 1: Load base configuration
    let mut config = if let Some(path) = &config_path {
        RuntimeConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        RuntimeConfig::load_or_default().context("Failed to load configuration")?
    };

    // Step 2: Global CLI overrides
    if let Some(level) = log_level {
        config.logging.level = level;
    }

    match command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(config, args).await,
        Commands::Preview { file, rows } => preview(config, &file, rows).await,
        Commands::Status { identifier } => status(config, &identifier).await,
    }
}

async fn run(mut config: RuntimeConfig, args: RunArgs) -> Result<ExitCode> {
    apply_run_overrides(&mut config, &args)?;
    config.validate()?;

    gas2influx::init_tracing(&config.logging);
    display_startup_info(&config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        gas2influx::shutdown_signal().await;
        on_signal.cancel();
    });

    let summary = gas2influx::run_with_config(config, cancel).await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to render summary")?
        );
    } else {
        eprintln!(
            "{} file(s): {} done, {} skipped, {} failed, {} cancelled, {} rows written",
            summary.total(),
            summary.done,
            summary.skipped,
            summary.failed,
            summary.cancelled,
            summary.rows_written
        );
    }

    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn apply_run_overrides(config: &mut RuntimeConfig, args: &RunArgs) -> Result<()> {
    if let Some(input) = &args.input {
        config.pipeline.input_dir = input.to_string_lossy().to_string();
    }

    if let Some(mode) = &args.delivery {
        config.pipeline.delivery = mode.parse().context("Invalid --delivery value")?;
    }

    if let Some(n) = args.concurrency {
        config.pipeline.max_concurrency = n;
    }

    if args.dry_run {
        config.sink.backend = SinkBackend::Stdout;
    }

    Ok(())
}

fn display_startup_info(config: &RuntimeConfig) {
    use tracing::info;

    info!("╭─────────────────────────────────────────────────");
    info!("│ gas2influx v{}", env!("CARGO_PKG_VERSION"));
    info!("├─────────────────────────────────────────────────");
    info!("│ Input directory: {}", config.pipeline.input_dir);
    info!("│ Delivery: {}", config.pipeline.delivery);
    info!("│ Max concurrency: {}", config.pipeline.max_concurrency);
    info!("│ Ledger: {}", config.ledger.path);
    info!("│ Sink backend: {}", config.sink.backend);

    if config.sink.backend == SinkBackend::Influxdb {
        info!("│   - URL: {}", config.sink.url);
        info!("│   - Org/bucket: {}/{}", config.sink.org, config.sink.bucket);
    }

    info!(
        "│ Measurement: {} (tags: {})",
        config.sink.measurement,
        config.sink.tag_columns.join(", ")
    );
    info!("╰─────────────────────────────────────────────────");
}

async fn preview(config: RuntimeConfig, file: &Path, rows: usize) -> Result<ExitCode> {
    gas2influx::init_tracing(&config.logging);

    let output = gas2influx::preview_file(file, gas2influx::transform_options(&config)).await?;
    let report = &output.report;

    println!(
        "{}: {} row(s) retained of {} read ({} outside window, {} malformed)",
        output.batch.record.identifier,
        report.rows_retained,
        report.rows_read,
        report.rows_outside_window,
        report.malformed_rows
    );

    println!("Time\t{}", MEASUREMENT_COLUMNS.join("\t"));
    for row in output.batch.rows.iter().take(rows) {
        let values: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        println!("{}\t{}", row.timestamp_iso(), values.join("\t"));
    }

    Ok(ExitCode::SUCCESS)
}

async fn status(config: RuntimeConfig, identifier: &str) -> Result<ExitCode> {
    gas2influx::init_tracing(&config.logging);

    // Do not create a ledger just to answer a query
    if !Path::new(&config.ledger.path).exists() {
        println!("{identifier}: not admitted (no ledger at {})", config.ledger.path);
        return Ok(ExitCode::SUCCESS);
    }

    let ledger = SqliteLedger::open(
        &config.ledger.path,
        config.ledger.timeout(),
        config.ledger.busy_timeout(),
    )
    .await
    .with_context(|| format!("Failed to open ledger at {}", config.ledger.path))?;

    let admitted = ledger.is_admitted(identifier).await?;
    println!(
        "{identifier}: {}",
        if admitted { "admitted" } else { "not admitted" }
    );
    Ok(ExitCode::SUCCESS)
}
