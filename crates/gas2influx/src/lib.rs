// gas2influx - idempotent sensor CSV ingestion
//
// For each CSV in the input directory:
//   check-and-admit (ledger) -> transform -> Parquet artifact -> sink write + flush
// or skip when the ledger already knows the file.
//
// The ledger, artifact store and sink are injected; `run_with_config` wires
// the production ones from RuntimeConfig.

use anyhow::{Context, Result};
use gas2influx_config::RuntimeConfig;
use gas2influx_core::{transform_file, RowErrorPolicy, TransformOptions, TransformOutput};
use std::path::Path;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod discovery;
mod error;
mod init;
mod pipeline;
mod state;
mod summary;

pub use discovery::{discover_files, DiscoveredFile};
pub use error::IngestError;
pub use init::{build_pipeline, init_tracing};
pub use pipeline::{Pipeline, PipelineSettings};
pub use state::{FileRun, FileState, IllegalTransition, Step};
pub use summary::{FileOutcome, RunSummary};

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing in-flight files...");
        },
        _ = terminate => {
            info!("Received SIGTERM, finishing in-flight files...");
        },
    }
}

/// Discover, build and run one ingestion pass.
///
/// `cancel` stops new files from starting; the run deadline from
/// `pipeline.run_timeout_secs` fires the same token.
pub async fn run_with_config(
    config: RuntimeConfig,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    init_tracing(&config.logging);

    let input_dir = Path::new(&config.pipeline.input_dir);
    let files = discover_files(input_dir)?;
    info!(
        "Found {} candidate file(s) in {}",
        files.len(),
        input_dir.display()
    );

    let pipeline = build_pipeline(&config).await?;

    let summary = pipeline
        .run_with_deadline(files, cancel, config.pipeline.run_timeout())
        .await;

    summary.log();
    Ok(summary)
}

/// Transform one file without touching the ledger, artifact store or sink.
pub async fn preview_file(path: &Path, options: TransformOptions) -> Result<TransformOutput> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || transform_file(&owned, &options))
        .await
        .context("Preview task failed")?
        .with_context(|| format!("Failed to transform {}", path.display()))
}

/// Transform options for ad-hoc use, honouring the configured row policy.
pub fn transform_options(config: &RuntimeConfig) -> TransformOptions {
    TransformOptions {
        window_secs: config.transform.window_secs,
        row_errors: match config.transform.row_errors {
            gas2influx_config::RowErrors::Skip => RowErrorPolicy::Skip,
            gas2influx_config::RowErrors::Fail => RowErrorPolicy::Fail,
        },
    }
}
