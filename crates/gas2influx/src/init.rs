// Initialization utilities
//
// Logging/tracing setup and construction of the pipeline's collaborators
// from RuntimeConfig

use anyhow::{Context, Result};
use gas2influx_config::{LogFormat, LoggingConfig, RuntimeConfig};
use gas2influx_ledger::SqliteLedger;
use gas2influx_writer::{build_sink, ArtifactStore};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::pipeline::{Pipeline, PipelineSettings};

/// Initialize tracing/logging from the logging section
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Accepts plain levels and full directives ("info,gas2influx_ledger=debug")
    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr so the stdout sink's line protocol stays clean.
    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

/// Open the ledger, artifact store and sink described by `config`.
pub async fn build_pipeline(config: &RuntimeConfig) -> Result<Pipeline> {
    let settings = PipelineSettings::from_config(config)?;

    ensure_parent_dir(Path::new(&config.ledger.path))?;
    let ledger = SqliteLedger::open(
        &config.ledger.path,
        config.ledger.timeout(),
        config.ledger.busy_timeout(),
    )
    .await
    .with_context(|| format!("Failed to open ledger at {}", config.ledger.path))?;
    info!("Ledger: {}", config.ledger.path);

    std::fs::create_dir_all(&config.artifacts.path).with_context(|| {
        format!(
            "Failed to create artifact directory: {}",
            config.artifacts.path
        )
    })?;
    let artifacts = ArtifactStore::fs(&config.artifacts.path)
        .context("Failed to initialize artifact store")?;
    info!("Artifacts: {}", artifacts.location());

    let sink = build_sink(&config.sink).context("Failed to initialize sink")?;
    info!("Sink: {} (measurement '{}')", sink.name(), config.sink.measurement);

    Ok(Pipeline::new(Arc::new(ledger), sink, artifacts, settings))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory: {}", parent.display())
            })
        }
        _ => Ok(()),
    }
}
