// Configuration validation
//
// Validates that required fields are present and values are sensible

use super::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_pipeline_config(&config.pipeline)?;
    validate_transform_config(&config.transform)?;
    validate_ledger_config(&config.ledger)?;
    validate_artifact_config(&config.artifacts)?;
    validate_sink_config(&config.sink)?;
    Ok(())
}

fn validate_pipeline_config(config: &PipelineConfig) -> Result<()> {
    if config.input_dir.is_empty() {
        bail!("pipeline.input_dir must not be empty");
    }

    if config.max_concurrency == 0 {
        bail!("pipeline.max_concurrency must be greater than 0");
    }

    if config.max_concurrency > 256 {
        warn!(
            max_concurrency = config.max_concurrency,
            "pipeline.max_concurrency is very large; the ledger may see lock contention"
        );
    }

    Ok(())
}

fn validate_transform_config(config: &TransformConfig) -> Result<()> {
    if config.window_secs == 0 {
        bail!("transform.window_secs must be greater than 0");
    }

    if config.chunk_rows == 0 {
        bail!("transform.chunk_rows must be greater than 0");
    }

    if config.timeout_secs == 0 {
        bail!("transform.timeout_secs must be greater than 0");
    }

    if config.window_secs != 86_400 {
        warn!(
            window_secs = config.window_secs,
            "transform.window_secs differs from the one-day default"
        );
    }

    Ok(())
}

fn validate_ledger_config(config: &LedgerConfig) -> Result<()> {
    if config.path.is_empty() {
        bail!(
            "Ledger path is required\n\n\
            How to fix:\n\
              • Environment: export {}LEDGER_PATH=/var/lib/gas2influx/ledger.db\n\
              • TOML: [ledger]\n              path = \"/var/lib/gas2influx/ledger.db\"\n",
            ENV_PREFIX
        );
    }

    if config.timeout_secs == 0 {
        bail!("ledger.timeout_secs must be greater than 0");
    }

    if config.busy_timeout() >= config.timeout() {
        bail!(
            "ledger.busy_timeout_ms ({}) must be shorter than ledger.timeout_secs ({}s)\n\n\
            How to fix:\n\
              • Lower {}LEDGER_BUSY_TIMEOUT_MS or raise {}LEDGER_TIMEOUT_SECS\n",
            config.busy_timeout_ms,
            config.timeout_secs,
            ENV_PREFIX,
            ENV_PREFIX
        );
    }

    Ok(())
}

fn validate_artifact_config(config: &ArtifactConfig) -> Result<()> {
    if config.path.is_empty() {
        bail!("artifacts.path must not be empty");
    }

    if config.row_group_size == 0 {
        bail!("artifacts.row_group_size must be greater than 0");
    }

    Ok(())
}

fn validate_sink_config(config: &SinkConfig) -> Result<()> {
    if config.measurement.is_empty() {
        bail!("sink.measurement must not be empty");
    }

    if config.timeout_secs == 0 {
        bail!("sink.timeout_secs must be greater than 0");
    }

    if config.max_lines_per_request == 0 {
        bail!("sink.max_lines_per_request must be greater than 0");
    }

    let mut seen = std::collections::HashSet::new();
    for tag in &config.tag_columns {
        if !seen.insert(tag.as_str()) {
            bail!("sink.tag_columns lists '{}' more than once", tag);
        }
    }

    if config.backend == SinkBackend::Influxdb {
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            bail!(
                "InfluxDB URL must start with http:// or https:// (got '{}')\n\n\
                How to fix:\n\
                  • Environment: export {}INFLUX_URL=http://influxdb:8086\n\
                  • TOML: [sink]\n              url = \"http://influxdb:8086\"\n",
                config.url,
                ENV_PREFIX
            );
        }

        if config.org.is_empty() || config.bucket.is_empty() {
            bail!(
                "InfluxDB org and bucket are required\n\n\
                How to fix:\n\
                  • Environment: export {}INFLUX_ORG=my-org {}INFLUX_BUCKET=gas-quality\n\
                  • TOML: set org and bucket under [sink]\n",
                ENV_PREFIX,
                ENV_PREFIX
            );
        }

        if config.token.is_empty() {
            warn!("sink.token is empty; InfluxDB will reject writes unless auth is disabled");
        }
    }

    Ok(())
}
