use super::{LogFormat, RuntimeConfig};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "GAS2INFLUX_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the GAS2INFLUX_ prefix
    /// Used for the InfluxDB standard variables (INFLUXDB_TOKEN, etc.)
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Pipeline
    if let Some(dir) = get_env_string(env, "INPUT_DIR")? {
        config.pipeline.input_dir = dir;
    }
    if let Some(val) = get_env_usize(env, "MAX_CONCURRENCY")? {
        config.pipeline.max_concurrency = val;
    }
    if let Some(mode) = get_env_string(env, "DELIVERY")? {
        config.pipeline.delivery = mode
            .parse()
            .context("Invalid GAS2INFLUX_DELIVERY value")?;
    }
    if let Some(val) = get_env_u64(env, "RUN_TIMEOUT_SECS")? {
        config.pipeline.run_timeout_secs = val;
    }

    // Transform
    if let Some(val) = get_env_u64(env, "WINDOW_SECS")? {
        config.transform.window_secs = val;
    }
    if let Some(policy) = get_env_string(env, "ROW_ERRORS")? {
        config.transform.row_errors = policy
            .parse()
            .context("Invalid GAS2INFLUX_ROW_ERRORS value")?;
    }
    if let Some(val) = get_env_usize(env, "CHUNK_ROWS")? {
        config.transform.chunk_rows = val;
    }
    if let Some(val) = get_env_u64(env, "TRANSFORM_TIMEOUT_SECS")? {
        config.transform.timeout_secs = val;
    }

    // Ledger
    if let Some(path) = get_env_string(env, "LEDGER_PATH")? {
        config.ledger.path = path;
    }
    if let Some(val) = get_env_u64(env, "LEDGER_TIMEOUT_SECS")? {
        config.ledger.timeout_secs = val;
    }
    if let Some(val) = get_env_u64(env, "LEDGER_BUSY_TIMEOUT_MS")? {
        config.ledger.busy_timeout_ms = val;
    }

    // Artifacts
    if let Some(path) = get_env_string(env, "ARTIFACT_PATH")? {
        config.artifacts.path = path;
    }
    if let Some(val) = get_env_usize(env, "ROW_GROUP_SIZE")? {
        config.artifacts.row_group_size = val;
    }

    // Sink
    if let Some(backend) = get_env_string(env, "SINK_BACKEND")? {
        config.sink.backend = backend
            .parse()
            .context("Invalid GAS2INFLUX_SINK_BACKEND value")?;
    }
    if let Some(url) = get_env_string(env, "INFLUX_URL")? {
        config.sink.url = url;
    }
    if let Some(org) = get_env_string(env, "INFLUX_ORG")? {
        config.sink.org = org;
    }
    if let Some(bucket) = get_env_string(env, "INFLUX_BUCKET")? {
        config.sink.bucket = bucket;
    }
    // Prefixed token wins over the InfluxDB CLI's standard variable
    if let Some(token) = get_env_string(env, "INFLUX_TOKEN")? {
        config.sink.token = token;
    } else if let Some(token) = get_raw_env_string(env, "INFLUXDB_TOKEN")? {
        config.sink.token = token;
    }
    if let Some(measurement) = get_env_string(env, "MEASUREMENT")? {
        config.sink.measurement = measurement;
    }
    if let Some(tags) = get_env_string(env, "TAG_COLUMNS")? {
        config.sink.tag_columns = split_list(&tags);
    }
    if let Some(val) = get_env_u64(env, "SINK_TIMEOUT_SECS")? {
        config.sink.timeout_secs = val;
    }
    if let Some(val) = get_env_usize(env, "MAX_LINES_PER_REQUEST")? {
        config.sink.max_lines_per_request = val;
    }

    // Logging
    if let Some(level) = get_env_string(env, "LOG_LEVEL")? {
        config.logging.level = level;
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT")? {
        config.logging.format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    Ok(())
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Result<Option<String>> {
    Ok(env.get(key).filter(|v| !v.is_empty()))
}

/// Get a raw environment variable without the GAS2INFLUX_ prefix
fn get_raw_env_string<E: EnvSource>(env: &E, key: &str) -> Result<Option<String>> {
    Ok(env.get_raw(key).filter(|v| !v.is_empty()))
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    match get_env_string(env, key)? {
        Some(val) => {
            let parsed = val
                .parse::<usize>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    match get_env_string(env, key)? {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Comma-separated list; column names never contain commas.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
