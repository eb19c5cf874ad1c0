use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Parsing and validation are decoupled from the real environment so tests can
/// drive this with a plain `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var).ok().filter(|v| !v.trim().is_empty())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("ARW_ENV", "development"))?;
    let log_level = or_default("ARW_LOG_LEVEL", "info");
    let assets_path = PathBuf::from(or_default("ARW_ASSETS_PATH", "./config/assets.yaml"));

    let db_max_connections = parse_u32("ARW_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("ARW_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("ARW_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let compute_url = optional("ARW_COMPUTE_URL");
    let compute_api_token = optional("ARW_COMPUTE_API_TOKEN");
    let compute_timeout_secs = parse_u64("ARW_COMPUTE_TIMEOUT_SECS", "600")?;
    let compute_max_retries = parse_u32("ARW_COMPUTE_MAX_RETRIES", "0")?;

    let blob_url = optional("ARW_BLOB_URL");
    let blob_api_token = optional("ARW_BLOB_API_TOKEN");
    let blob_max_retries = parse_u32("ARW_BLOB_MAX_RETRIES", "3")?;
    let retry_backoff_base_ms = parse_u64("ARW_RETRY_BACKOFF_BASE_MS", "1000")?;

    let cache_ttl_hours = match optional("ARW_CACHE_TTL_HOURS") {
        Some(raw) => Some(
            raw.parse::<u32>()
                .map_err(|e| invalid("ARW_CACHE_TTL_HOURS", e.to_string()))?,
        ),
        None => None,
    };

    let max_concurrent_descriptors = parse_usize("ARW_MAX_CONCURRENT_DESCRIPTORS", "4")?.max(1);
    let user_agent = or_default("ARW_USER_AGENT", "arw/0.1 (analysis-pipeline)");

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        assets_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        compute_url,
        compute_api_token,
        compute_timeout_secs,
        compute_max_retries,
        blob_url,
        blob_api_token,
        blob_max_retries,
        retry_backoff_base_ms,
        cache_ttl_hours,
        max_concurrent_descriptors,
        user_agent,
    })
}

fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "ARW_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
