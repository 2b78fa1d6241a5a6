//! Load shard config from JSON or from the environment.

use crate::config::{validate, ConnectOptions, DatabaseConfig, IdLookup, ShardConfig};
use crate::error::ConfigError;

/// Env var listing shard databases as `id=url` pairs separated by `;`, in registration order.
pub const SHARD_DATABASES_ENV: &str = "SHARD_DATABASES";

/// Parse and validate a JSON config document.
pub fn load_from_json(json: &str) -> Result<ShardConfig, ConfigError> {
    let config: ShardConfig = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

/// Parse `default=postgres://...;reporting=postgres://...`.
pub fn parse_databases(list: &str) -> Result<Vec<DatabaseConfig>, ConfigError> {
    list.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (id, url) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::Load(format!("expected id=url, got '{}'", pair)))?;
            Ok(DatabaseConfig {
                id: id.trim().into(),
                url: url.trim().to_string(),
            })
        })
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Load(format!("{}: invalid value '{}'", name, v))),
        _ => Ok(None),
    }
}

/// Build config from env (after `.env`, if present). `SHARD_DATABASES` is required;
/// `DATABASE_URL` alone is accepted as a single `default` shard.
pub fn load_from_env() -> Result<ShardConfig, ConfigError> {
    dotenvy::dotenv().ok();
    let databases = match std::env::var(SHARD_DATABASES_ENV) {
        Ok(list) => parse_databases(&list)?,
        Err(_) => match std::env::var("DATABASE_URL") {
            Ok(url) => vec![DatabaseConfig { id: "default".into(), url }],
            Err(_) => {
                return Err(ConfigError::Load(format!(
                    "{} or DATABASE_URL must be set",
                    SHARD_DATABASES_ENV
                )))
            }
        },
    };

    let defaults = ConnectOptions::default();
    let options = ConnectOptions {
        pool_size: env_parse("DB_POOL_SIZE")?.unwrap_or(defaults.pool_size),
        acquire_timeout_secs: env_parse("DB_ACQUIRE_TIMEOUT_SECS")?.unwrap_or(defaults.acquire_timeout_secs),
        idle_timeout_secs: env_parse("DB_IDLE_TIMEOUT_SECS")?,
        charset: std::env::var("DB_CHARSET").unwrap_or(defaults.charset),
        application_name: std::env::var("DB_APPLICATION_NAME").ok(),
    };
    let id_lookup: IdLookup = env_parse("SHARD_ID_LOOKUP")?.unwrap_or_default();

    let config = ShardConfig {
        databases,
        options,
        id_lookup,
    };
    validate(&config)?;
    Ok(config)
}
