// src/config.rs
use std::{env, fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub cors_allowed_origin: Option<String>,
    pub one_vote_per_ip: bool,
    pub trust_forwarded_for: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            port: try_load(&lookup, "PORT", "3030")?,
            database_url,
            db_max_connections: try_load(&lookup, "DB_MAX_CONNECTIONS", "5")?,
            db_acquire_timeout: Duration::from_secs(try_load(
                &lookup,
                "DB_ACQUIRE_TIMEOUT_SECS",
                "5",
            )?),
            cors_allowed_origin: lookup("CORS_ALLOWED_ORIGIN").filter(|v| !v.trim().is_empty()),
            one_vote_per_ip: try_load(&lookup, "ONE_VOTE_PER_IP", "false")?,
            trust_forwarded_for: try_load(&lookup, "TRUST_FORWARDED_FOR", "false")?,
        })
    }
}

fn try_load<T, F>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.clone(),
        reason: e.to_string(),
    })
}
