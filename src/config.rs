use std::{env, time::Duration};

use thiserror::Error;

use crate::{pagination::DEFAULT_PAGE_SIZE, telegram::DEFAULT_API_URL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage: StorageBackend,
    pub database_url: String,
    pub telegram_api_key: String,
    pub telegram_api_url: String,
    pub outbound_timeout: Duration,
    pub page_size: usize,
    pub webhook_secret: Option<String>,
}

impl Config {
    /// Reads `.env` (when present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let storage = match var("STORAGE_BACKEND").as_deref().map(str::trim) {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let telegram_api_key =
            var("TELEGRAM_API_KEY").ok_or(ConfigError::Missing("TELEGRAM_API_KEY"))?;

        Ok(Config {
            port: parse_or(&var, "PORT", 4000)?,
            storage,
            database_url: resolve_database_url(&var),
            telegram_api_key,
            telegram_api_url: var("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            outbound_timeout: Duration::from_secs(parse_or(&var, "OUTBOUND_TIMEOUT_SECS", 10)?),
            page_size: parse_or(&var, "PAGE_SIZE", DEFAULT_PAGE_SIZE)?.max(1),
            webhook_secret: var("TELEGRAM_WEBHOOK_SECRET"),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn resolve_database_url(var: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(url) = var("DATABASE_URL") {
        return url;
    }
    let pick = |primary: &str, fallback: &str, default: &str| {
        var(primary)
            .or_else(|| var(fallback))
            .unwrap_or_else(|| default.to_string())
    };
    let host = pick("POSTGRES_HOST", "PGHOST", "localhost");
    let port = pick("POSTGRES_PORT", "PGPORT", "5432");
    let user = pick("POSTGRES_USER", "PGUSER", "postgres");
    let password = pick("POSTGRES_PASSWORD", "PGPASSWORD", "postgres");
    let db = pick("POSTGRES_DB", "PGDATABASE", "support_chat");
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}
