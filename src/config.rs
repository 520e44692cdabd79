use std::{env, time::Duration};

use thiserror::Error;

use crate::models::StatsType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    stats_api_base_url: Option<String>,
    stats_api_key: Option<String>,
    stats_api_connect_timeout: Duration,
    stats_api_timeout: Duration,
    pub stats_types: Vec<StatsType>,
    pub series_limit: usize,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

impl Config {
    /// Reads the collector settings from the process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when `DATABASE_URL` is unset, or when a
    /// numeric, list or enum value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let stats_api_base_url = optional(&lookup, "STATS_API_BASE_URL");
        let stats_api_key = optional(&lookup, "STATS_API_KEY");

        let stats_api_connect_timeout =
            Duration::from_millis(parse_u64(&lookup, "STATS_API_CONNECT_TIMEOUT_MS", 3000)?);
        let stats_api_timeout =
            Duration::from_millis(parse_u64(&lookup, "STATS_API_TIMEOUT_MS", 30000)?);

        let stats_types = parse_stats_types(&lookup, "STATS_TYPES", "risk")?;
        let series_limit = parse_u64(&lookup, "STATS_SERIES_LIMIT", 10)? as usize;
        if series_limit == 0 {
            return Err(ConfigError::Invalid {
                name: "STATS_SERIES_LIMIT",
                message: "must be greater than zero".to_string(),
            });
        }

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    message: format!("expected `pretty` or `json`, got `{other}`"),
                })
            }
        };

        Ok(Self {
            database_url,
            stats_api_base_url,
            stats_api_key,
            stats_api_connect_timeout,
            stats_api_timeout,
            stats_types,
            series_limit,
            log_format,
        })
    }

    /// Settings of the stats API client. Only commands that talk to the API
    /// need `STATS_API_BASE_URL`.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] when `STATS_API_BASE_URL` is unset.
    pub fn stats_api(&self) -> Result<StatsApiConfig, ConfigError> {
        let base_url = self
            .stats_api_base_url
            .clone()
            .ok_or(ConfigError::Missing("STATS_API_BASE_URL"))?;

        Ok(StatsApiConfig {
            base_url,
            api_key: self.stats_api_key.clone(),
            connect_timeout: self.stats_api_connect_timeout,
            total_timeout: self.stats_api_timeout,
        })
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name).ok_or(ConfigError::Missing(name))
}

fn parse_u64<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|err: std::num::ParseIntError| {
            ConfigError::Invalid {
                name,
                message: err.to_string(),
            }
        }),
        None => Ok(default),
    }
}

fn parse_stats_types<F>(
    lookup: &F,
    name: &'static str,
    default: &str,
) -> Result<Vec<StatsType>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name).unwrap_or_else(|| default.to_string());
    let mut types = Vec::new();

    for part in raw.split(',').filter(|part| !part.trim().is_empty()) {
        let stats_type: StatsType = part
            .parse()
            .map_err(|message| ConfigError::Invalid { name, message })?;
        if !types.contains(&stats_type) {
            types.push(stats_type);
        }
    }

    if types.is_empty() {
        return Err(ConfigError::Invalid {
            name,
            message: "at least one stats type is required".to_string(),
        });
    }

    Ok(types)
}
