use std::{env, fmt::Display, str::FromStr};

use anyhow::Context;
use tracing::{debug, info};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: String,
}

impl Config {
    /// Reads configuration from the environment, loading `.env` first when
    /// one is present.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("loaded environment from {}", path.display());
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set to a Postgres instance")?,
            max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                env::var("DATABASE_MAX_CONNECTIONS").ok(),
                DEFAULT_MAX_CONNECTIONS,
            )?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr + Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key} value: {raw}")),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_uses_default_when_unset() {
        assert_eq!(parse_or("DATABASE_MAX_CONNECTIONS", None, 5u32).unwrap(), 5);
    }

    #[test]
    fn parse_or_reads_value() {
        assert_eq!(
            parse_or("DATABASE_MAX_CONNECTIONS", Some(" 12 ".to_string()), 5u32).unwrap(),
            12
        );
    }

    #[test]
    fn parse_or_rejects_garbage() {
        let err = parse_or("DATABASE_MAX_CONNECTIONS", Some("many".to_string()), 5u32).unwrap_err();
        assert_eq!(err.to_string(), "invalid DATABASE_MAX_CONNECTIONS value: many");
    }
}
