// src/config.rs
use log::warn;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    pub alphavantage_api_key: String,
    pub alphavantage_url: String,
    pub quote_timeout: Duration,
    pub session_secret: String,
    pub session_ttl: Duration,
    pub initial_cash: Decimal,
    pub password_rounds: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3030)),
            database_path: PathBuf::from("finance.db"),
            alphavantage_api_key: "demo".to_string(),
            alphavantage_url: "https://www.alphavantage.co/query".to_string(),
            quote_timeout: Duration::from_secs(10),
            session_secret: random_secret(),
            session_ttl: Duration::from_secs(2 * 60 * 60),
            initial_cash: Decimal::new(10_000_00, 2),
            password_rounds: 600_000,
        }
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

impl Config {
    /// Reads settings from the process environment, keeping defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("BIND_ADDR") {
            config.bind_addr = parse("BIND_ADDR", v)?;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ALPHAVANTAGE_API_KEY") {
            config.alphavantage_api_key = v;
        }
        if let Some(v) = lookup("ALPHAVANTAGE_URL") {
            config.alphavantage_url = v;
        }
        if let Some(v) = lookup("QUOTE_TIMEOUT_SECS") {
            config.quote_timeout = Duration::from_secs(parse("QUOTE_TIMEOUT_SECS", v)?);
        }
        match lookup("SESSION_SECRET") {
            Some(v) if !v.is_empty() => config.session_secret = v,
            _ => warn!("SESSION_SECRET not set; sessions will not survive a restart"),
        }
        if let Some(v) = lookup("SESSION_TTL_SECS") {
            config.session_ttl = Duration::from_secs(parse("SESSION_TTL_SECS", v)?);
        }
        if let Some(v) = lookup("INITIAL_CASH") {
            let cash: Decimal = parse("INITIAL_CASH", v.clone())?;
            if cash.is_sign_negative() {
                return Err(ConfigError::Invalid {
                    key: "INITIAL_CASH",
                    value: v,
                });
            }
            config.initial_cash = cash;
        }
        if let Some(v) = lookup("PASSWORD_ROUNDS") {
            let rounds: u32 = parse("PASSWORD_ROUNDS", v.clone())?;
            if rounds == 0 {
                return Err(ConfigError::Invalid {
                    key: "PASSWORD_ROUNDS",
                    value: v,
                });
            }
            config.password_rounds = rounds;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 3030)));
        assert_eq!(config.initial_cash, Decimal::new(10_000, 0));
        assert_eq!(config.password_rounds, 600_000);
        assert_eq!(config.session_secret.len(), 48);
        assert_eq!(config.session_ttl, Duration::from_secs(7200));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("INITIAL_CASH", "2500.50"),
            ("SESSION_SECRET", "s3cret"),
            ("QUOTE_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.initial_cash, Decimal::new(250050, 2));
        assert_eq!(config.session_secret, "s3cret");
        assert_eq!(config.quote_timeout, Duration::from_secs(3));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = config_from(&[("PASSWORD_ROUNDS", "lots")]).unwrap_err();
        assert_eq!(err.to_string(), "invalid value for PASSWORD_ROUNDS: \"lots\"");
        assert!(config_from(&[("INITIAL_CASH", "-1")]).is_err());
        assert!(config_from(&[("PASSWORD_ROUNDS", "0")]).is_err());
    }
}
