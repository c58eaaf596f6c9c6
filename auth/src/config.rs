use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub signing_key: String,
    pub issuer: String,
    pub audience: String,
    pub users_file: PathBuf,
    pub token_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let signing_key = lookup("SIGNING_KEY").ok_or(ConfigError::Missing("SIGNING_KEY"))?;
        let ttl_minutes: u64 = parse_or(&lookup, "TOKEN_TTL_MINUTES", 30)?;

        Ok(Config {
            port: parse_or(&lookup, "PORT", 3000)?,
            signing_key,
            issuer: lookup("ISSUER").unwrap_or_else(|| "file-store".to_string()),
            audience: lookup("AUDIENCE").unwrap_or_else(|| "file-store".to_string()),
            users_file: PathBuf::from(lookup("USERS_FILE").unwrap_or_else(|| "users.json".to_string())),
            token_ttl: Duration::from_secs(ttl_minutes * 60),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
