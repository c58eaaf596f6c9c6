use std::env;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage_root: PathBuf,
    pub auth_service_url: String,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = parse_or(&lookup, "PORT", 3000u16)?;
        let storage_root = lookup("STORAGE_ROOT").unwrap_or_else(|| "uploads".to_string());
        let auth_service_url = lookup("AUTH_SERVICE_URL").ok_or(ConfigError::Missing("AUTH_SERVICE_URL"))?;
        let max_upload_megabytes = parse_or(&lookup, "MAX_UPLOAD_MEGABYTES", 100usize)?;
        let max_upload_bytes = max_upload_megabytes
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError::Invalid {
                name: "MAX_UPLOAD_MEGABYTES",
                value: max_upload_megabytes.to_string(),
            })?;

        Ok(Config {
            port,
            storage_root: PathBuf::from(storage_root),
            auth_service_url,
            max_upload_bytes,
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
