use std::env;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, Context};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// Directory under which every job workspace is created.
    pub upload_root: PathBuf,
    pub max_content_length_mb: usize,
    /// Delay between a download starting and its workspace being removed.
    pub cleanup_delay_seconds: u64,
    /// How long an undownloaded result is kept before it is reclaimed.
    pub result_ttl_seconds: u64,
    pub pdfium_library_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let config = Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| {
                info!("SERVER_HOST not set, using default: 0.0.0.0");
                "0.0.0.0".to_string()
            }),
            server_port: Self::parse_env_var("SERVER_PORT", 8080)
                .context("Failed to parse SERVER_PORT")?,
            upload_root: env::var("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    info!("UPLOAD_FOLDER not set, using default: uploads");
                    PathBuf::from("uploads")
                }),
            max_content_length_mb: Self::parse_env_var("MAX_CONTENT_LENGTH_MB", 16)
                .context("Failed to parse MAX_CONTENT_LENGTH_MB")?,
            cleanup_delay_seconds: Self::parse_env_var("CLEANUP_DELAY_SECONDS", 10)
                .context("Failed to parse CLEANUP_DELAY_SECONDS")?,
            result_ttl_seconds: Self::parse_env_var("RESULT_TTL_SECONDS", 3600)
                .context("Failed to parse RESULT_TTL_SECONDS")?,
            pdfium_library_path: env::var("PDFIUM_LIBRARY_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };

        config.validate()?;

        info!("Configuration loaded successfully: {:?}", config);
        Ok(config)
    }

    /// Defaults rooted at `upload_root`, without reading the environment.
    pub fn for_root(upload_root: impl Into<PathBuf>) -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            upload_root: upload_root.into(),
            max_content_length_mb: 16,
            cleanup_delay_seconds: 10,
            result_ttl_seconds: 3600,
            pdfium_library_path: None,
        }
    }

    fn parse_env_var<T>(var_name: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr + Copy + std::fmt::Debug,
        T::Err: std::fmt::Display,
    {
        match env::var(var_name) {
            Ok(val) => match val.parse() {
                Ok(parsed) => Ok(parsed),
                Err(e) => {
                    warn!("Failed to parse {}: {} (using default: {:?})", var_name, e, default);
                    Ok(default)
                }
            },
            Err(_) => {
                info!("{} not set, using default: {:?}", var_name, default);
                Ok(default)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            return Err(anyhow::anyhow!("SERVER_PORT must be greater than 0"));
        }
        if self.max_content_length_mb == 0 {
            return Err(anyhow::anyhow!("MAX_CONTENT_LENGTH_MB must be greater than 0"));
        }
        if self.upload_root.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("UPLOAD_FOLDER must not be empty"));
        }
        if self.result_ttl_seconds < self.cleanup_delay_seconds {
            return Err(anyhow::anyhow!(
                "RESULT_TTL_SECONDS must be at least CLEANUP_DELAY_SECONDS"
            ));
        }
        Ok(())
    }

    pub fn max_content_length_bytes(&self) -> usize {
        self.max_content_length_mb * 1024 * 1024
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_seconds)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_config_passes_validation() {
        let config = Config::for_root("/tmp/docforge");
        assert!(config.validate().is_ok());
        assert_eq!(config.max_content_length_bytes(), 16 * 1024 * 1024);
        assert_eq!(config.cleanup_delay(), Duration::from_secs(10));
    }

    #[test]
    fn ttl_shorter_than_cleanup_delay_is_rejected() {
        let mut config = Config::for_root("/tmp/docforge");
        config.result_ttl_seconds = 1;
        assert!(config.validate().is_err());
    }
}
