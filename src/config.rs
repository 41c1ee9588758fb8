// SPDX-License-Identifier: MPL-2.0

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const APP_ID: &str = "io.codekrafts.Client";
pub const APP_NAME: &str = "CodeKrafts";

#[cfg(feature = "devel")]
pub const IS_DEVEL: bool = true;
#[cfg(not(feature = "devel"))]
pub const IS_DEVEL: bool = false;

/// Prefix for environment variables (`CODEKRAFTS_URL`, `CODEKRAFTS_ANON_KEY`, ...)
pub const ENV_PREFIX: &str = "CODEKRAFTS";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const OTP_CODE_LEN: usize = 6;
/// Seconds a user has to wait before re-sending an OTP, reset or verification mail
pub const RESEND_COOLDOWN_SECS: i64 = 60;

pub const PROFILE_PICTURE_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const BANNER_IMAGE_MAX_BYTES: usize = 10 * 1024 * 1024;
/// Browser cache lifetime requested for profile media
pub const MEDIA_CACHE_CONTROL_SECS: u32 = 3600;

pub const DEFAULT_CODE_LANGUAGE: &str = "JavaScript";
pub const TOP_POSTS_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("configuration error: {0}")]
    Source(#[from] config::ConfigError),
}

/// Connection settings for the hosted backend, supplied at process start.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the backend project, e.g. `https://xyz.example.co`
    #[serde(default)]
    pub url: String,
    /// Public (anonymous) API key sent with every request
    #[serde(default)]
    pub anon_key: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Where auth e-mails should send the user back to
    #[serde(default)]
    pub site_url: Option<String>,
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Config {
    /// Build a config directly, mostly useful for tests and embedding.
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self {
            url: url.to_string(),
            anon_key: anon_key.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            site_url: None,
        }
    }

    /// Load configuration.
    ///
    /// Sources, lowest priority first:
    /// 1. `~/.config/io.codekrafts.Client/config.toml`
    /// 2. a `.env` file in the working directory
    /// 3. `CODEKRAFTS_*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env is the normal case
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = Self::config_file_path() {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configs that cannot reach a backend at all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("url"));
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::Missing("anon_key"));
        }
        self.endpoint()?;
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(self.url.trim_end_matches('/'))?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push(APP_ID);
            p.push("config.toml");
            p
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_url_and_key() {
        let missing_url = Config::new("", "key");
        assert!(matches!(
            missing_url.validate(),
            Err(ConfigError::Missing("url"))
        ));

        let missing_key = Config::new("https://project.example.co", "  ");
        assert!(matches!(
            missing_key.validate(),
            Err(ConfigError::Missing("anon_key"))
        ));

        assert!(Config::new("https://project.example.co", "key").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = Config::new("not a url", "key");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_request_timeout_never_zero() {
        let mut config = Config::new("https://project.example.co", "key");
        config.request_timeout_secs = 0;
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }
}
