use anyhow::{bail, Result};
use std::env;

use crate::{
    services::upscaler::{self, DEFAULT_MODEL_VERSION},
    utils::file::{DEFAULT_ALLOWED_MIME_TYPES, DEFAULT_MAX_FILE_SIZE},
};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Postgres account store; an in-memory store is used when unset.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub max_file_size: usize,
    pub allowed_mime_types: Vec<String>,
    /// Predictions API; a simulated upscaler is used when unset.
    pub upscaler_url: Option<String>,
    pub upscaler_api_token: Option<String>,
    pub upscaler_model_version: String,
    pub upscale_factor: u8,
    pub upscaler_poll_interval_ms: u64,
    pub upscaler_max_polls: u32,
    /// Sessions without requests for this long are closed unless processing.
    pub session_idle_timeout_secs: u64,
    pub session_sweep_interval_secs: u64,
    /// Payment provider; a simulated gateway is used when unset.
    pub payment_url: Option<String>,
    pub payment_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: None,
            jwt_secret: "your-secret-key".to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES.iter().map(|s| s.to_string()).collect(),
            upscaler_url: None,
            upscaler_api_token: None,
            upscaler_model_version: DEFAULT_MODEL_VERSION.to_string(),
            upscale_factor: 2,
            upscaler_poll_interval_ms: 1000,
            upscaler_max_polls: 600,
            session_idle_timeout_secs: 30 * 60,
            session_sweep_interval_secs: 60,
            payment_url: None,
            payment_api_key: None,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: optional("DATABASE_URL"),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "your-secret-key".to_string()),
            max_file_size: env::var("MAX_FILE_SIZE")
                .unwrap_or_else(|_| DEFAULT_MAX_FILE_SIZE.to_string()) // 10MB
                .parse()?,
            allowed_mime_types: env::var("ALLOWED_MIME_TYPES")
                .unwrap_or_else(|_| DEFAULT_ALLOWED_MIME_TYPES.join(","))
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            upscaler_url: optional("UPSCALER_URL"),
            upscaler_api_token: optional("UPSCALER_API_TOKEN"),
            upscaler_model_version: env::var("UPSCALER_MODEL_VERSION")
                .unwrap_or_else(|_| DEFAULT_MODEL_VERSION.to_string()),
            upscale_factor: env::var("UPSCALE_FACTOR")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            upscaler_poll_interval_ms: env::var("UPSCALER_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            upscaler_max_polls: env::var("UPSCALER_MAX_POLLS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()?,
            session_idle_timeout_secs: env::var("SESSION_IDLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()?,
            session_sweep_interval_secs: env::var("SESSION_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            payment_url: optional("PAYMENT_URL"),
            payment_api_key: optional("PAYMENT_API_KEY"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            bail!("MAX_FILE_SIZE must be greater than zero");
        }
        if self.allowed_mime_types.is_empty() {
            bail!("ALLOWED_MIME_TYPES must list at least one image type");
        }
        if let Some(other) = self.allowed_mime_types.iter().find(|m| !m.starts_with("image/")) {
            bail!("ALLOWED_MIME_TYPES may only contain image types, found '{}'", other);
        }
        if !upscaler::is_supported_scale(self.upscale_factor) {
            bail!("UPSCALE_FACTOR must be 2, 4 or 8");
        }
        if self.upscaler_max_polls == 0 {
            bail!("UPSCALER_MAX_POLLS must be greater than zero");
        }
        if self.session_sweep_interval_secs == 0 {
            bail!("SESSION_SWEEP_INTERVAL_SECS must be greater than zero");
        }
        Ok(())
    }
}
