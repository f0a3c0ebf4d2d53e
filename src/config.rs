use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Tunables for the export pipeline. Defaults are sized so that one page of
/// work finishes inside the request budget of a serverless host.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub fetch_timeout: Duration,
    pub fetch_max_bytes: u64,
    pub fetch_max_attempts: u32,
    pub fetch_retry_base_delay: Duration,
    pub batch_size: usize,
    pub batch_concurrency: usize,
    pub chunk_size: usize,
    pub chunk_concurrency: usize,
    pub max_export_photos: usize,
    pub max_image_pixels: u64,
    pub request_budget: Duration,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            fetch_max_bytes: 50 * 1024 * 1024,
            fetch_max_attempts: 2,
            fetch_retry_base_delay: Duration::from_millis(250),
            batch_size: 40,
            batch_concurrency: 3,
            chunk_size: 50,
            chunk_concurrency: 5,
            max_export_photos: 500,
            max_image_pixels: 100_000_000,
            request_budget: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub db_path: String,
    pub identity_header: String,
    pub export: ExportSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = ExportSettings::default();

        let export = ExportSettings {
            fetch_timeout: Duration::from_secs(env_or("FETCH_TIMEOUT_SECS", 10)?),
            fetch_max_bytes: env_or("FETCH_MAX_BYTES", defaults.fetch_max_bytes)?,
            fetch_max_attempts: env_or("FETCH_MAX_ATTEMPTS", defaults.fetch_max_attempts)?
                .max(1),
            fetch_retry_base_delay: Duration::from_millis(env_or(
                "FETCH_RETRY_BASE_DELAY_MS",
                250,
            )?),
            batch_size: env_or("BATCH_SIZE", defaults.batch_size)?.max(1),
            batch_concurrency: env_or("BATCH_CONCURRENCY", defaults.batch_concurrency)?.max(1),
            chunk_size: env_or("CHUNK_SIZE", defaults.chunk_size)?.max(1),
            chunk_concurrency: env_or("CHUNK_CONCURRENCY", defaults.chunk_concurrency)?.max(1),
            max_export_photos: env_or("MAX_EXPORT_PHOTOS", defaults.max_export_photos)?,
            max_image_pixels: env_or("MAX_IMAGE_PIXELS", defaults.max_image_pixels)?,
            request_budget: Duration::from_secs(env_or("REQUEST_BUDGET_SECS", 60)?),
        };

        Ok(Config {
            port: env_or("PORT", 18480)?,
            host: env_string("HOST", "0.0.0.0"),
            db_path: env_string("DB_PATH", "./data/watermark-export.db"),
            identity_header: env_string("IDENTITY_HEADER", "x-user-id").to_lowercase(),
            export,
        })
    }
}

const ENV_PREFIX: &str = "WATERMARK_EXPORT_";

fn env_string(name: &str, default: &str) -> String {
    env::var(format!("{}{}", ENV_PREFIX, name)).unwrap_or_else(|_| default.to_string())
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{}{}", ENV_PREFIX, name);
    match env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}
