use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::batch::ConcurrencyPolicy;

pub const DEFAULT_EXTRACTION_MODEL: &str = "gpt-4";
pub const DEFAULT_EXTRACTION_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_GEOCODING_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
pub const DEFAULT_BATCH_SIZE: usize = 250;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_TELEMETRY_BATCH_SIZE: usize = 25;
const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub openai_api_key: Option<SecretString>,
    pub google_maps_api_key: Option<SecretString>,
    pub extraction_model: String,
    pub extraction_endpoint: String,
    pub geocoding_endpoint: String,
    pub batch_size: usize,
    pub resolve_concurrency: usize,
    pub remote_timeout_ms: u64,
    pub data_dir: PathBuf,
    pub telemetry_enabled: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub extraction_model: String,
    pub extraction_endpoint: String,
    pub geocoding_endpoint: String,
    pub batch_size: usize,
    pub resolve_concurrency: usize,
    pub remote_timeout_ms: u64,
    pub data_dir: String,
    pub telemetry_enabled: bool,
    pub has_openai_key: bool,
    pub has_google_maps_key: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            google_maps_api_key: None,
            extraction_model: DEFAULT_EXTRACTION_MODEL.to_string(),
            extraction_endpoint: DEFAULT_EXTRACTION_ENDPOINT.to_string(),
            geocoding_endpoint: DEFAULT_GEOCODING_ENDPOINT.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            resolve_concurrency: 1,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            data_dir: PathBuf::from(".location-mapper"),
            telemetry_enabled: true,
            telemetry_batch_size: DEFAULT_TELEMETRY_BATCH_SIZE,
            telemetry_buffer_max_bytes: DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            openai_api_key: parse_secret("OPENAI_API_KEY"),
            google_maps_api_key: parse_secret("GOOGLE_MAPS_API_KEY"),
            extraction_model: parse_string("EXTRACTION_MODEL", defaults.extraction_model),
            extraction_endpoint: parse_string(
                "EXTRACTION_ENDPOINT",
                defaults.extraction_endpoint,
            ),
            geocoding_endpoint: parse_string("GEOCODING_ENDPOINT", defaults.geocoding_endpoint),
            batch_size: parse_usize("BATCH_SIZE", defaults.batch_size).max(1),
            resolve_concurrency: parse_usize("RESOLVE_CONCURRENCY", defaults.resolve_concurrency)
                .max(1),
            remote_timeout_ms: parse_u64("REMOTE_TIMEOUT_MS", defaults.remote_timeout_ms).max(1),
            data_dir: env::var("LOCATION_MAPPER_DATA_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            telemetry_enabled: parse_bool("TELEMETRY_ENABLED", defaults.telemetry_enabled),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", defaults.telemetry_batch_size)
                .max(1),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                defaults.telemetry_buffer_max_bytes,
            ),
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn concurrency_policy(&self) -> ConcurrencyPolicy {
        ConcurrencyPolicy::from_limit(self.resolve_concurrency)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            extraction_model: self.extraction_model.clone(),
            extraction_endpoint: self.extraction_endpoint.clone(),
            geocoding_endpoint: self.geocoding_endpoint.clone(),
            batch_size: self.batch_size,
            resolve_concurrency: self.resolve_concurrency,
            remote_timeout_ms: self.remote_timeout_ms,
            data_dir: self.data_dir.to_string_lossy().to_string(),
            telemetry_enabled: self.telemetry_enabled,
            has_openai_key: self.openai_api_key.is_some(),
            has_google_maps_key: self.google_maps_api_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::from(v.trim().to_string()))
}

fn parse_string(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("OPENAI_API_KEY", "sk-secret");
        env::set_var("GOOGLE_MAPS_API_KEY", "maps-secret");
        env::set_var("EXTRACTION_MODEL", "gpt-4o-mini");
        env::set_var("BATCH_SIZE", "0");
        env::set_var("RESOLVE_CONCURRENCY", "8");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.extraction_model, "gpt-4o-mini");
        assert_eq!(public.batch_size, 1);
        assert_eq!(public.resolve_concurrency, 8);
        assert!(public.has_openai_key);
        assert!(public.has_google_maps_key);
        assert_eq!(config.concurrency_policy(), ConcurrencyPolicy::Bounded(8));

        let rendered = serde_json::to_string(&public).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains("maps-secret"));
    }

    #[test]
    fn defaults_are_sequential_without_credentials() {
        let config = AppConfig::default();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.concurrency_policy(), ConcurrencyPolicy::Sequential);
        assert_eq!(config.remote_timeout(), Duration::from_secs(30));
        assert!(config.openai_api_key.is_none());
        assert!(config.google_maps_api_key.is_none());
    }
}
