//! Env-driven process configuration (C12).
//!
//! Grounded on the teacher's `config.rs::Config::from_env` idiom: every setting has a typed
//! parser with a documented default, required settings fail loudly and by name, and tests
//! serialize env-var mutation behind one mutex so they can run in the same binary.

use std::{env, path::PathBuf, time::Duration};

use thiserror::Error;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    analysis_config_dir: PathBuf,
    config_poll_interval: Duration,
    config_debounce: Duration,

    job_driver_base_url: String,
    job_driver_token: Option<String>,
    job_driver_connect_timeout: Duration,
    job_driver_total_timeout: Duration,
    job_driver_max_retries: usize,
    job_driver_backoff_base_ms: u64,
    job_driver_backoff_cap_ms: u64,

    model_provider_base_url: String,
    model_provider_timeout: Duration,

    qa_semaphore_capacity: usize,
    corrective_aggregate_threshold: f64,

    engine_max_concurrency: usize,
    engine_gpu_cores: usize,
    engine_job_timeout: Duration,

    worker_concurrency: usize,
    worker_idle_backoff: Duration,

    otel_exporter_endpoint: Option<String>,
    otel_sampling_ratio: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// Load and validate process configuration from the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a required variable is missing or a value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let analysis_config_dir = env_var("ANALYSIS_CONFIG_DIR").map(PathBuf::from)?;
        let config_poll_interval = parse_duration_ms("CONFIG_POLL_INTERVAL_MS", 50)?;
        let config_debounce = parse_duration_ms("CONFIG_DEBOUNCE_MS", 200)?;

        let job_driver_base_url = env_var("JOB_DRIVER_BASE_URL")?;
        let job_driver_token = env::var("JOB_DRIVER_TOKEN").ok();
        let job_driver_connect_timeout = parse_duration_ms("JOB_DRIVER_CONNECT_TIMEOUT_MS", 3000)?;
        let job_driver_total_timeout = parse_duration_ms("JOB_DRIVER_TOTAL_TIMEOUT_MS", 30000)?;
        let job_driver_max_retries = parse_usize("JOB_DRIVER_MAX_RETRIES", 3)?;
        let job_driver_backoff_base_ms = parse_u64("JOB_DRIVER_BACKOFF_BASE_MS", 200)?;
        let job_driver_backoff_cap_ms = parse_u64("JOB_DRIVER_BACKOFF_CAP_MS", 2000)?;

        let model_provider_base_url = env_var("MODEL_PROVIDER_BASE_URL")?;
        let model_provider_timeout = parse_duration_secs("MODEL_PROVIDER_TIMEOUT_SECS", 60)?;

        let qa_semaphore_capacity = parse_usize("QA_SEMAPHORE_CAPACITY", 8)?;
        let corrective_aggregate_threshold = parse_f64("CORRECTIVE_AGGREGATE_THRESHOLD", 0.75)?;

        let engine_max_concurrency = parse_usize("ENGINE_MAX_CONCURRENCY", 8)?;
        let engine_gpu_cores = parse_usize("ENGINE_GPU_CORES", 16)?;
        let engine_job_timeout = parse_duration_secs("ENGINE_JOB_TIMEOUT_SECS", 60)?;

        let worker_concurrency = parse_usize("WORKER_CONCURRENCY", 8)?;
        let worker_idle_backoff = parse_duration_ms("WORKER_IDLE_BACKOFF_MS", 100)?;

        let otel_exporter_endpoint = env::var("OTEL_EXPORTER_ENDPOINT").ok();
        let otel_sampling_ratio = parse_f64("OTEL_SAMPLING_RATIO", 1.0)?;

        Ok(Self {
            analysis_config_dir,
            config_poll_interval,
            config_debounce,
            job_driver_base_url,
            job_driver_token,
            job_driver_connect_timeout,
            job_driver_total_timeout,
            job_driver_max_retries,
            job_driver_backoff_base_ms,
            job_driver_backoff_cap_ms,
            model_provider_base_url,
            model_provider_timeout,
            qa_semaphore_capacity,
            corrective_aggregate_threshold,
            engine_max_concurrency,
            engine_gpu_cores,
            engine_job_timeout,
            worker_concurrency,
            worker_idle_backoff,
            otel_exporter_endpoint,
            otel_sampling_ratio,
        })
    }

    #[must_use]
    pub fn analysis_config_dir(&self) -> &std::path::Path {
        &self.analysis_config_dir
    }

    #[must_use]
    pub fn config_poll_interval(&self) -> Duration {
        self.config_poll_interval
    }

    #[must_use]
    pub fn config_debounce(&self) -> Duration {
        self.config_debounce
    }

    #[must_use]
    pub fn job_driver_base_url(&self) -> &str {
        &self.job_driver_base_url
    }

    #[must_use]
    pub fn job_driver_token(&self) -> Option<&str> {
        self.job_driver_token.as_deref()
    }

    #[must_use]
    pub fn job_driver_connect_timeout(&self) -> Duration {
        self.job_driver_connect_timeout
    }

    #[must_use]
    pub fn job_driver_total_timeout(&self) -> Duration {
        self.job_driver_total_timeout
    }

    #[must_use]
    pub fn job_driver_max_retries(&self) -> usize {
        self.job_driver_max_retries
    }

    #[must_use]
    pub fn job_driver_backoff_base_ms(&self) -> u64 {
        self.job_driver_backoff_base_ms
    }

    #[must_use]
    pub fn job_driver_backoff_cap_ms(&self) -> u64 {
        self.job_driver_backoff_cap_ms
    }

    #[must_use]
    pub fn model_provider_base_url(&self) -> &str {
        &self.model_provider_base_url
    }

    #[must_use]
    pub fn model_provider_timeout(&self) -> Duration {
        self.model_provider_timeout
    }

    #[must_use]
    pub fn qa_semaphore_capacity(&self) -> usize {
        self.qa_semaphore_capacity
    }

    #[must_use]
    pub fn corrective_aggregate_threshold(&self) -> f64 {
        self.corrective_aggregate_threshold
    }

    #[must_use]
    pub fn engine_max_concurrency(&self) -> usize {
        self.engine_max_concurrency
    }

    #[must_use]
    pub fn engine_gpu_cores(&self) -> usize {
        self.engine_gpu_cores
    }

    #[must_use]
    pub fn engine_job_timeout(&self) -> Duration {
        self.engine_job_timeout
    }

    #[must_use]
    pub fn worker_concurrency(&self) -> usize {
        self.worker_concurrency
    }

    #[must_use]
    pub fn worker_idle_backoff(&self) -> Duration {
        self.worker_idle_backoff
    }

    #[must_use]
    pub fn otel_exporter_endpoint(&self) -> Option<&str> {
        self.otel_exporter_endpoint.as_deref()
    }

    #[must_use]
    pub fn otel_sampling_ratio(&self) -> f64 {
        self.otel_sampling_ratio
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(ms))
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let secs = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(secs))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_env(name: &str, value: &str) {
        // SAFETY: tests run sequentially under ENV_MUTEX and assign valid UTF-8 values.
        unsafe {
            env::set_var(name, value);
        }
    }

    fn remove_env(name: &str) {
        // SAFETY: tests run sequentially under ENV_MUTEX and clean up deterministic keys.
        unsafe {
            env::remove_var(name);
        }
    }

    fn reset_env() {
        for name in [
            "ANALYSIS_CONFIG_DIR",
            "CONFIG_POLL_INTERVAL_MS",
            "CONFIG_DEBOUNCE_MS",
            "JOB_DRIVER_BASE_URL",
            "JOB_DRIVER_TOKEN",
            "JOB_DRIVER_CONNECT_TIMEOUT_MS",
            "JOB_DRIVER_TOTAL_TIMEOUT_MS",
            "JOB_DRIVER_MAX_RETRIES",
            "MODEL_PROVIDER_BASE_URL",
            "MODEL_PROVIDER_TIMEOUT_SECS",
            "QA_SEMAPHORE_CAPACITY",
            "CORRECTIVE_AGGREGATE_THRESHOLD",
            "ENGINE_MAX_CONCURRENCY",
            "ENGINE_GPU_CORES",
            "ENGINE_JOB_TIMEOUT_SECS",
            "WORKER_CONCURRENCY",
            "WORKER_IDLE_BACKOFF_MS",
            "OTEL_EXPORTER_ENDPOINT",
            "OTEL_SAMPLING_RATIO",
        ] {
            remove_env(name);
        }
    }

    #[test]
    fn from_env_uses_defaults_when_optional_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("ANALYSIS_CONFIG_DIR", "/etc/vision-qa-worker/configs");
        set_env("JOB_DRIVER_BASE_URL", "http://localhost:8080/");
        set_env("MODEL_PROVIDER_BASE_URL", "http://localhost:11434/");

        let config = Config::from_env().expect("config should load");

        assert_eq!(
            config.analysis_config_dir(),
            std::path::Path::new("/etc/vision-qa-worker/configs")
        );
        assert_eq!(config.config_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.config_debounce(), Duration::from_millis(200));
        assert_eq!(config.job_driver_max_retries(), 3);
        assert_eq!(config.engine_max_concurrency(), 8);
        assert_eq!(config.engine_gpu_cores(), 16);
        assert_eq!(config.worker_concurrency(), 8);
        assert!((config.corrective_aggregate_threshold() - 0.75).abs() < f64::EPSILON);
        assert!(config.otel_exporter_endpoint().is_none());
    }

    #[test]
    fn from_env_overrides_values() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("ANALYSIS_CONFIG_DIR", "/tmp/configs");
        set_env("JOB_DRIVER_BASE_URL", "https://jobs.example.com/");
        set_env("MODEL_PROVIDER_BASE_URL", "https://model.example.com/");
        set_env("ENGINE_MAX_CONCURRENCY", "4");
        set_env("ENGINE_GPU_CORES", "3");
        set_env("WORKER_CONCURRENCY", "16");
        set_env("CORRECTIVE_AGGREGATE_THRESHOLD", "0.5");

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.engine_max_concurrency(), 4);
        assert_eq!(config.engine_gpu_cores(), 3);
        assert_eq!(config.worker_concurrency(), 16);
        assert!((config.corrective_aggregate_threshold() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn from_env_errors_when_config_dir_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("JOB_DRIVER_BASE_URL", "http://localhost:8080/");
        set_env("MODEL_PROVIDER_BASE_URL", "http://localhost:11434/");

        let error = Config::from_env().expect_err("missing config dir should fail");
        assert!(matches!(error, ConfigError::Missing("ANALYSIS_CONFIG_DIR")));
    }

    #[test]
    fn from_env_errors_when_job_driver_base_url_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("ANALYSIS_CONFIG_DIR", "/tmp/configs");
        set_env("MODEL_PROVIDER_BASE_URL", "http://localhost:11434/");

        let error = Config::from_env().expect_err("missing job driver url should fail");
        assert!(matches!(error, ConfigError::Missing("JOB_DRIVER_BASE_URL")));
    }
}
