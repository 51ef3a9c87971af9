//! ---
//! plcsim_section: "01-core-functionality"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Runtime configuration for the simulation and ingest services."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::queues::DEFAULT_QUEUE_PREFIX;

fn default_lines_dir() -> PathBuf {
    PathBuf::from("configs/lines")
}

fn default_update_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(5000)
}

fn default_bad_quality_probability() -> f64 {
    0.02
}

fn default_watch() -> bool {
    true
}

fn default_watch_poll_interval() -> Duration {
    Duration::from_millis(2000)
}

fn default_watch_debounce() -> Duration {
    Duration::from_millis(250)
}

fn default_queue_prefix() -> String {
    DEFAULT_QUEUE_PREFIX.to_owned()
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_retry_attempts() -> u32 {
    10
}

fn default_dedup_ttl() -> Duration {
    Duration::from_millis(3_600_000)
}

fn default_measurement() -> String {
    "plc_data".to_owned()
}

fn default_quality_measurement() -> String {
    "message_quality".to_owned()
}

fn default_ingest_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the plcsim runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "PLCSIM_CONFIG";

    /// Load configuration from disk, respecting the `PLCSIM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        self.publisher.validate()?;
        if self.validation.dedup_ttl.is_zero() {
            return Err(anyhow!("validation.dedup_ttl_ms must be greater than zero"));
        }
        if self.ingest.poll_interval.is_zero() {
            return Err(anyhow!("ingest.poll_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_lines_dir")]
    pub lines_dir: PathBuf,
    #[serde(rename = "update_interval_ms", default = "default_update_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub update_interval: Duration,
    #[serde(rename = "heartbeat_interval_ms", default = "default_heartbeat_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_bad_quality_probability")]
    pub bad_quality_probability: f64,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default = "default_watch")]
    pub watch: bool,
    #[serde(rename = "watch_poll_interval_ms", default = "default_watch_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub watch_poll_interval: Duration,
    #[serde(rename = "watch_debounce_ms", default = "default_watch_debounce")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub watch_debounce: Duration,
}

impl SimulationConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.bad_quality_probability) {
            return Err(anyhow!(
                "simulation.bad_quality_probability must lie within [0, 1], got {}",
                self.bad_quality_probability
            ));
        }
        if self.update_interval.is_zero() || self.heartbeat_interval.is_zero() {
            return Err(anyhow!("simulation tick intervals must be greater than zero"));
        }
        if self.watch && self.watch_poll_interval.is_zero() {
            return Err(anyhow!(
                "simulation.watch_poll_interval_ms must be greater than zero when watching"
            ));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            lines_dir: default_lines_dir(),
            update_interval: default_update_interval(),
            heartbeat_interval: default_heartbeat_interval(),
            bad_quality_probability: default_bad_quality_probability(),
            random_seed: None,
            watch: default_watch(),
            watch_poll_interval: default_watch_poll_interval(),
            watch_debounce: default_watch_debounce(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(rename = "retry_delay_ms", default = "default_retry_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_delay: Duration,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default)]
    pub broker_addr: Option<String>,
}

impl PublisherConfig {
    fn validate(&self) -> Result<()> {
        if self.queue_prefix.trim().is_empty() {
            return Err(anyhow!("publisher.queue_prefix must not be empty"));
        }
        if self.buffer_capacity == 0 {
            return Err(anyhow!("publisher.buffer_capacity must be greater than zero"));
        }
        if self.max_retry_attempts == 0 {
            return Err(anyhow!("publisher.max_retry_attempts must be greater than zero"));
        }
        if self.retry_delay.is_zero() {
            return Err(anyhow!("publisher.retry_delay_ms must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_prefix: default_queue_prefix(),
            buffer_capacity: default_buffer_capacity(),
            retry_delay: default_retry_delay(),
            max_retry_attempts: default_max_retry_attempts(),
            broker_addr: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(rename = "dedup_ttl_ms", default = "default_dedup_ttl")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub dedup_ttl: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            dedup_ttl: default_dedup_ttl(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_quality_measurement")]
    pub quality_measurement: String,
    #[serde(rename = "poll_interval_ms", default = "default_ingest_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub sink_url: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            measurement: default_measurement(),
            quality_measurement: default_quality_measurement(),
            poll_interval: default_ingest_poll_interval(),
            sink_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.simulation.update_interval, Duration::from_millis(1000));
        assert_eq!(config.simulation.heartbeat_interval, Duration::from_millis(5000));
        assert_eq!(config.publisher.queue_prefix, "plc_data_");
        assert_eq!(config.publisher.buffer_capacity, 10_000);
        assert_eq!(config.publisher.max_retry_attempts, 10);
        assert_eq!(config.validation.dedup_ttl, Duration::from_secs(3600));
        assert_eq!(config.ingest.quality_measurement, "message_quality");
        assert!(config.simulation.random_seed.is_none());
    }

    #[test]
    fn millisecond_fields_are_parsed() {
        let config: AppConfig = r#"
            [simulation]
            update_interval_ms = 250
            random_seed = 7

            [publisher]
            retry_delay_ms = 50
            broker_addr = "127.0.0.1:5673"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.simulation.update_interval, Duration::from_millis(250));
        assert_eq!(config.simulation.random_seed, Some(7));
        assert_eq!(config.publisher.retry_delay, Duration::from_millis(50));
        assert_eq!(config.publisher.broker_addr.as_deref(), Some("127.0.0.1:5673"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!("[simulation]\nbad_quality_probability = 1.5"
            .parse::<AppConfig>()
            .is_err());
        assert!("[publisher]\nbuffer_capacity = 0".parse::<AppConfig>().is_err());
        assert!("[publisher]\nqueue_prefix = \"\"".parse::<AppConfig>().is_err());
        assert!("[simulation]\nupdate_interval_ms = 0".parse::<AppConfig>().is_err());
    }

    #[test]
    fn load_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plcsim.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[publisher]\nbuffer_capacity = 3").unwrap();

        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.publisher.buffer_capacity, 3);
    }
}
