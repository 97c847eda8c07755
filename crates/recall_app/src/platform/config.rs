//! `recall.ron`: every knob the host bridge exposes. Absent fields take their
//! defaults, and so does an absent file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;
use recall_core::CorrelationSettings;
use recall_engine::{
    DeliverySettings, EngineConfig, ExtractSettings, PipelineSettings, QueueSettings,
    DEFAULT_OFFLINE_CAPACITY,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LogTarget {
    Terminal,
    File,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct LogConfig {
    pub target: LogTarget,
    pub level: LogLevel,
    /// Used by the `File` and `Both` targets.
    pub file: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            target: LogTarget::Terminal,
            level: LogLevel::Info,
            file: PathBuf::from("recall.log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    /// Base URL of the memory store; the submit paths are joined onto it.
    pub endpoint: String,
    pub subject_id: String,
    pub correlation_enabled: bool,
    pub correlation_timeout_secs: u64,
    pub safety_ratio: f64,
    pub safety_min_delta: usize,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    pub rate_limit_status: u16,
    /// Holds the offline store and the taught rules.
    pub data_dir: PathBuf,
    pub offline_capacity: usize,
    pub sweep_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let delivery = DeliverySettings::default();
        let queue = QueueSettings::default();
        let extract = ExtractSettings::default();
        let correlation = CorrelationSettings::default();
        Self {
            endpoint: delivery.base_url,
            subject_id: correlation.subject_id,
            correlation_enabled: correlation.enabled,
            correlation_timeout_secs: correlation.timeout.as_secs(),
            safety_ratio: extract.safety_ratio,
            safety_min_delta: extract.safety_min_delta,
            initial_interval_ms: duration_ms(queue.initial_interval),
            max_interval_ms: duration_ms(queue.max_interval),
            max_attempts: queue.max_attempts,
            request_timeout_secs: delivery.request_timeout.as_secs(),
            rate_limit_status: delivery.rate_limit_status,
            data_dir: PathBuf::from("recall_data"),
            offline_capacity: DEFAULT_OFFLINE_CAPACITY,
            sweep_interval_secs: 15,
            shutdown_grace_secs: 5,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub(crate) fn to_engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default_with_data_dir(self.data_dir.clone());
        config.delivery = DeliverySettings {
            base_url: self.endpoint.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            rate_limit_status: self.rate_limit_status,
            ..DeliverySettings::default()
        };
        config.queue = QueueSettings {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            max_attempts: self.max_attempts.max(1),
        };
        config.pipeline = PipelineSettings {
            extract: ExtractSettings {
                safety_ratio: self.safety_ratio,
                safety_min_delta: self.safety_min_delta,
            },
            correlation: CorrelationSettings {
                enabled: self.correlation_enabled,
                timeout: Duration::from_secs(self.correlation_timeout_secs),
                subject_id: self.subject_id.clone(),
            },
        };
        config.offline_capacity = self.offline_capacity;
        config.sweep_interval = Duration::from_secs(self.sweep_interval_secs.max(1));
        config.shutdown_grace = Duration::from_secs(self.shutdown_grace_secs);
        config
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(AppConfig::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    ron::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
