//! Configuration for the in-process cache benchmark.

use deltacache::CacheConfig;
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    /// Cache construction parameters, passed to the cache as is.
    #[serde(default)]
    pub cache: CacheConfig,
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// General benchmark settings.
#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    /// How long to run the measurement phase.
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    /// How long to warm up before recording metrics.
    #[serde(
        default = "default_warmup",
        deserialize_with = "deserialize_duration"
    )]
    pub warmup: Duration,
    /// Number of worker threads.
    pub threads: usize,
}

/// Workload configuration.
#[derive(Debug, Deserialize)]
pub struct WorkloadConfig {
    /// Whether to prefill the cache before measurement.
    #[serde(default)]
    pub prefill: bool,
    /// Keyspace parameters.
    pub keyspace: KeyspaceConfig,
    /// Command mix (must sum to 100).
    pub commands: CommandsConfig,
}

/// Keyspace configuration.
#[derive(Debug, Deserialize)]
pub struct KeyspaceConfig {
    /// Number of distinct keys.
    pub count: usize,
}

/// Command mix (percentages, must sum to 100).
#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    pub get: u8,
    pub put: u8,
    pub remove: u8,
}

/// Log output settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
    pub timestamps: bool,
    pub target: bool,
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            timestamps: true,
            target: false,
            thread_names: true,
        }
    }
}

/// Log line format.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

fn default_warmup() -> Duration {
    Duration::ZERO
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config = toml::from_str(contents)?;

        // Validate command mix
        let total = config.workload.commands.get as u16
            + config.workload.commands.put as u16
            + config.workload.commands.remove as u16;
        if total != 100 {
            return Err(format!(
                "command mix must sum to 100 (got {}): get={} put={} remove={}",
                total,
                config.workload.commands.get,
                config.workload.commands.put,
                config.workload.commands.remove,
            )
            .into());
        }

        if config.general.threads == 0 {
            return Err("threads must be at least 1".into());
        }

        let count = config.workload.keyspace.count;
        if count == 0 || count > u32::MAX as usize {
            return Err(format!("keyspace count must be 1..=2^32-1 (got {count})").into());
        }

        Ok(config)
    }
}

/// Deserialize a duration from a human-readable string (e.g., "60s", "5m").
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}
