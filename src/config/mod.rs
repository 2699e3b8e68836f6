use std::env;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub storage: StorageConfig,
    pub recorder: RecorderConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

/// On-disk layout configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory holding the audit log and per-journey documents.
    pub log_dir: PathBuf,
}

/// Bounds applied by the journey recorder
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Maximum stages per journey, including the terminal completion event.
    pub max_stages_per_journey: usize,
    /// Serialized payload size above which stage payloads are truncated.
    pub max_payload_bytes: usize,
    /// Maximum in-progress journeys kept in memory.
    pub max_in_flight: usize,
}

/// Retention horizon for persisted journeys
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention_days: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let storage = StorageConfig {
            log_dir: PathBuf::from(
                env::var("JOURNEY_LOG_DIR").unwrap_or_else(|_| "./logs".to_string()),
            ),
        };

        let defaults = RecorderConfig::default();
        let recorder = RecorderConfig {
            max_stages_per_journey: parse_var(
                "JOURNEY_MAX_STAGES",
                defaults.max_stages_per_journey,
            ),
            max_payload_bytes: parse_var("JOURNEY_MAX_PAYLOAD_BYTES", defaults.max_payload_bytes),
            max_in_flight: parse_var("JOURNEY_MAX_IN_FLIGHT", defaults.max_in_flight),
        };

        if recorder.max_stages_per_journey < 2 {
            return Err(AppError::Config {
                message: "JOURNEY_MAX_STAGES must be at least 2".to_string(),
            });
        }
        if recorder.max_in_flight == 0 {
            return Err(AppError::Config {
                message: "JOURNEY_MAX_IN_FLIGHT must be greater than 0".to_string(),
            });
        }

        let retention = RetentionConfig {
            retention_days: parse_var(
                "JOURNEY_RETENTION_DAYS",
                RetentionConfig::default().retention_days,
            ),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        Ok(Config {
            storage,
            recorder,
            retention,
            logging,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_stages_per_journey: 256,
            max_payload_bytes: 256 * 1024,
            max_in_flight: 1024,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
