//! Oracle Configuration Settings
//!
//! Configuration types for the oracle, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::dispatcher::{DispatcherConfig, SchedulePolicy};
use crate::domain::aggregation::AggregationPolicy;
use crate::domain::aggregation::twap::DecayParams;

/// Default publisher identity for sessions that present none.
#[derive(Clone, PartialEq, Eq)]
pub struct PublisherCredential {
    key: String,
}

impl PublisherCredential {
    /// Create a credential.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self { key }
    }

    /// Get the publisher key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for PublisherCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherCredential")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Websocket JSON-RPC port.
    pub ws_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8910,
            health_port: 8082,
        }
    }
}

/// Aggregation tuning.
#[derive(Debug, Clone)]
pub struct AggregationSettings {
    /// Confidence threshold divisor (0 disables the check).
    pub conf_divisor: u64,
    /// Submissions after which a silent publisher's quote is stale.
    pub max_quote_lag: u64,
    /// twap/twac half-life, in submissions.
    pub twap_half_life: u64,
    /// Gap after which twap/twac re-seed, in submissions.
    pub twap_max_gap: u64,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        let policy = AggregationPolicy::default();
        Self {
            conf_divisor: policy.conf_divisor,
            max_quote_lag: policy.max_quote_lag,
            twap_half_life: policy.decay.half_life,
            twap_max_gap: policy.decay.max_gap,
        }
    }
}

impl AggregationSettings {
    /// Aggregation policy for these settings.
    #[must_use]
    pub const fn policy(&self) -> AggregationPolicy {
        AggregationPolicy {
            conf_divisor: self.conf_divisor,
            max_quote_lag: self.max_quote_lag,
            decay: DecayParams {
                half_life: self.twap_half_life,
                max_gap: self.twap_max_gap,
            },
        }
    }
}

/// Queue bounds and notification cadence.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Per-session outbound queue bound.
    pub outbound_capacity: usize,
    /// Bound on queued commits.
    pub commit_capacity: usize,
    /// `price_sched` cadence (`None` = update-driven).
    pub sched_interval: Option<Duration>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 1024,
            commit_capacity: 4096,
            sched_interval: None,
        }
    }
}

impl QueueSettings {
    /// Dispatcher configuration for these settings.
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            outbound_capacity: self.outbound_capacity,
            schedule: self
                .sched_interval
                .map_or(SchedulePolicy::UpdateDriven, SchedulePolicy::Interval),
        }
    }
}

/// Complete oracle configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Instrument catalog file.
    pub catalog_path: PathBuf,
    /// Identity for sessions that present none.
    pub default_publisher: Option<PublisherCredential>,
    /// Server port settings.
    pub server: ServerSettings,
    /// Aggregation tuning.
    pub aggregation: AggregationSettings,
    /// Queue settings.
    pub queues: QueueSettings,
}

impl OracleConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `ORACLE_CATALOG_PATH` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let catalog_path = std::env::var("ORACLE_CATALOG_PATH")
            .map_err(|_| ConfigError::MissingEnvVar("ORACLE_CATALOG_PATH".to_string()))?;

        if catalog_path.trim().is_empty() {
            return Err(ConfigError::EmptyValue("ORACLE_CATALOG_PATH".to_string()));
        }

        let default_publisher = std::env::var("ORACLE_PUBLISHER_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(PublisherCredential::new);

        let server = ServerSettings {
            ws_port: parse_env_u16("ORACLE_WS_PORT", ServerSettings::default().ws_port),
            health_port: parse_env_u16(
                "ORACLE_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let defaults = AggregationSettings::default();
        let aggregation = AggregationSettings {
            conf_divisor: parse_env_u64("ORACLE_CONF_DIVISOR", defaults.conf_divisor),
            max_quote_lag: parse_env_u64("ORACLE_MAX_QUOTE_LAG", defaults.max_quote_lag),
            twap_half_life: parse_env_u64("ORACLE_TWAP_HALF_LIFE", defaults.twap_half_life),
            twap_max_gap: parse_env_u64("ORACLE_TWAP_MAX_GAP", defaults.twap_max_gap),
        };

        let queues = QueueSettings {
            outbound_capacity: parse_env_usize(
                "ORACLE_OUTBOUND_QUEUE_CAPACITY",
                QueueSettings::default().outbound_capacity,
            ),
            commit_capacity: parse_env_usize(
                "ORACLE_COMMIT_QUEUE_CAPACITY",
                QueueSettings::default().commit_capacity,
            ),
            sched_interval: parse_env_interval_millis("ORACLE_SCHED_INTERVAL_MS"),
        };

        Ok(Self {
            catalog_path: PathBuf::from(catalog_path),
            default_publisher,
            server,
            aggregation,
            queues,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// Zero or unset means no interval
fn parse_env_interval_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
}
