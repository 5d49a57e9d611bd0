//! Configuration Module
//!
//! Configuration loading for the oracle service.

mod settings;

pub use settings::{
    AggregationSettings, ConfigError, OracleConfig, PublisherCredential, QueueSettings,
    ServerSettings,
};
