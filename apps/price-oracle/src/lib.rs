#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )
)]

//! Price Oracle - JSON-RPC Price Aggregation Service
//!
//! Publishers submit price quotes for catalogued instruments over a
//! websocket JSON-RPC API. The oracle aggregates the quotes of each
//! instrument into a consensus price and pushes every change to
//! subscribed sessions.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure state and rules
//!   - `instrument`: Catalog and symbol/account lookup
//!   - `aggregation`: Quote books, consensus model, twap/twac
//!   - `subscription`: Subscription table
//!
//! - **Application**: Request handling and port definitions
//!   - `rpc`: JSON-RPC 2.0 messages and codec
//!   - `ports`: Price store interface
//!   - `services`: Dispatcher, sessions, commit queue, schedule ticker
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: Websocket server bridging sockets to sessions
//!   - `store`: In-memory price store
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Publisher ──update_price──┐
//!                           ▼
//!                    ┌─────────────┐  on change   ┌──────────────┐
//! Client ──────────► │ Dispatcher  │────────────► │ Subscription │──► notify_price
//!   subscribe_price  │ + Aggregator│              │    Table     │──► notify_price_sched
//!                    └─────────────┘              └──────────────┘
//!                           │
//!                           ▼
//!                    Commit queue ──► PriceStore
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Instruments, aggregation and subscriptions.
pub mod domain;

/// Application layer - Request handling and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregation::{
    Aggregate, AggregationPolicy, Aggregator, PriceStatus, QuoteSubmission, SubmitError,
    SubmitOutcome,
};
pub use domain::instrument::{Catalog, Instrument, InstrumentRegistry, RegistryError};
pub use domain::subscription::{
    Channel, SessionId, Subscription, SubscriptionId, SubscriptionStats, SubscriptionTable,
};

// Application
pub use application::ports::{PriceStore, StoreError};
pub use application::rpc::{Method, RpcError};
pub use application::services::{
    CommitQueue, Dispatcher, DispatcherConfig, SchedulePolicy, Session, SessionStream,
    run_schedule,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, OracleConfig};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::websocket::{TransportError, TransportState, WebSocketServer, serve};

// Store
pub use infrastructure::store::InMemoryPriceStore;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
