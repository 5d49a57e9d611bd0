//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Dispatcher`: Routes requests and fans out notifications
//! - `Session`: Per-connection outbound queue
//! - `CommitQueue`: Forwards aggregate changes to the price store
//! - `run_schedule`: Interval-driven `price_sched` notifications

/// Outbound commit worker.
pub mod committer;

/// Request router and notification fan-out.
pub mod dispatcher;

/// Interval ticker for submission slots.
pub mod schedule;

/// Connection sessions.
pub mod session;

pub use committer::{CommitQueue, CommitRequest};
pub use dispatcher::{Dispatcher, DispatcherConfig, SchedulePolicy};
pub use schedule::run_schedule;
pub use session::{Delivery, Outbox, Session, SessionState, SessionStream};
