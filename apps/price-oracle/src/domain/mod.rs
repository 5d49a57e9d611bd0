//! Domain Layer - Instruments, aggregation and subscriptions.
//!
//! Pure state and rules with no I/O. Shared state is guarded with
//! `parking_lot` locks so the application layer can call in from any task.

/// Instrument catalog and lookups.
pub mod instrument;

/// Per-instrument price aggregation.
pub mod aggregation;

/// Subscription tracking.
pub mod subscription;
