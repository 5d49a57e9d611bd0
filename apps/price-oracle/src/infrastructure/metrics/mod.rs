//! Prometheus Metrics Module
//!
//! Exposes oracle metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Requests**: JSON-RPC requests by method and errors by code
//! - **Updates**: Price submissions and whether they changed the aggregate
//! - **Notifications**: Delivered and dropped notifications
//! - **Sessions**: Live sessions, subscriptions and overflow closes
//! - **Persistence**: Dropped and failed commits
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_oracle_requests_total",
        "Total JSON-RPC requests by method"
    );
    describe_counter!(
        "price_oracle_errors_total",
        "Total JSON-RPC error responses by code"
    );
    describe_counter!(
        "price_oracle_updates_total",
        "Total accepted price submissions by outcome"
    );

    describe_counter!(
        "price_oracle_notifications_sent_total",
        "Total notifications queued to sessions"
    );
    describe_counter!(
        "price_oracle_notifications_dropped_total",
        "Total notifications dropped by reason"
    );

    describe_gauge!("price_oracle_sessions", "Number of open sessions");
    describe_gauge!(
        "price_oracle_subscriptions",
        "Number of live subscriptions"
    );
    describe_counter!(
        "price_oracle_sessions_overflowed_total",
        "Total sessions closed because their outbound queue overflowed"
    );

    describe_counter!(
        "price_oracle_commit_queue_dropped_total",
        "Total commits dropped because the commit queue was full"
    );
    describe_counter!(
        "price_oracle_commit_failures_total",
        "Total commits rejected by the price store"
    );

    describe_histogram!(
        "price_oracle_submit_seconds",
        "Time to apply a price submission and fan out notifications"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for notification kinds.
#[derive(Debug, Clone, Copy)]
pub enum NotificationKind {
    /// Aggregate price notification.
    Price,
    /// Submission slot notification.
    PriceSched,
}

impl NotificationKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "notify_price",
            Self::PriceSched => "notify_price_sched",
        }
    }
}

/// Metric labels for dropped notifications.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Target session is gone.
    SessionClosed,
    /// Target session's outbound queue is full.
    Overflow,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SessionClosed => "session_closed",
            Self::Overflow => "overflow",
        }
    }
}

/// Record a JSON-RPC request.
pub fn record_request(method: &'static str) {
    counter!("price_oracle_requests_total", "method" => method).increment(1);
}

/// Record a JSON-RPC error response.
pub fn record_error(code: i64) {
    counter!("price_oracle_errors_total", "code" => code.to_string()).increment(1);
}

/// Record an accepted submission.
pub fn record_update(changed: bool) {
    let outcome = if changed { "changed" } else { "unchanged" };
    counter!("price_oracle_updates_total", "outcome" => outcome).increment(1);
}

/// Record a notification queued to a session.
pub fn record_notification_sent(kind: NotificationKind) {
    counter!(
        "price_oracle_notifications_sent_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a dropped notification.
pub fn record_notification_dropped(kind: NotificationKind, reason: DropReason) {
    counter!(
        "price_oracle_notifications_dropped_total",
        "kind" => kind.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the open session count.
pub fn set_sessions(count: f64) {
    gauge!("price_oracle_sessions").set(count);
}

/// Update the live subscription count.
pub fn set_subscriptions(count: f64) {
    gauge!("price_oracle_subscriptions").set(count);
}

/// Record a session closed by outbound queue overflow.
pub fn record_session_overflow() {
    counter!("price_oracle_sessions_overflowed_total").increment(1);
}

/// Record a commit dropped by a full commit queue.
pub fn record_commit_dropped() {
    counter!("price_oracle_commit_queue_dropped_total").increment(1);
}

/// Record a commit rejected by the store.
pub fn record_commit_failed() {
    counter!("price_oracle_commit_failures_total").increment(1);
}

/// Record submission processing duration.
pub fn record_submit_duration(duration: Duration) {
    histogram!("price_oracle_submit_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
