//! Submission schedule ticker.
//!
//! Under [`SchedulePolicy::Interval`](super::dispatcher::SchedulePolicy)
//! `price_sched` subscribers are notified on a fixed cadence rather than
//! on aggregate changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;

/// Notify every `price_sched` subscription once per `period` until cancelled.
pub async fn run_schedule(dispatcher: Arc<Dispatcher>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    tracing::info!(period_ms = period.as_millis(), "Schedule ticker started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let notified = dispatcher.notify_schedule_all();
                tracing::trace!(notified, "Schedule tick");
            }
        }
    }

    tracing::info!("Schedule ticker stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::application::services::dispatcher::{DispatcherConfig, SchedulePolicy};
    use crate::domain::aggregation::AggregationPolicy;
    use crate::domain::instrument::{Catalog, InstrumentRegistry};

    #[tokio::test]
    async fn ticks_until_cancelled() {
        let catalog: Catalog = serde_json::from_value(json!({
            "products": [{
                "account": "prod-ltc",
                "attr_dict": { "symbol": "LTC/USD" },
                "price": [{ "account": "px-ltc", "price_exponent": -5, "publishers": ["pub-a"] }]
            }]
        }))
        .unwrap();
        let registry = Arc::new(InstrumentRegistry::from_catalog(&catalog).unwrap());
        let period = Duration::from_millis(10);
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            AggregationPolicy::default(),
            DispatcherConfig {
                schedule: SchedulePolicy::Interval(period),
                ..DispatcherConfig::default()
            },
        ));

        let (session, mut stream) = dispatcher.open_session(None);
        dispatcher.handle_payload(
            &session,
            r#"{"jsonrpc":"2.0","id":1,"method":"subscribe_price_sched","params":{"account":"px-ltc"}}"#,
        );
        // Reply and immediate slot
        stream.messages.recv().await.unwrap();
        stream.messages.recv().await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_schedule(Arc::clone(&dispatcher), period, cancel.clone()));

        for _ in 0..2 {
            let text = tokio::time::timeout(Duration::from_secs(5), stream.messages.recv())
                .await
                .unwrap()
                .unwrap();
            let message: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(message["method"], "notify_price_sched");
            assert_eq!(message["params"]["subscription"], 0);
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}
