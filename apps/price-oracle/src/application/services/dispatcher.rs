//! Dispatcher
//!
//! Routes session payloads to the registry, aggregator and subscription
//! table, and fans aggregate changes out to subscribers.
//!
//! # Ordering
//!
//! Fan-out runs inside the instrument lock held by
//! [`Aggregator::submit`], so every subscriber of an instrument observes
//! its aggregates in commit order. Delivery only queues onto the target
//! session's outbox and never waits.
//!
//! A new `price` subscription is activated after its reply is queued, under
//! the instrument lock, together with a snapshot of the current aggregate.
//! No change can slip between the snapshot and the first live notification.
//!
//! Lock order: instrument → subscription table → session map.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::application::rpc::messages::{
    PriceEntry, ProductEntry, SubscribeParams, SubscribeResult, UpdatePriceParams,
    notify_price, notify_price_sched, parse_params,
};
use crate::application::rpc::{self, Envelope, Method, Payload, Request, Response, RpcError};
use crate::application::services::committer::CommitQueue;
use crate::application::services::session::{Delivery, Outbox, Session, SessionStream};
use crate::domain::aggregation::{AggregationPolicy, Aggregate, Aggregator, QuoteSubmission};
use crate::domain::instrument::{AccountKey, Instrument, InstrumentRegistry, PublisherKey};
use crate::domain::subscription::{Channel, SessionId, SubscriptionId, SubscriptionTable};
use crate::infrastructure::metrics::{self, DropReason, NotificationKind};

// =============================================================================
// Configuration
// =============================================================================

/// When `price_sched` subscribers are notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulePolicy {
    /// Whenever an update changes the instrument's aggregate.
    #[default]
    UpdateDriven,
    /// On a fixed cadence, independent of updates.
    Interval(Duration),
}

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Bound on each session's outbound queue.
    pub outbound_capacity: usize,
    /// `price_sched` notification policy.
    pub schedule: SchedulePolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 1024,
            schedule: SchedulePolicy::UpdateDriven,
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Subscription whose reply has been queued but which is not yet live.
#[derive(Debug)]
struct PendingActivation {
    id: SubscriptionId,
    account: AccountKey,
    channel: Channel,
}

/// Request router and notification fan-out.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<InstrumentRegistry>,
    aggregator: Aggregator,
    subscriptions: SubscriptionTable,
    sessions: RwLock<HashMap<SessionId, Outbox>>,
    next_session: AtomicU64,
    commits: Option<CommitQueue>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher over a registry.
    #[must_use]
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        policy: AggregationPolicy,
        config: DispatcherConfig,
    ) -> Self {
        let aggregator = Aggregator::new(&registry, policy);
        Self {
            registry,
            aggregator,
            subscriptions: SubscriptionTable::new(),
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            commits: None,
            config,
        }
    }

    /// Forward aggregate changes to a commit queue.
    #[must_use]
    pub fn with_commit_queue(mut self, commits: CommitQueue) -> Self {
        self.commits = Some(commits);
        self
    }

    /// Instrument registry.
    #[must_use]
    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    /// Aggregate state.
    #[must_use]
    pub const fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Subscription table.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether submissions can be accepted.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.commits.as_ref().is_none_or(CommitQueue::is_running)
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Register a new session.
    pub fn open_session(&self, publisher: Option<PublisherKey>) -> (Session, SessionStream) {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (session, stream) = Session::new(id, publisher, self.config.outbound_capacity);

        self.sessions.write().insert(id, session.outbox().clone());
        self.update_gauges();

        tracing::info!(
            session_id = id,
            publisher = session.publisher().unwrap_or("-"),
            "Session opened"
        );
        (session, stream)
    }

    /// Close a session and drop every subscription it owns.
    ///
    /// Closing an already closed session is a no-op.
    pub fn close_session(&self, session: &Session) {
        session.close();

        if self.sessions.write().remove(&session.id()).is_none() {
            return;
        }
        let removed = self.subscriptions.remove_all(session.id());
        self.update_gauges();

        tracing::info!(
            session_id = session.id(),
            subscriptions_removed = removed.len(),
            "Session closed"
        );
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Process one text payload from a session.
    ///
    /// The reply (a single object or a batch array) is queued before any
    /// subscription created by the payload starts receiving notifications.
    pub fn handle_payload(&self, session: &Session, text: &str) {
        let mut pending = Vec::new();

        let reply = match rpc::decode(text) {
            Ok(Payload::Single(envelope)) => {
                rpc::encode(&self.dispatch(session, envelope, &mut pending))
            }
            Ok(Payload::Batch(envelopes)) => {
                let responses: Vec<Response> = envelopes
                    .into_iter()
                    .map(|envelope| self.dispatch(session, envelope, &mut pending))
                    .collect();
                rpc::encode(&responses)
            }
            Err(error) => {
                metrics::record_error(error.code());
                rpc::encode(&Response::failure(Value::Null, error))
            }
        };

        match reply {
            Ok(reply) => {
                self.deliver(session.id(), session.outbox(), reply);
            }
            Err(e) => {
                tracing::error!(session_id = session.id(), error = %e, "Failed to encode reply");
            }
        }

        for activation in pending {
            self.activate(session.id(), activation);
        }
    }

    /// Answer a payload that could not be read as text.
    pub fn handle_unreadable(&self, session: &Session) {
        metrics::record_error(RpcError::ParseError.code());
        match rpc::encode(&Response::failure(Value::Null, RpcError::ParseError)) {
            Ok(reply) => {
                self.deliver(session.id(), session.outbox(), reply);
            }
            Err(e) => {
                tracing::error!(session_id = session.id(), error = %e, "Failed to encode reply");
            }
        }
    }

    fn dispatch(
        &self,
        session: &Session,
        envelope: Envelope,
        pending: &mut Vec<PendingActivation>,
    ) -> Response {
        let (id, result) = match envelope {
            Envelope::Invalid { id, error } => (id, Err(error)),
            Envelope::Call(request) => {
                let result = self.call(session, &request, pending);
                (request.id, result)
            }
        };

        match result {
            Ok(value) => Response::success(id, value),
            Err(error) => {
                metrics::record_error(error.code());
                Response::failure(id, error)
            }
        }
    }

    fn call(
        &self,
        session: &Session,
        request: &Request,
        pending: &mut Vec<PendingActivation>,
    ) -> Result<Value, RpcError> {
        let method = Method::parse(&request.method).ok_or(RpcError::MethodNotFound)?;
        metrics::record_request(method.as_str());

        let params = request.params.as_ref();
        match method {
            Method::GetProductList => Ok(self.product_list()),
            Method::SubscribePrice => self.subscribe(params, Channel::Price, pending),
            Method::SubscribePriceSched => self.subscribe(params, Channel::PriceSched, pending),
            Method::UpdatePrice => self.update_price(session, params),
        }
    }

    fn product_list(&self) -> Value {
        let entries: Vec<ProductEntry<'_>> = self
            .registry
            .products()
            .iter()
            .map(|product| ProductEntry {
                account: &product.account,
                attr_dict: &product.attr_dict,
                price: product
                    .instruments
                    .iter()
                    .filter_map(|account| self.registry.lookup(account).ok())
                    .map(|instrument| PriceEntry {
                        account: &instrument.account,
                        price_exponent: instrument.price_exponent,
                        price_type: instrument.price_type.as_str(),
                    })
                    .collect(),
            })
            .collect();

        to_result(&entries)
    }

    fn subscribe(
        &self,
        params: Option<&Value>,
        channel: Channel,
        pending: &mut Vec<PendingActivation>,
    ) -> Result<Value, RpcError> {
        let params: SubscribeParams = parse_params(params)?;
        let instrument = self.registry.lookup(&params.account)?;

        let id = self.subscriptions.reserve();
        pending.push(PendingActivation {
            id,
            account: instrument.account.clone(),
            channel,
        });

        Ok(to_result(&SubscribeResult { subscription: id }))
    }

    fn update_price(&self, session: &Session, params: Option<&Value>) -> Result<Value, RpcError> {
        let params: UpdatePriceParams = parse_params(params)?;
        let instrument = self.registry.lookup(&params.account)?;

        if !self.is_ready() {
            return Err(RpcError::NotReady);
        }

        let started = Instant::now();
        let quote = QuoteSubmission {
            price: params.price,
            conf: params.conf,
            status: params.status,
        };

        let outcome = self
            .aggregator
            .submit(
                &instrument.account,
                session.publisher(),
                quote,
                |instrument, aggregate| self.fan_out(instrument, aggregate),
            )
            .inspect_err(|e| {
                tracing::debug!(session_id = session.id(), error = %e, "Submission rejected");
            })?;

        metrics::record_update(outcome.changed);
        metrics::record_submit_duration(started.elapsed());
        tracing::debug!(
            session_id = session.id(),
            account = %instrument.account,
            price = params.price,
            conf = params.conf,
            status = params.status.as_str(),
            changed = outcome.changed,
            "Price submitted"
        );

        Ok(Value::from(0))
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn activate(&self, session: SessionId, activation: PendingActivation) {
        let PendingActivation {
            id,
            account,
            channel,
        } = activation;

        let result = self.aggregator.with_aggregate(&account, |_, aggregate| {
            self.subscriptions.activate(id, session, &account, channel);
            match channel {
                Channel::Price => {
                    self.notify(session, &notify_price(id, aggregate), NotificationKind::Price);
                }
                Channel::PriceSched => {
                    self.notify(session, &notify_price_sched(id), NotificationKind::PriceSched);
                }
            }
        });

        match result {
            Ok(()) => {
                self.update_gauges();
                tracing::debug!(
                    session_id = session,
                    subscription_id = id,
                    account = %account,
                    channel = channel.as_str(),
                    "Subscription activated"
                );
            }
            Err(e) => {
                tracing::warn!(session_id = session, error = %e, "Subscription activation failed");
            }
        }
    }

    /// Runs under the instrument lock.
    fn fan_out(&self, instrument: &Instrument, aggregate: &Aggregate) {
        for (id, session) in self
            .subscriptions
            .subscribers_of(&instrument.account, Channel::Price)
        {
            self.notify(session, &notify_price(id, aggregate), NotificationKind::Price);
        }

        if self.config.schedule == SchedulePolicy::UpdateDriven {
            for (id, session) in self
                .subscriptions
                .subscribers_of(&instrument.account, Channel::PriceSched)
            {
                self.notify(session, &notify_price_sched(id), NotificationKind::PriceSched);
            }
        }

        if let Some(commits) = &self.commits {
            commits.enqueue(&instrument.account, *aggregate);
        }
    }

    /// Notify every `price_sched` subscription.
    ///
    /// Returns the number of subscriptions notified.
    pub fn notify_schedule_all(&self) -> usize {
        let subscriptions = self.subscriptions.all_on_channel(Channel::PriceSched);
        for subscription in &subscriptions {
            self.notify(
                subscription.session,
                &notify_price_sched(subscription.id),
                NotificationKind::PriceSched,
            );
        }
        subscriptions.len()
    }

    fn notify<T: Serialize>(&self, session: SessionId, message: &T, kind: NotificationKind) {
        let text = match rpc::encode(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(session_id = session, error = %e, "Failed to encode notification");
                return;
            }
        };

        let outbox = self.sessions.read().get(&session).cloned();
        let Some(outbox) = outbox else {
            metrics::record_notification_dropped(kind, DropReason::SessionClosed);
            return;
        };

        match self.deliver(session, &outbox, text) {
            Delivery::Queued => metrics::record_notification_sent(kind),
            Delivery::Overflow => metrics::record_notification_dropped(kind, DropReason::Overflow),
            Delivery::Closed => {
                metrics::record_notification_dropped(kind, DropReason::SessionClosed);
            }
        }
    }

    fn deliver(&self, session: SessionId, outbox: &Outbox, text: String) -> Delivery {
        let delivery = outbox.deliver(text);
        if delivery == Delivery::Overflow {
            tracing::warn!(
                session_id = session,
                capacity = self.config.outbound_capacity,
                "Outbound queue full, closing session"
            );
            metrics::record_session_overflow();
        }
        delivery
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_gauges(&self) {
        metrics::set_sessions(self.session_count() as f64);
        metrics::set_subscriptions(self.subscriptions.stats().subscription_count as f64);
    }
}

fn to_result<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize result");
        Value::Null
    })
}

// =============================================================================
// Tests
// =============================================================================
