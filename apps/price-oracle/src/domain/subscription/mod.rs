//! Subscription Table
//!
//! Tracks which session is subscribed to which instrument channel.
//!
//! # Design
//!
//! The table keeps three indexes under one lock:
//! - subscription id → subscription
//! - (instrument, channel) → subscription ids, for fan-out
//! - session → subscription ids, for disconnect cleanup
//!
//! Identifiers come from a counter owned by the table. They increase
//! strictly for the lifetime of the table and are never reused, so a late
//! notification for a removed subscription is recognized by id and dropped.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::instrument::AccountKey;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Unique identifier for a connection session.
pub type SessionId = u64;

/// Notification channel of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Aggregate price updates.
    Price,
    /// Submission slot notifications for publishers.
    PriceSched,
}

impl Channel {
    /// Get all channels.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Price, Self::PriceSched]
    }

    /// Channel name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::PriceSched => "price_sched",
        }
    }
}

/// A live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Subscription identifier.
    pub id: SubscriptionId,
    /// Owning session.
    pub session: SessionId,
    /// Target instrument account.
    pub account: AccountKey,
    /// Notification channel.
    pub channel: Channel,
}

// =============================================================================
// Table State
// =============================================================================

#[derive(Debug, Default)]
struct TableState {
    by_id: HashMap<SubscriptionId, Subscription>,
    by_target: HashMap<(AccountKey, Channel), BTreeSet<SubscriptionId>>,
    by_session: HashMap<SessionId, HashSet<SubscriptionId>>,
}

impl TableState {
    fn insert(&mut self, subscription: Subscription) {
        let id = subscription.id;
        self.by_target
            .entry((subscription.account.clone(), subscription.channel))
            .or_default()
            .insert(id);
        self.by_session
            .entry(subscription.session)
            .or_default()
            .insert(id);
        self.by_id.insert(id, subscription);
    }

    fn remove_session(&mut self, session: SessionId) -> Vec<Subscription> {
        let Some(ids) = self.by_session.remove(&session) else {
            return vec![];
        };

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(subscription) = self.by_id.remove(&id) else {
                continue;
            };

            let key = (subscription.account.clone(), subscription.channel);
            if let Some(set) = self.by_target.get_mut(&key) {
                set.remove(&id);
                // Clean up empty target entry
                if set.is_empty() {
                    self.by_target.remove(&key);
                }
            }
            removed.push(subscription);
        }

        removed.sort_by_key(|s| s.id);
        removed
    }
}

// =============================================================================
// Subscription Table
// =============================================================================

/// Thread-safe subscription table.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    next_id: AtomicU64,
    state: RwLock<TableState>,
}

impl SubscriptionTable {
    /// Create an empty table whose first identifier is 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next subscription identifier without registering it.
    ///
    /// Used when the identifier must be reported before the subscription
    /// starts receiving notifications.
    pub fn reserve(&self) -> SubscriptionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a subscription under a previously reserved identifier.
    pub fn activate(
        &self,
        id: SubscriptionId,
        session: SessionId,
        account: &str,
        channel: Channel,
    ) {
        self.state.write().insert(Subscription {
            id,
            session,
            account: account.to_string(),
            channel,
        });
    }

    /// Allocate an identifier and register the subscription.
    pub fn add(&self, session: SessionId, account: &str, channel: Channel) -> SubscriptionId {
        let id = self.reserve();
        self.activate(id, session, account, channel);
        id
    }

    /// Remove every subscription owned by a session.
    ///
    /// Returns the removed subscriptions ordered by id.
    pub fn remove_all(&self, session: SessionId) -> Vec<Subscription> {
        self.state.write().remove_session(session)
    }

    /// Subscriptions to an instrument channel, as `(subscription, session)` pairs.
    ///
    /// Each subscription appears once.
    #[must_use]
    pub fn subscribers_of(
        &self,
        account: &str,
        channel: Channel,
    ) -> Vec<(SubscriptionId, SessionId)> {
        let state = self.state.read();
        state
            .by_target
            .get(&(account.to_string(), channel))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.by_id.get(id))
                    .map(|s| (s.id, s.session))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All subscriptions on a channel, across instruments.
    #[must_use]
    pub fn all_on_channel(&self, channel: Channel) -> Vec<Subscription> {
        let mut subscriptions: Vec<_> = self
            .state
            .read()
            .by_id
            .values()
            .filter(|s| s.channel == channel)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.id);
        subscriptions
    }

    /// Look up a subscription by id.
    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        self.state.read().by_id.get(&id).cloned()
    }

    /// Subscription ids owned by a session.
    #[must_use]
    pub fn session_subscriptions(&self, session: SessionId) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self
            .state
            .read()
            .by_session
            .get(&session)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Get table statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            subscription_count: state.by_id.len(),
            session_count: state.by_session.len(),
            target_count: state.by_target.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription table statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of live subscriptions.
    pub subscription_count: usize,
    /// Number of sessions owning at least one subscription.
    pub session_count: usize,
    /// Number of distinct (instrument, channel) targets.
    pub target_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_zero_and_increase() {
        let table = SubscriptionTable::new();
        assert_eq!(table.add(1, "px-ltc", Channel::Price), 0);
        assert_eq!(table.add(1, "px-ltc", Channel::PriceSched), 1);
        assert_eq!(table.add(2, "px-btc", Channel::Price), 2);
    }

    #[test]
    fn ids_never_reused_after_removal() {
        let table = SubscriptionTable::new();
        let first = table.add(1, "px-ltc", Channel::Price);
        table.remove_all(1);
        let second = table.add(1, "px-ltc", Channel::Price);
        assert!(second > first);
    }

    #[test]
    fn subscribers_of_filters_by_channel() {
        let table = SubscriptionTable::new();
        let price = table.add(1, "px-ltc", Channel::Price);
        let sched = table.add(1, "px-ltc", Channel::PriceSched);

        assert_eq!(table.subscribers_of("px-ltc", Channel::Price), vec![(price, 1)]);
        assert_eq!(
            table.subscribers_of("px-ltc", Channel::PriceSched),
            vec![(sched, 1)]
        );
        assert!(table.subscribers_of("px-btc", Channel::Price).is_empty());
    }

    #[test]
    fn same_session_may_subscribe_twice() {
        let table = SubscriptionTable::new();
        let a = table.add(1, "px-ltc", Channel::Price);
        let b = table.add(1, "px-ltc", Channel::Price);

        let subs = table.subscribers_of("px-ltc", Channel::Price);
        assert_eq!(subs, vec![(a, 1), (b, 1)]);
    }

    #[test]
    fn remove_all_cleans_up() {
        let table = SubscriptionTable::new();
        table.add(1, "px-ltc", Channel::Price);
        table.add(1, "px-btc", Channel::PriceSched);

        let removed = table.remove_all(1);

        assert_eq!(removed.len(), 2);
        assert!(table.subscribers_of("px-ltc", Channel::Price).is_empty());
        assert!(table.subscribers_of("px-btc", Channel::PriceSched).is_empty());
        assert_eq!(table.stats(), SubscriptionStats::default());
    }

    #[test]
    fn remove_all_preserves_other_sessions() {
        let table = SubscriptionTable::new();
        table.add(1, "px-ltc", Channel::Price);
        let kept = table.add(2, "px-ltc", Channel::Price);

        table.remove_all(1);

        assert_eq!(table.subscribers_of("px-ltc", Channel::Price), vec![(kept, 2)]);
        assert_eq!(table.stats().session_count, 1);
    }

    #[test]
    fn remove_all_unknown_session_no_changes() {
        let table = SubscriptionTable::new();
        table.add(1, "px-ltc", Channel::Price);
        assert!(table.remove_all(99).is_empty());
        assert_eq!(table.stats().subscription_count, 1);
    }

    #[test]
    fn reserve_then_activate() {
        let table = SubscriptionTable::new();
        let id = table.reserve();
        assert!(table.get(id).is_none());
        assert!(table.subscribers_of("px-ltc", Channel::Price).is_empty());

        table.activate(id, 7, "px-ltc", Channel::Price);

        let sub = table.get(id).unwrap();
        assert_eq!(sub.session, 7);
        assert_eq!(sub.account, "px-ltc");
        assert_eq!(table.session_subscriptions(7), vec![id]);
    }

    #[test]
    fn all_on_channel_is_ordered() {
        let table = SubscriptionTable::new();
        let a = table.add(2, "px-btc", Channel::PriceSched);
        table.add(1, "px-ltc", Channel::Price);
        let b = table.add(1, "px-ltc", Channel::PriceSched);

        let ids: Vec<_> = table
            .all_on_channel(Channel::PriceSched)
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn stats_are_accurate() {
        let table = SubscriptionTable::new();
        table.add(1, "px-ltc", Channel::Price);
        table.add(2, "px-ltc", Channel::Price);
        table.add(2, "px-btc", Channel::PriceSched);

        let stats = table.stats();
        assert_eq!(stats.subscription_count, 3);
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.target_count, 2);
    }

    #[test]
    fn channel_names() {
        assert_eq!(Channel::Price.as_str(), "price");
        assert_eq!(Channel::PriceSched.as_str(), "price_sched");
        assert_eq!(Channel::all().len(), 2);
    }

    #[test]
    fn thread_safety_concurrent_subscriptions() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(SubscriptionTable::new());
        let mut handles = vec![];

        // Spawn 10 threads that each add subscriptions
        for session in 0..10 {
            let t = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                (0..10)
                    .map(|_| t.add(session, "SHARED", Channel::Price))
                    .collect::<Vec<_>>()
            }));
        }

        let mut ids: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        assert_eq!(ids.len(), 100);
        assert_eq!(table.subscribers_of("SHARED", Channel::Price).len(), 100);
    }

    #[test]
    fn thread_safety_concurrent_disconnects() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(SubscriptionTable::new());

        for session in 0..10u64 {
            table.add(session, "SHARED", Channel::Price);
        }

        let handles: Vec<_> = (0..10u64)
            .map(|session| {
                let t = Arc::clone(&table);
                thread::spawn(move || {
                    t.remove_all(session);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.stats(), SubscriptionStats::default());
    }
}
