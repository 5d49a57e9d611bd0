//! Price Aggregation
//!
//! Owns the per-instrument aggregate state. Publisher submissions are
//! stored as quotes and folded into an aggregate price, confidence, status
//! and time-weighted statistics.
//!
//! # Locking
//!
//! Every instrument has its own mutex. Submissions to different instruments
//! never contend; submissions to the same instrument are serialized in the
//! order they reach the lock. The change callback passed to
//! [`Aggregator::submit`] runs while the lock is held, so observers see
//! aggregates in commit order. It must not block.
//!
//! # Status Derivation
//!
//! A publisher quote counts as `trading` only when its raw status is
//! `trading` and `conf <= |price| / conf_divisor`. A raw `halted` always
//! stays `halted`; anything else becomes `unknown`.

pub mod model;
pub mod twap;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::instrument::{AccountKey, Instrument, InstrumentRegistry, PublisherKey};

use self::twap::{DecayParams, TimeWeighted, to_conf, to_price};

// =============================================================================
// Types
// =============================================================================

/// Trading status of a quote or aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceStatus {
    /// No usable price.
    #[default]
    Unknown,
    /// Actively trading.
    Trading,
    /// Trading halted.
    Halted,
}

impl PriceStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Trading => "trading",
            Self::Halted => "halted",
        }
    }
}

/// A raw publisher submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteSubmission {
    /// Submitted price.
    pub price: i64,
    /// Submitted confidence interval.
    pub conf: u64,
    /// Submitted status.
    pub status: PriceStatus,
}

/// Last quote stored for an (instrument, publisher) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherQuote {
    /// Submitted price.
    pub price: i64,
    /// Submitted confidence interval.
    pub conf: u64,
    /// Submitted status.
    pub status: PriceStatus,
    /// Instrument submission sequence at which the quote was last refreshed.
    pub seq: u64,
}

impl PublisherQuote {
    fn same_values(&self, quote: &QuoteSubmission) -> bool {
        self.price == quote.price && self.conf == quote.conf && self.status == quote.status
    }
}

/// Derived per-instrument state published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Aggregate {
    /// Aggregate price.
    pub price: i64,
    /// Aggregate confidence.
    pub conf: u64,
    /// Aggregate status.
    pub status: PriceStatus,
    /// Time-weighted average price.
    pub twap: i64,
    /// Time-weighted average confidence.
    pub twac: u64,
}

/// Result of a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Whether the aggregate differs from its previous value.
    pub changed: bool,
    /// Aggregate after the submission.
    pub aggregate: Aggregate,
}

/// Aggregation tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationPolicy {
    /// A trading quote needs `conf <= |price| / conf_divisor` (0 disables the check).
    pub conf_divisor: u64,
    /// Submissions after which a silent publisher's quote is stale.
    pub max_quote_lag: u64,
    /// twap/twac decay.
    pub decay: DecayParams,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            conf_divisor: 20,
            max_quote_lag: 25,
            decay: DecayParams::default(),
        }
    }
}

/// Effective status of a single quote under the confidence threshold.
#[must_use]
pub const fn effective_status(price: i64, conf: u64, status: PriceStatus, divisor: u64) -> PriceStatus {
    match status {
        PriceStatus::Halted => PriceStatus::Halted,
        PriceStatus::Trading if divisor == 0 || conf <= price.unsigned_abs() / divisor => {
            PriceStatus::Trading
        }
        _ => PriceStatus::Unknown,
    }
}

// =============================================================================
// Instrument Book (per-instrument state)
// =============================================================================

#[derive(Debug)]
struct InstrumentBook {
    instrument: Arc<Instrument>,
    quotes: BTreeMap<PublisherKey, PublisherQuote>,
    seq: u64,
    aggregate: Aggregate,
    twap: TimeWeighted,
    twac: TimeWeighted,
    last_trading_seq: Option<u64>,
    /// Quotes folded into the accumulators by the last trading recompute.
    contributors: Vec<(i64, u64)>,
}

impl InstrumentBook {
    fn new(instrument: Arc<Instrument>) -> Self {
        Self {
            instrument,
            quotes: BTreeMap::new(),
            seq: 0,
            aggregate: Aggregate::default(),
            twap: TimeWeighted::new(),
            twac: TimeWeighted::new(),
            last_trading_seq: None,
            contributors: Vec::new(),
        }
    }

    fn apply(
        &mut self,
        publisher: &str,
        quote: QuoteSubmission,
        policy: &AggregationPolicy,
    ) -> SubmitOutcome {
        self.seq += 1;
        let seq = self.seq;

        let refresh = self
            .quotes
            .get(publisher)
            .is_some_and(|existing| existing.same_values(&quote));

        self.quotes.insert(
            publisher.to_string(),
            PublisherQuote {
                price: quote.price,
                conf: quote.conf,
                status: quote.status,
                seq,
            },
        );

        let previous = self.aggregate;
        self.aggregate = self.recompute(policy, refresh);

        SubmitOutcome {
            changed: self.aggregate != previous,
            aggregate: self.aggregate,
        }
    }

    /// Rebuild the aggregate from the fresh quotes.
    ///
    /// A `refresh` that leaves a trading aggregate's contributing quotes
    /// unchanged does not advance twap/twac.
    fn recompute(&mut self, policy: &AggregationPolicy, refresh: bool) -> Aggregate {
        let seq = self.seq;
        let fresh: Vec<&PublisherQuote> = self
            .quotes
            .values()
            .filter(|q| seq - q.seq <= policy.max_quote_lag)
            .collect();

        let valid: Vec<(i64, u64)> = fresh
            .iter()
            .filter(|q| {
                effective_status(q.price, q.conf, q.status, policy.conf_divisor)
                    == PriceStatus::Trading
            })
            .filter(|q| model::samples(q.price, q.conf).is_some())
            .map(|q| (q.price, q.conf))
            .collect();

        let required = usize::from(self.instrument.min_publishers.max(1));
        let output = if valid.len() >= required {
            model::aggregate(&valid)
        } else {
            None
        };

        let Some(output) = output else {
            let all_halted =
                !fresh.is_empty() && fresh.iter().all(|q| q.status == PriceStatus::Halted);
            let status = if all_halted {
                PriceStatus::Halted
            } else {
                PriceStatus::Unknown
            };
            return Aggregate {
                status,
                ..self.aggregate
            };
        };

        if refresh && self.aggregate.status == PriceStatus::Trading && valid == self.contributors {
            return Aggregate {
                price: output.price,
                conf: output.conf,
                status: PriceStatus::Trading,
                ..self.aggregate
            };
        }

        let gap = self.last_trading_seq.map_or(0, |last| seq - last);
        let twap = self
            .twap
            .observe(Decimal::from(output.price), output.conf, gap, policy.decay);
        let twac = self
            .twac
            .observe(Decimal::from(output.conf), output.conf, gap, policy.decay);
        self.last_trading_seq = Some(seq);
        self.contributors = valid;

        Aggregate {
            price: output.price,
            conf: output.conf,
            status: PriceStatus::Trading,
            twap: to_price(twap),
            twac: to_conf(twac),
        }
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Per-instrument aggregate state behind per-instrument locks.
///
/// The set of instruments is fixed at construction.
#[derive(Debug)]
pub struct Aggregator {
    books: HashMap<AccountKey, Mutex<InstrumentBook>>,
    policy: AggregationPolicy,
}

impl Aggregator {
    /// Create an aggregator covering every instrument in the registry.
    #[must_use]
    pub fn new(registry: &InstrumentRegistry, policy: AggregationPolicy) -> Self {
        let books = registry
            .list()
            .iter()
            .map(|instrument| {
                (
                    instrument.account.clone(),
                    Mutex::new(InstrumentBook::new(Arc::clone(instrument))),
                )
            })
            .collect();

        Self { books, policy }
    }

    /// Active aggregation policy.
    #[must_use]
    pub const fn policy(&self) -> &AggregationPolicy {
        &self.policy
    }

    /// Submit a quote and recompute the instrument's aggregate.
    ///
    /// `on_change` runs under the instrument lock when the aggregate
    /// changed.
    ///
    /// # Errors
    ///
    /// - `SubmitError::InvalidParams` if the confidence does not fit a
    ///   signed price band
    /// - `SubmitError::UnknownInstrument` if the account is not registered
    /// - `SubmitError::Unauthorized` if the publisher is absent or not
    ///   authorized for the instrument
    pub fn submit<F>(
        &self,
        account: &str,
        publisher: Option<&str>,
        quote: QuoteSubmission,
        on_change: F,
    ) -> Result<SubmitOutcome, SubmitError>
    where
        F: FnOnce(&Instrument, &Aggregate),
    {
        if quote.conf > i64::MAX.unsigned_abs() {
            return Err(SubmitError::InvalidParams(format!(
                "confidence {} out of range",
                quote.conf
            )));
        }

        let book = self
            .books
            .get(account)
            .ok_or_else(|| SubmitError::UnknownInstrument(account.to_string()))?;
        let mut book = book.lock();

        let publisher = publisher
            .filter(|p| book.instrument.is_publisher(p))
            .ok_or_else(|| SubmitError::Unauthorized {
                account: account.to_string(),
                publisher: publisher.map(str::to_string),
            })?;

        let outcome = book.apply(publisher, quote, &self.policy);
        if outcome.changed {
            on_change(&book.instrument, &outcome.aggregate);
        }

        Ok(outcome)
    }

    /// Current aggregate of an instrument.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::UnknownInstrument` if the account is not registered.
    pub fn read(&self, account: &str) -> Result<Aggregate, SubmitError> {
        self.with_aggregate(account, |_, aggregate| *aggregate)
    }

    /// Run `f` against the current aggregate while holding the instrument lock.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::UnknownInstrument` if the account is not registered.
    pub fn with_aggregate<R>(
        &self,
        account: &str,
        f: impl FnOnce(&Instrument, &Aggregate) -> R,
    ) -> Result<R, SubmitError> {
        let book = self
            .books
            .get(account)
            .ok_or_else(|| SubmitError::UnknownInstrument(account.to_string()))?;
        let book = book.lock();
        Ok(f(&book.instrument, &book.aggregate))
    }

    /// Last quote stored for a publisher.
    #[must_use]
    pub fn quote(&self, account: &str, publisher: &str) -> Option<PublisherQuote> {
        self.books
            .get(account)
            .and_then(|book| book.lock().quotes.get(publisher).copied())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Submission errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Instrument is not registered.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    /// Publisher may not submit for this instrument.
    #[error("publisher {publisher:?} not authorized for {account}")]
    Unauthorized {
        /// Target instrument.
        account: String,
        /// Presented identity, if any.
        publisher: Option<String>,
    },

    /// Submission values are malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

// =============================================================================
// Tests
// =============================================================================
