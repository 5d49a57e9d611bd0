//! Time-Weighted Accumulators
//!
//! Confidence-weighted exponential moving average driven by submission
//! arrivals. Time is measured in submissions to the instrument, so the
//! average is deterministic for a given arrival order.
//!
//! For an observation `v` with confidence `c`, arriving `n` submissions
//! after the previous trading aggregate:
//!
//! ```text
//! w     = 1 / c                  (1 when c == 0)
//! decay = max(0, 1 - n * ln2 / half_life)
//! numer = numer * decay + v * w
//! denom = denom * decay + w
//! out   = round(numer / denom)
//! ```
//!
//! The first observation, or one arriving more than `max_gap` submissions
//! after the previous one, re-seeds the average.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Natural log of two.
const LN_2: Decimal = dec!(0.6931471805599453094172321215);

/// Decay parameters shared by twap and twac.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayParams {
    /// Submissions after which an observation's weight halves.
    pub half_life: u64,
    /// Gap (in submissions) beyond which the average re-seeds.
    pub max_gap: u64,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            half_life: 5921,
            max_gap: 4145,
        }
    }
}

/// Weighted moving average state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeWeighted {
    numer: Decimal,
    denom: Decimal,
    seeded: bool,
}

impl TimeWeighted {
    /// Create an empty, unseeded accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether at least one observation has been folded in.
    #[must_use]
    pub const fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Fold an observation into the average and return the new value.
    pub fn observe(&mut self, value: Decimal, conf: u64, gap: u64, params: DecayParams) -> Decimal {
        let weight = weight(conf);

        if self.seeded && gap <= params.max_gap {
            let decay = decay(gap, params.half_life);
            let next = self
                .numer
                .checked_mul(decay)
                .and_then(|n| n.checked_add(value.checked_mul(weight)?))
                .zip(
                    self.denom
                        .checked_mul(decay)
                        .and_then(|d| d.checked_add(weight)),
                );
            if let Some((numer, denom)) = next
                && !denom.is_zero()
            {
                self.numer = numer;
                self.denom = denom;
                return self.value();
            }
        }

        self.seed(value, weight)
    }

    /// Current average, or zero before any observation.
    #[must_use]
    pub fn value(&self) -> Decimal {
        if self.denom.is_zero() {
            return Decimal::ZERO;
        }
        self.numer.checked_div(self.denom).unwrap_or(Decimal::ZERO)
    }

    fn seed(&mut self, value: Decimal, weight: Decimal) -> Decimal {
        match value.checked_mul(weight) {
            Some(numer) => {
                self.numer = numer;
                self.denom = weight;
            }
            None => {
                self.numer = value;
                self.denom = Decimal::ONE;
            }
        }
        self.seeded = true;
        self.value()
    }
}

fn weight(conf: u64) -> Decimal {
    if conf == 0 {
        return Decimal::ONE;
    }
    Decimal::ONE
        .checked_div(Decimal::from(conf))
        .unwrap_or(Decimal::ONE)
}

fn decay(gap: u64, half_life: u64) -> Decimal {
    if half_life == 0 {
        return Decimal::ZERO;
    }
    let factor = LN_2 * Decimal::from(gap) / Decimal::from(half_life);
    (Decimal::ONE - factor).max(Decimal::ZERO)
}

/// Round an average to the nearest integer price, saturating at the `i64` range.
#[must_use]
pub fn to_price(value: Decimal) -> i64 {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_i64().unwrap_or(if rounded.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Round an average to the nearest non-negative confidence.
#[must_use]
pub fn to_conf(value: Decimal) -> u64 {
    if value.is_sign_negative() {
        return 0;
    }
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_u64().unwrap_or(u64::MAX)
}
