//! Percentile Price Model
//!
//! Combines publisher quotes into one price and confidence. Each quote
//! contributes three samples (`price - conf`, `price`, `price + conf`);
//! the aggregate price is the sample median and the confidence is the
//! wider of the two distances from the median to the 25th and 75th
//! percentile samples.

/// Aggregate price and confidence produced by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOutput {
    /// Median sample.
    pub price: i64,
    /// Max distance from the median to the interquartile bounds.
    pub conf: u64,
}

/// Expand a quote into its three samples.
///
/// Returns `None` when the confidence band overflows `i64`.
#[must_use]
pub fn samples(price: i64, conf: u64) -> Option<[i64; 3]> {
    let low = price.checked_sub_unsigned(conf)?;
    let high = price.checked_add_unsigned(conf)?;
    Some([low, price, high])
}

/// Run the model over a set of `(price, conf)` quotes.
///
/// Quotes whose band overflows are skipped. Returns `None` if nothing
/// remains.
#[must_use]
pub fn aggregate(quotes: &[(i64, u64)]) -> Option<ModelOutput> {
    let mut sorted: Vec<i64> = quotes
        .iter()
        .filter_map(|&(price, conf)| samples(price, conf))
        .flatten()
        .collect();

    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable();

    let n = sorted.len();
    let p25_index = n >> 2;
    let p25 = sorted[p25_index];
    let p75 = sorted[n - 1 - p25_index];

    let mid = n >> 1;
    let p50 = if n % 2 == 0 {
        floor_average(sorted[mid - 1], sorted[mid])
    } else {
        sorted[mid]
    };

    let conf = distance(p25, p50).max(distance(p50, p75));
    Some(ModelOutput { price: p50, conf })
}

/// Average of two values rounded toward negative infinity.
fn floor_average(a: i64, b: i64) -> i64 {
    (a >> 1) + (b >> 1) + (a & b & 1)
}

fn distance(low: i64, high: i64) -> u64 {
    high.abs_diff(low)
}
