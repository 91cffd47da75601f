use crate::core::bucket::{BucketKey, BucketKeyFn};
use crate::core::trade::{Direction, TradeSet};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Whether a bucket-direction survives compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Classification {
    /// Target notional is zero: every leg on this side can go.
    Termination,
    /// Target notional is reduced but non-zero.
    Partial,
}

impl Classification {
    pub fn of_target(target: u128) -> Self {
        if target == 0 {
            Classification::Termination
        } else {
            Classification::Partial
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Termination => f.write_str("Termination"),
            Classification::Partial => f.write_str("Partial"),
        }
    }
}

/// Share of the original notional removed by compression.
///
/// Renders as `"100%"` for a full reduction (or nothing to reduce) and with
/// exactly two decimals otherwise, e.g. `"50.00%"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionRate {
    Full,
    Partial(Decimal),
}

impl CompressionRate {
    pub fn compute(original: u128, target: u128) -> Self {
        if original == 0 || target == 0 {
            return CompressionRate::Full;
        }
        // Bucket totals are sums of u64 notionals and fit in 96 bits.
        let (Some(original_dec), Some(target_dec)) = (Decimal::from_u128(original), Decimal::from_u128(target))
        else {
            return CompressionRate::Partial(Decimal::ZERO);
        };
        let removed = original_dec - target_dec;
        let mut pct = (removed * Decimal::ONE_HUNDRED / original_dec).round_dp(2);
        pct.rescale(2);
        CompressionRate::Partial(pct)
    }

    /// Percentage as a decimal, 100 for a full reduction.
    pub fn percent(&self) -> Decimal {
        match self {
            CompressionRate::Full => Decimal::ONE_HUNDRED,
            CompressionRate::Partial(pct) => *pct,
        }
    }
}

impl fmt::Display for CompressionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionRate::Full => f.write_str("100%"),
            CompressionRate::Partial(pct) => write!(f, "{}%", pct),
        }
    }
}

impl Serialize for CompressionRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Netting outcome for one direction of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NettingResult<K> {
    pub bucket: K,
    pub direction: Direction,
    pub classification: Classification,
    /// Aggregate notional on this side before netting.
    pub original_notional: u128,
    /// Minimum notional that must remain on this side.
    pub target_notional: u128,
    pub rate: CompressionRate,
}

impl<K> NettingResult<K> {
    fn new(bucket: K, direction: Direction, original: u128, target: u128) -> Self {
        Self {
            bucket,
            direction,
            classification: Classification::of_target(target),
            original_notional: original,
            target_notional: target,
            rate: CompressionRate::compute(original, target),
        }
    }

    /// Target signed by direction (receive positive).
    pub fn signed_target(&self) -> i128 {
        let magnitude = i128::try_from(self.target_notional).unwrap_or(i128::MAX);
        match self.direction {
            Direction::Pay => -magnitude,
            Direction::Receive => magnitude,
        }
    }
}

/// Compute per-bucket netting targets.
///
/// For every bucket produced by `key_fn`, pay and receive notionals are
/// summed independently and offset against each other:
///
/// - `new_pay = max(0, pay - receive)`
/// - `new_receive = max(0, receive - pay)`
///
/// At most one of the two targets is non-zero. Two results are emitted per
/// bucket, pay first, with buckets in ascending key order.
pub fn compute_netting<F: BucketKeyFn>(trades: &TradeSet, key_fn: &F) -> Vec<NettingResult<F::Key>> {
    let mut totals: BTreeMap<F::Key, (u128, u128)> = BTreeMap::new();
    for leg in trades.legs() {
        let entry = totals.entry(key_fn.key(leg)).or_insert((0, 0));
        let notional = u128::from(leg.notional());
        match leg.direction() {
            Direction::Pay => entry.0 += notional,
            Direction::Receive => entry.1 += notional,
        }
    }

    let mut results = Vec::with_capacity(totals.len() * 2);
    for (bucket, (pay, receive)) in totals {
        let new_pay = pay.saturating_sub(receive);
        let new_receive = receive.saturating_sub(pay);
        results.push(NettingResult::new(bucket.clone(), Direction::Pay, pay, new_pay));
        results.push(NettingResult::new(bucket, Direction::Receive, receive, new_receive));
    }
    results
}

/// Per-bucket view of position-level netting used by the proposal engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketTarget {
    pub pay: Classification,
    pub receive: Classification,
    /// `new_receive - new_pay`.
    pub signed: i128,
}

impl BucketTarget {
    pub fn classification(&self, direction: Direction) -> Classification {
        match direction {
            Direction::Pay => self.pay,
            Direction::Receive => self.receive,
        }
    }
}

/// Fold position-level results into one target per bucket.
pub fn bucket_targets(results: &[NettingResult<BucketKey>]) -> BTreeMap<BucketKey, BucketTarget> {
    let mut targets: BTreeMap<BucketKey, BucketTarget> = BTreeMap::new();
    for result in results {
        let target = targets.entry(result.bucket.clone()).or_insert(BucketTarget {
            pay: Classification::Termination,
            receive: Classification::Termination,
            signed: 0,
        });
        match result.direction {
            Direction::Pay => target.pay = result.classification,
            Direction::Receive => target.receive = result.classification,
        }
        target.signed += result.signed_target();
    }
    targets
}

/// Aggregate figures over a list of netting results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NettingSummary {
    pub original_total: u128,
    pub target_total: u128,
    pub terminations: usize,
    pub partials: usize,
}

impl NettingSummary {
    pub fn from_results<K>(results: &[NettingResult<K>]) -> Self {
        let mut summary = NettingSummary {
            original_total: 0,
            target_total: 0,
            terminations: 0,
            partials: 0,
        };
        for result in results {
            summary.original_total += result.original_notional;
            summary.target_total += result.target_notional;
            match result.classification {
                Classification::Termination => summary.terminations += 1,
                Classification::Partial => summary.partials += 1,
            }
        }
        summary
    }

    /// Notional removed by netting.
    pub fn savings(&self) -> u128 {
        self.original_total - self.target_total
    }

    /// Savings as a percentage of the original notional.
    pub fn savings_percent(&self) -> Decimal {
        if self.original_total == 0 {
            return Decimal::ZERO;
        }
        match (
            Decimal::from_u128(self.savings()),
            Decimal::from_u128(self.original_total),
        ) {
            (Some(savings), Some(original)) => (savings * Decimal::ONE_HUNDRED / original).round_dp(2),
            _ => Decimal::ZERO,
        }
    }
}

impl fmt::Display for NettingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Netting Summary ===")?;
        writeln!(f, "Original Notional: {}", self.original_total)?;
        writeln!(f, "Target Notional:   {}", self.target_total)?;
        writeln!(f, "Savings:           {}", self.savings())?;
        writeln!(f, "Savings %:         {}%", self.savings_percent())?;
        writeln!(f, "Terminations:      {}", self.terminations)?;
        writeln!(f, "Partials:          {}", self.partials)?;
        Ok(())
    }
}

/// Render netting rows as a fixed-width table.
pub fn render_table<K: fmt::Display>(results: &[NettingResult<K>]) -> String {
    let mut out = format!(
        "{:<40} {:<3} {:<12} {:>15} {:>15} {:>8}\n",
        "Bucket", "P/R", "Type", "Original", "Notional", "Rate"
    );
    for r in results {
        out.push_str(&format!(
            "{:<40} {:<3} {:<12} {:>15} {:>15} {:>8}\n",
            r.bucket.to_string(),
            r.direction,
            r.classification.to_string(),
            r.original_notional,
            r.target_notional,
            r.rate.to_string()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bucket::{BookLevel, PositionLevel};
    use crate::core::currency::CurrencyCode;
    use crate::core::trade::TradePair;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn maturity() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    fn set(pairs: &[(&str, &str, &str, u64)]) -> TradeSet {
        let aud = CurrencyCode::new("AUD");
        TradeSet::from_pairs(pairs.iter().map(|(id, payer, receiver, n)| {
            TradePair::mirrored(*id, *payer, *receiver, aud.clone(), maturity(), *n)
        }))
        .unwrap()
    }

    fn find<'a>(
        results: &'a [NettingResult<BucketKey>],
        party: &str,
        direction: Direction,
    ) -> &'a NettingResult<BucketKey> {
        results
            .iter()
            .find(|r| r.bucket.party.as_str() == party && r.direction == direction)
            .unwrap()
    }

    #[test]
    fn test_rate_formatting() {
        assert_eq!(CompressionRate::compute(0, 0).to_string(), "100%");
        assert_eq!(CompressionRate::compute(1000, 0).to_string(), "100%");
        assert_eq!(CompressionRate::compute(1000, 500).to_string(), "50.00%");
        assert_eq!(CompressionRate::compute(1000, 1000).to_string(), "0.00%");
        assert_eq!(CompressionRate::compute(3, 1).to_string(), "66.67%");
        assert_eq!(CompressionRate::compute(3, 1).percent(), dec!(66.67));
    }

    #[test]
    fn test_full_offset_is_termination() {
        // A pays 100 and 200 to B, receives 300 from B.
        let trades = set(&[("1", "A", "B", 100), ("2", "A", "B", 200), ("3", "B", "A", 300)]);
        let results = compute_netting(&trades, &PositionLevel);
        assert_eq!(results.len(), 4);
        for r in &results {
            assert_eq!(r.target_notional, 0);
            assert_eq!(r.classification, Classification::Termination);
            assert_eq!(r.rate, CompressionRate::Full);
        }
        assert_eq!(find(&results, "A", Direction::Pay).original_notional, 300);
    }

    #[test]
    fn test_partial_netting() {
        let trades = set(&[("1", "A", "B", 500), ("2", "B", "A", 200)]);
        let results = compute_netting(&trades, &PositionLevel);

        let a_pay = find(&results, "A", Direction::Pay);
        assert_eq!(a_pay.target_notional, 300);
        assert_eq!(a_pay.classification, Classification::Partial);
        assert_eq!(a_pay.rate.to_string(), "40.00%");

        let a_receive = find(&results, "A", Direction::Receive);
        assert_eq!(a_receive.target_notional, 0);
        assert_eq!(a_receive.classification, Classification::Termination);

        let b_receive = find(&results, "B", Direction::Receive);
        assert_eq!(b_receive.target_notional, 300);
    }

    #[test]
    fn test_totals_past_u64_range() {
        let half = u64::MAX / 2 + 1;
        let trades = set(&[("1", "A", "B", half), ("2", "A", "C", half), ("3", "D", "A", 1)]);
        let results = compute_netting(&trades, &PositionLevel);

        let a_pay = find(&results, "A", Direction::Pay);
        assert_eq!(a_pay.original_notional, u128::from(half) * 2);
        assert_eq!(a_pay.target_notional, u128::from(half) * 2 - 1);
        assert_eq!(a_pay.classification, Classification::Partial);
        assert_eq!(a_pay.rate.to_string(), "0.00%");
        assert_eq!(a_pay.signed_target(), -(i128::from(half) * 2 - 1));

        let summary = NettingSummary::from_results(&results);
        assert_eq!(summary.original_total, (u128::from(half) * 2 + 1) * 2);
    }

    #[test]
    fn test_zero_original_direction_emitted() {
        let trades = set(&[("1", "A", "B", 100)]);
        let results = compute_netting(&trades, &PositionLevel);
        let a_receive = find(&results, "A", Direction::Receive);
        assert_eq!(a_receive.original_notional, 0);
        assert_eq!(a_receive.classification, Classification::Termination);
        assert_eq!(a_receive.rate.to_string(), "100%");
        assert_eq!(find(&results, "A", Direction::Pay).rate.to_string(), "0.00%");
    }

    #[test]
    fn test_one_target_per_bucket() {
        let trades = set(&[
            ("1", "A", "B", 100),
            ("2", "B", "C", 70),
            ("3", "C", "A", 30),
            ("4", "A", "C", 55),
        ]);
        let targets = bucket_targets(&compute_netting(&trades, &PositionLevel));
        for target in targets.values() {
            let pay = target.pay == Classification::Partial;
            let receive = target.receive == Classification::Partial;
            assert!(!(pay && receive));
        }
        let total: i128 = targets.values().map(|t| t.signed).sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn test_book_level_splits_buckets() {
        let trades = set(&[("1", "A", "B", 100)]);
        let books = compute_netting(&trades, &BookLevel);
        assert_eq!(books.len(), 4);
        assert_eq!(books[0].bucket.book.as_str(), "BKA");
    }

    #[test]
    fn test_summary() {
        let trades = set(&[("1", "A", "B", 500), ("2", "B", "A", 200)]);
        let summary = NettingSummary::from_results(&compute_netting(&trades, &PositionLevel));
        assert_eq!(summary.original_total, 1400);
        assert_eq!(summary.target_total, 600);
        assert_eq!(summary.savings(), 800);
        assert_eq!(summary.terminations, 2);
        assert_eq!(summary.partials, 2);
        assert_eq!(summary.savings_percent(), dec!(57.14));
    }

    #[test]
    fn test_empty_trade_set() {
        let results = compute_netting(&TradeSet::new(), &PositionLevel);
        assert!(results.is_empty());
        let summary = NettingSummary::from_results(&results);
        assert_eq!(summary.savings_percent(), Decimal::ZERO);
    }
}
