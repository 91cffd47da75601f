use crate::core::bucket::{BucketKey, MarketKey};
use crate::core::party::PartyId;
use crate::core::trade::{Direction, TradeLeg};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tracks the signed net position of each party in each market.
///
/// A positive balance means the party is a net receiver in that
/// currency/maturity; a negative balance means it is a net payer.
///
/// Compression must leave every position unchanged: the ledger built from
/// the original legs and the ledger built from the surviving legs agree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// BucketKey -> signed net notional
    #[serde(with = "positions_serde")]
    positions: BTreeMap<BucketKey, i128>,
}

mod positions_serde {
    use super::*;
    use crate::core::currency::CurrencyCode;
    use chrono::NaiveDate;
    use serde::ser::SerializeSeq;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        party: PartyId,
        currency: CurrencyCode,
        maturity: NaiveDate,
        position: i128,
    }

    pub fn serialize<S: serde::Serializer>(
        positions: &BTreeMap<BucketKey, i128>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(positions.len()))?;
        for (key, position) in positions {
            seq.serialize_element(&Entry {
                party: key.party.clone(),
                currency: key.currency.clone(),
                maturity: key.maturity,
                position: *position,
            })?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<BucketKey, i128>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| (BucketKey::new(e.party, e.currency, e.maturity), e.position))
            .collect())
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger of every given leg.
    pub fn from_legs<'a>(legs: impl IntoIterator<Item = &'a TradeLeg>) -> Self {
        let mut ledger = Self::new();
        for leg in legs {
            ledger.apply_leg(leg);
        }
        ledger
    }

    /// Apply a signed amount to a party's position in a market.
    pub fn apply(&mut self, key: BucketKey, direction: Direction, notional: u64) {
        *self.positions.entry(key).or_insert(0) += direction.signed(notional);
    }

    /// Apply one leg: receivers gain, payers lose.
    pub fn apply_leg(&mut self, leg: &TradeLeg) {
        self.apply(BucketKey::of_leg(leg), leg.direction(), leg.notional());
    }

    /// Get the net position in a bucket.
    pub fn position(&self, key: &BucketKey) -> i128 {
        self.positions.get(key).copied().unwrap_or(0)
    }

    /// Net position of a party summed over every market.
    pub fn position_for_party(&self, party: &PartyId) -> i128 {
        self.positions
            .iter()
            .filter(|(key, _)| &key.party == party)
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn all_positions(&self) -> &BTreeMap<BucketKey, i128> {
        &self.positions
    }

    /// Verify that every market nets to zero across parties.
    pub fn is_balanced(&self) -> bool {
        let mut market_sums: BTreeMap<MarketKey, i128> = BTreeMap::new();
        for (key, amount) in &self.positions {
            *market_sums.entry(key.market()).or_insert(0) += amount;
        }
        market_sums.values().all(|sum| *sum == 0)
    }

    /// Whether two ledgers hold the same non-zero positions.
    pub fn same_positions(&self, other: &Ledger) -> bool {
        let non_zero = |ledger: &Ledger| -> Vec<(BucketKey, i128)> {
            ledger
                .positions
                .iter()
                .filter(|(_, v)| **v != 0)
                .map(|(k, v)| (k.clone(), *v))
                .collect()
        };
        non_zero(self) == non_zero(other)
    }
}
