use crate::core::currency::CurrencyCode;
use crate::core::party::PartyId;
use crate::core::trade::{BookId, TradeLeg, DATE_FORMAT};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// A (currency, maturity) market, shared by every party trading it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketKey {
    pub currency: CurrencyCode,
    pub maturity: NaiveDate,
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.maturity.format(DATE_FORMAT))
    }
}

/// Position-level bucket: all legs of one party in one market.
///
/// Ordering is by party, then currency, then maturity date, which is the
/// order reports are rendered in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub party: PartyId,
    pub currency: CurrencyCode,
    pub maturity: NaiveDate,
}

impl BucketKey {
    pub fn new(party: PartyId, currency: CurrencyCode, maturity: NaiveDate) -> Self {
        Self {
            party,
            currency,
            maturity,
        }
    }

    pub fn of_leg(leg: &TradeLeg) -> Self {
        Self::new(leg.party().clone(), leg.currency().clone(), leg.maturity())
    }

    /// The same market seen from another party.
    pub fn for_party(market: &MarketKey, party: PartyId) -> Self {
        Self::new(party, market.currency.clone(), market.maturity)
    }

    pub fn market(&self) -> MarketKey {
        MarketKey {
            currency: self.currency.clone(),
            maturity: self.maturity,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.party,
            self.currency,
            self.maturity.format(DATE_FORMAT)
        )
    }
}

/// Book-level bucket: all legs of one party's book in one market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookBucketKey {
    pub party: PartyId,
    pub book: BookId,
    pub currency: CurrencyCode,
    pub maturity: NaiveDate,
}

impl BookBucketKey {
    pub fn of_leg(leg: &TradeLeg) -> Self {
        Self {
            party: leg.party().clone(),
            book: leg.book().clone(),
            currency: leg.currency().clone(),
            maturity: leg.maturity(),
        }
    }
}

impl fmt::Display for BookBucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.party,
            self.book,
            self.currency,
            self.maturity.format(DATE_FORMAT)
        )
    }
}

/// Strategy for grouping legs into netting buckets.
pub trait BucketKeyFn {
    type Key: Ord + Hash + Clone + fmt::Debug + fmt::Display + Serialize;

    fn key(&self, leg: &TradeLeg) -> Self::Key;
}

/// Groups by (party, currency, maturity).
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionLevel;

impl BucketKeyFn for PositionLevel {
    type Key = BucketKey;

    fn key(&self, leg: &TradeLeg) -> BucketKey {
        BucketKey::of_leg(leg)
    }
}

/// Groups by (party, book, currency, maturity).
#[derive(Debug, Clone, Copy, Default)]
pub struct BookLevel;

impl BucketKeyFn for BookLevel {
    type Key = BookBucketKey;

    fn key(&self, leg: &TradeLeg) -> BookBucketKey {
        BookBucketKey::of_leg(leg)
    }
}
