use crate::core::currency::CurrencyCode;
use crate::core::error::{CompressionError, Result};
use crate::core::party::PartyId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Canonical rendering of maturity dates in reports.
pub const DATE_FORMAT: &str = "%Y/%m/%d";

string_id!(
    /// Booking book of a leg within its party.
    BookId
);
string_id!(
    /// Party-local identifier of a leg.
    TradeId
);
string_id!(
    /// Identifier shared by the two mirrored legs of one logical trade.
    ClearingId
);

/// Which side of the trade a leg is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "P")]
    Pay,
    #[serde(rename = "R")]
    Receive,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Pay => Direction::Receive,
            Direction::Receive => Direction::Pay,
        }
    }

    /// Signed notional: receiving counts positive, paying negative.
    pub fn signed(self, notional: u64) -> i128 {
        match self {
            Direction::Pay => -(notional as i128),
            Direction::Receive => notional as i128,
        }
    }

    /// Direction that carries a signed amount, `None` for zero.
    pub fn of_signed(amount: i128) -> Option<Self> {
        match amount.signum() {
            1 => Some(Direction::Receive),
            -1 => Some(Direction::Pay),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Pay => "P",
            Direction::Receive => "R",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One party's view of a mirrored trade.
///
/// Legs are immutable once verified. The other leg of the same trade
/// carries the same clearing id, currency, maturity and notional, the
/// opposite direction, and names this leg's party as its counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeLeg {
    party: PartyId,
    book: BookId,
    trade_id: TradeId,
    direction: Direction,
    currency: CurrencyCode,
    maturity: NaiveDate,
    counterparty: PartyId,
    clearing_id: ClearingId,
    notional: u64,
}

impl TradeLeg {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        party: PartyId,
        book: BookId,
        trade_id: TradeId,
        direction: Direction,
        currency: CurrencyCode,
        maturity: NaiveDate,
        counterparty: PartyId,
        clearing_id: ClearingId,
        notional: u64,
    ) -> Self {
        Self {
            party,
            book,
            trade_id,
            direction,
            currency,
            maturity,
            counterparty,
            clearing_id,
            notional,
        }
    }

    // --- Accessors ---

    pub fn party(&self) -> &PartyId {
        &self.party
    }

    pub fn book(&self) -> &BookId {
        &self.book
    }

    pub fn trade_id(&self) -> &TradeId {
        &self.trade_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    pub fn maturity(&self) -> NaiveDate {
        self.maturity
    }

    pub fn counterparty(&self) -> &PartyId {
        &self.counterparty
    }

    pub fn clearing_id(&self) -> &ClearingId {
        &self.clearing_id
    }

    pub fn notional(&self) -> u64 {
        self.notional
    }

    /// Notional signed by direction.
    pub fn signed_notional(&self) -> i128 {
        self.direction.signed(self.notional)
    }
}

/// The two legs of one logical trade, verified to mirror each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradePair {
    legs: [TradeLeg; 2],
}

impl TradePair {
    /// Pair two legs, checking that they mirror each other.
    pub fn new(first: TradeLeg, second: TradeLeg) -> Result<Self> {
        verify_mirror(&first, &second).map_err(|reason| CompressionError::MirrorMismatch {
            clearing_id: first.clearing_id.clone(),
            reason,
        })?;
        Ok(Self {
            legs: [first, second],
        })
    }

    /// Build a pair where `payer` pays `receiver`.
    ///
    /// Each leg is booked in a book named after its party and carries a
    /// trade id derived from the clearing id.
    pub fn mirrored(
        clearing_id: impl Into<String>,
        payer: impl Into<String>,
        receiver: impl Into<String>,
        currency: CurrencyCode,
        maturity: NaiveDate,
        notional: u64,
    ) -> Self {
        let clearing_id = ClearingId::new(clearing_id);
        let payer = PartyId::new(payer);
        let receiver = PartyId::new(receiver);
        let leg = |party: &PartyId, counterparty: &PartyId, direction| {
            TradeLeg::new(
                party.clone(),
                BookId::new(format!("BK{}", party)),
                TradeId::new(format!("{}-{}", party, clearing_id)),
                direction,
                currency.clone(),
                maturity,
                counterparty.clone(),
                clearing_id.clone(),
                notional,
            )
        };
        Self {
            legs: [
                leg(&payer, &receiver, Direction::Pay),
                leg(&receiver, &payer, Direction::Receive),
            ],
        }
    }

    pub fn clearing_id(&self) -> &ClearingId {
        &self.legs[0].clearing_id
    }

    pub fn legs(&self) -> &[TradeLeg; 2] {
        &self.legs
    }

    pub fn notional(&self) -> u64 {
        self.legs[0].notional
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.legs[0].currency
    }

    pub fn maturity(&self) -> NaiveDate {
        self.legs[0].maturity
    }

    pub fn involves(&self, party: &PartyId) -> bool {
        self.legs.iter().any(|leg| &leg.party == party)
    }
}

/// Check the mirror invariant between two legs, returning the first mismatch.
pub fn verify_mirror(first: &TradeLeg, second: &TradeLeg) -> std::result::Result<(), String> {
    if first.party == first.counterparty {
        return Err(format!("party {} trades with itself", first.party));
    }
    if first.clearing_id != second.clearing_id {
        return Err(format!(
            "clearing ids differ: {} and {}",
            first.clearing_id, second.clearing_id
        ));
    }
    if first.direction == second.direction {
        return Err(format!("both legs have direction {}", first.direction));
    }
    if first.notional != second.notional {
        return Err(format!(
            "different notionals: {} and {}",
            first.notional, second.notional
        ));
    }
    if first.currency != second.currency {
        return Err(format!(
            "different currency: {} and {}",
            first.currency, second.currency
        ));
    }
    if first.maturity != second.maturity {
        return Err(format!(
            "different maturity date: {} and {}",
            first.maturity.format(DATE_FORMAT),
            second.maturity.format(DATE_FORMAT)
        ));
    }
    if first.counterparty != second.party || second.counterparty != first.party {
        return Err(format!(
            "counterparties do not match, first: party={}, cpty={}, second: party={}, cpty={}",
            first.party, first.counterparty, second.party, second.counterparty
        ));
    }
    Ok(())
}

/// An ordered collection of verified trade pairs, unique by clearing id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeSet {
    pairs: Vec<TradePair>,
    #[serde(skip)]
    seen: HashSet<ClearingId>,
}

impl TradeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from pairs, rejecting duplicate clearing ids.
    pub fn from_pairs(pairs: impl IntoIterator<Item = TradePair>) -> Result<Self> {
        let mut set = Self::new();
        for pair in pairs {
            set.add(pair)?;
        }
        Ok(set)
    }

    pub fn add(&mut self, pair: TradePair) -> Result<()> {
        if !self.seen.insert(pair.clearing_id().clone()) {
            return Err(CompressionError::DuplicateClearingId(
                pair.clearing_id().clone(),
            ));
        }
        self.pairs.push(pair);
        Ok(())
    }

    pub fn pairs(&self) -> &[TradePair] {
        &self.pairs
    }

    /// Every leg, in pair order.
    pub fn legs(&self) -> impl Iterator<Item = &TradeLeg> {
        self.pairs.iter().flat_map(|pair| pair.legs.iter())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Total notional of all trades, each counted once.
    pub fn gross_notional(&self) -> u128 {
        self.pairs.iter().map(|p| p.notional() as u128).sum()
    }

    /// All unique parties holding a leg.
    pub fn parties(&self) -> Vec<PartyId> {
        let mut parties: Vec<PartyId> = self.legs().map(|leg| leg.party.clone()).collect();
        parties.sort();
        parties.dedup();
        parties
    }

    /// All unique currencies.
    pub fn currencies(&self) -> Vec<CurrencyCode> {
        let mut currencies: Vec<CurrencyCode> =
            self.pairs.iter().map(|p| p.currency().clone()).collect();
        currencies.sort();
        currencies.dedup();
        currencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    fn leg(party: &str, cpty: &str, direction: Direction, notional: u64) -> TradeLeg {
        TradeLeg::new(
            PartyId::new(party),
            BookId::new("BK1"),
            TradeId::new(format!("{}1", party)),
            direction,
            CurrencyCode::new("AUD"),
            date(),
            PartyId::new(cpty),
            ClearingId::new("CCP1"),
            notional,
        )
    }

    #[test]
    fn test_pair_accepts_mirrored_legs() {
        let pair = TradePair::new(
            leg("A", "B", Direction::Pay, 100),
            leg("B", "A", Direction::Receive, 100),
        )
        .unwrap();
        assert_eq!(pair.notional(), 100);
        assert_eq!(pair.clearing_id().as_str(), "CCP1");
        assert!(pair.involves(&PartyId::new("B")));
    }

    #[test]
    fn test_pair_rejects_same_direction() {
        let err = TradePair::new(
            leg("A", "B", Direction::Pay, 100),
            leg("B", "A", Direction::Pay, 100),
        )
        .unwrap_err();
        assert!(err.to_string().contains("both legs have direction P"));
    }

    #[test]
    fn test_pair_rejects_notional_mismatch() {
        let result = TradePair::new(
            leg("A", "B", Direction::Pay, 100),
            leg("B", "A", Direction::Receive, 90),
        );
        assert!(matches!(
            result,
            Err(CompressionError::MirrorMismatch { .. })
        ));
    }

    #[test]
    fn test_pair_rejects_wrong_counterparty() {
        let result = TradePair::new(
            leg("A", "B", Direction::Pay, 100),
            leg("C", "A", Direction::Receive, 100),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_pair_rejects_self_trade() {
        let result = TradePair::new(
            leg("A", "A", Direction::Pay, 100),
            leg("A", "A", Direction::Receive, 100),
        );
        assert!(result.unwrap_err().to_string().contains("trades with itself"));
    }

    #[test]
    fn test_mirrored_builder_verifies() {
        let pair = TradePair::mirrored("CCP9", "A", "B", CurrencyCode::new("AUD"), date(), 50);
        let [first, second] = pair.legs().clone();
        assert!(verify_mirror(&first, &second).is_ok());
        assert_eq!(first.direction(), Direction::Pay);
        assert_eq!(second.counterparty().as_str(), "A");
    }

    #[test]
    fn test_trade_set_rejects_duplicate_clearing_id() {
        let aud = CurrencyCode::new("AUD");
        let result = TradeSet::from_pairs(vec![
            TradePair::mirrored("CCP1", "A", "B", aud.clone(), date(), 10),
            TradePair::mirrored("CCP1", "B", "C", aud, date(), 20),
        ]);
        assert!(matches!(
            result,
            Err(CompressionError::DuplicateClearingId(_))
        ));
    }

    #[test]
    fn test_trade_set_aggregates() {
        let aud = CurrencyCode::new("AUD");
        let set = TradeSet::from_pairs(vec![
            TradePair::mirrored("CCP1", "A", "B", aud.clone(), date(), 10),
            TradePair::mirrored("CCP2", "B", "C", CurrencyCode::new("USD"), date(), 20),
        ])
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.legs().count(), 4);
        assert_eq!(set.gross_notional(), 30);
        assert_eq!(set.parties().len(), 3);
        assert_eq!(set.currencies().len(), 2);
    }

    #[test]
    fn test_direction_signing() {
        assert_eq!(Direction::Pay.signed(10), -10);
        assert_eq!(Direction::Receive.signed(10), 10);
        assert_eq!(Direction::of_signed(-3), Some(Direction::Pay));
        assert_eq!(Direction::of_signed(0), None);
        assert_eq!(Direction::Pay.opposite(), Direction::Receive);
    }
}
