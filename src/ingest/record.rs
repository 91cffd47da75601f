use crate::core::currency::CurrencyCode;
use crate::core::party::PartyId;
use crate::core::trade::{BookId, ClearingId, Direction, TradeId, TradeLeg, DATE_FORMAT};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;

/// Accepted maturity date layouts, tried in order.
const DATE_FORMATS: [&str; 3] = [DATE_FORMAT, "%Y-%m-%d", "%d/%m/%Y"];

/// One submitted trade leg, exactly as received.
///
/// Every field is kept as text so that a malformed record can still be
/// reported back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTrade {
    pub party: String,
    pub book: String,
    pub trade_id: String,
    #[serde(alias = "pay_or_receive")]
    pub direction: String,
    pub currency: String,
    pub maturity_date: String,
    #[serde(alias = "cpty")]
    pub counterparty: String,
    #[serde(alias = "ccp_trade_id")]
    pub clearing_id: String,
    #[serde(deserialize_with = "text_or_number")]
    pub notional: String,
}

fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Field {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }
    Ok(match Field::deserialize(deserializer)? {
        Field::Text(s) => s,
        Field::Unsigned(n) => n.to_string(),
        Field::Signed(n) => n.to_string(),
    })
}

impl RawTrade {
    /// The record a verified leg would have been submitted as.
    pub fn from_leg(leg: &TradeLeg) -> Self {
        Self {
            party: leg.party().to_string(),
            book: leg.book().to_string(),
            trade_id: leg.trade_id().to_string(),
            direction: leg.direction().to_string(),
            currency: leg.currency().to_string(),
            maturity_date: leg.maturity().format(DATE_FORMAT).to_string(),
            counterparty: leg.counterparty().to_string(),
            clearing_id: leg.clearing_id().to_string(),
            notional: leg.notional().to_string(),
        }
    }

    /// Validate every field, collecting all problems into one message.
    pub fn clean(&self) -> Result<TradeLeg, String> {
        let mut problems = Vec::new();

        let columns = [
            ("party", &self.party),
            ("book", &self.book),
            ("trade_id", &self.trade_id),
            ("currency", &self.currency),
            ("counterparty", &self.counterparty),
            ("clearing_id", &self.clearing_id),
        ];
        let empty: Vec<&str> = columns
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        match empty.len() {
            0 => {}
            1 => problems.push(format!("{} is empty", empty[0])),
            _ => problems.push(format!("{} are empty", empty.join(", "))),
        }

        let notional = match self.notional.trim().parse::<i128>() {
            Ok(n) if n < 0 => {
                problems.push(format!("notional {} is a negative value", self.notional));
                None
            }
            Ok(n) => match u64::try_from(n) {
                Ok(n) => Some(n),
                Err(_) => {
                    problems.push(format!("notional {} is out of range", self.notional));
                    None
                }
            },
            Err(_) => {
                problems.push(format!("notional {} is not a valid integer", self.notional));
                None
            }
        };

        let direction = parse_direction(&self.direction);
        if direction.is_none() {
            problems.push(format!("direction {} is neither 'P' nor 'R'", self.direction));
        }

        let maturity = parse_date(&self.maturity_date);
        if maturity.is_none() {
            problems.push(format!(
                "failed to parse maturity date {}, date is invalid",
                self.maturity_date
            ));
        }

        match (notional, direction, maturity) {
            (Some(notional), Some(direction), Some(maturity)) if problems.is_empty() => Ok(TradeLeg::new(
                PartyId::new(self.party.trim()),
                BookId::new(self.book.trim()),
                TradeId::new(self.trade_id.trim()),
                direction,
                CurrencyCode::new(self.currency.trim()),
                maturity,
                PartyId::new(self.counterparty.trim()),
                ClearingId::new(self.clearing_id.trim()),
                notional,
            )),
            _ => Err(problems.join("; ")),
        }
    }
}

pub fn parse_direction(raw: &str) -> Option<Direction> {
    let raw = raw.trim();
    if raw == "P" || raw.eq_ignore_ascii_case("pay") {
        Some(Direction::Pay)
    } else if raw == "R" || raw.eq_ignore_ascii_case("receive") {
        Some(Direction::Receive)
    } else {
        None
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// A leg left out of compression, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedTrade {
    #[serde(flatten)]
    pub record: RawTrade,
    pub reason: String,
}

impl ExcludedTrade {
    pub fn new(record: RawTrade, reason: impl Into<String>) -> Self {
        Self {
            record,
            reason: reason.into(),
        }
    }

    /// Report order: party, book, currency, maturity, direction, trade id.
    pub fn report_order(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.record, &other.record);
        a.party
            .cmp(&b.party)
            .then_with(|| a.book.cmp(&b.book))
            .then_with(|| a.currency.cmp(&b.currency))
            .then_with(|| {
                parse_date(&a.maturity_date)
                    .cmp(&parse_date(&b.maturity_date))
                    .then_with(|| a.maturity_date.cmp(&b.maturity_date))
            })
            .then_with(|| a.direction.cmp(&b.direction))
            .then_with(|| a.trade_id.cmp(&b.trade_id))
    }
}
