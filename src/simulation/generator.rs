//! Random portfolio generation for tests, benchmarks and demos.
//!
//! Parties are named `A`, `B`, ... (`A1`, `B1`, ... past the alphabet),
//! books `{n}BK{party}`, trade ids `{party}{index}` and clearing ids
//! `CCP{n}`. Maturities fall on successive year ends from 2022/12/31.

use crate::core::currency::CurrencyCode;
use crate::core::error::{CompressionError, Result};
use crate::core::party::PartyId;
use crate::core::trade::{BookId, ClearingId, Direction, TradeId, TradeLeg, TradePair, TradeSet};
use chrono::NaiveDate;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const FIRST_MATURITY_YEAR: i32 = 2022;

/// Shape of a generated portfolio.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub party_count: usize,
    pub trade_count: usize,
    /// Number of distinct maturity dates.
    pub maturity_count: usize,
    /// Each party gets between 1 and this many books.
    pub max_books: usize,
    pub currencies: Vec<CurrencyCode>,
    /// Inclusive notional range.
    pub min_notional: u64,
    pub max_notional: u64,
    /// Fixed seed for reproducible portfolios.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            party_count: 20,
            trade_count: 1_000,
            maturity_count: 3,
            max_books: 1,
            currencies: vec![CurrencyCode::new("AUD")],
            min_notional: 1_000,
            max_notional: 999_999,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    fn validate(&self) -> Result<()> {
        let problem = if self.party_count < 2 {
            "at least two parties are needed"
        } else if self.currencies.is_empty() {
            "at least one currency is needed"
        } else if self.maturity_count == 0 {
            "at least one maturity date is needed"
        } else if self.max_books == 0 {
            "every party needs a book"
        } else if self.min_notional > self.max_notional {
            "minimum notional exceeds maximum notional"
        } else {
            return Ok(());
        };
        Err(CompressionError::InvalidConfig(problem.to_string()))
    }
}

/// Name of the `index`-th party.
pub fn party_name(index: usize) -> String {
    let letter = LETTERS[index % LETTERS.len()] as char;
    match index / LETTERS.len() {
        0 => letter.to_string(),
        round => format!("{}{}", letter, round),
    }
}

struct PartyState {
    id: PartyId,
    books: Vec<BookId>,
    next_trade: usize,
}

impl PartyState {
    fn next_trade_id(&mut self) -> TradeId {
        let id = TradeId::new(format!("{}{}", self.id, self.next_trade));
        self.next_trade += 1;
        id
    }
}

/// Generate a random set of mirrored trades.
pub fn generate_portfolio(config: &GeneratorConfig) -> Result<TradeSet> {
    config.validate()?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let maturities: Vec<NaiveDate> = (0..config.maturity_count)
        .map(|i| {
            i32::try_from(i)
                .ok()
                .and_then(|offset| NaiveDate::from_ymd_opt(FIRST_MATURITY_YEAR + offset, 12, 31))
                .ok_or_else(|| CompressionError::InvalidConfig(format!("maturity index {} out of range", i)))
        })
        .collect::<Result<_>>()?;

    let mut parties: Vec<PartyState> = (0..config.party_count)
        .map(|i| {
            let id = PartyId::new(party_name(i));
            let books = (1..=rng.gen_range(1..=config.max_books))
                .map(|n| BookId::new(format!("{}BK{}", n, id)))
                .collect();
            PartyState {
                id,
                books,
                next_trade: 0,
            }
        })
        .collect();

    let mut set = TradeSet::new();
    for n in 0..config.trade_count {
        let payer = rng.gen_range(0..parties.len());
        let mut receiver = rng.gen_range(0..parties.len());
        while receiver == payer {
            receiver = rng.gen_range(0..parties.len());
        }
        let currency = config.currencies[rng.gen_range(0..config.currencies.len())].clone();
        let maturity = maturities[rng.gen_range(0..maturities.len())];
        let notional = rng.gen_range(config.min_notional..=config.max_notional);
        let clearing_id = ClearingId::new(format!("CCP{}", n));

        let mut leg = |index: usize, counterparty: usize, direction: Direction, rng: &mut StdRng| {
            let counterparty = parties[counterparty].id.clone();
            let party = &mut parties[index];
            let book = party.books[rng.gen_range(0..party.books.len())].clone();
            TradeLeg::new(
                party.id.clone(),
                book,
                party.next_trade_id(),
                direction,
                currency.clone(),
                maturity,
                counterparty,
                clearing_id.clone(),
                notional,
            )
        };
        let pay = leg(payer, receiver, Direction::Pay, &mut rng);
        let receive = leg(receiver, payer, Direction::Receive, &mut rng);
        set.add(TradePair::new(pay, receive)?)?;
    }

    info!(
        "generated {} trades across {} parties, {} currencies, {} maturities",
        set.len(),
        config.party_count,
        config.currencies.len(),
        maturities.len()
    );
    Ok(set)
}
