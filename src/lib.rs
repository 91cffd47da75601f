//! # compression-engine
//!
//! Portfolio compression for mirrored bilateral trades.
//!
//! Every trade is submitted as two legs, one per side, sharing a clearing
//! id. The engine nets each party's legs per currency and maturity, then
//! proposes which legs to keep, which to cancel and which new legs to add so
//! that gross notional drops while every party's net position stays the
//! same.
//!
//! ## Architecture
//!
//! - **core**: Foundational types: parties, currencies, trade legs and pairs, bucket keys, ledger
//! - **ingest**: Cleaning and pairing of submitted trade records
//! - **optimization**: Netting targets, exact subset matching, proposals, hub rebalancing, reconciliation
//! - **simulation**: Random portfolio generation
//! - **pipeline**: One compression pass from trades to report

pub mod core;
pub mod ingest;
pub mod optimization;
pub mod pipeline;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::core::bucket::{BookBucketKey, BookLevel, BucketKey, PositionLevel};
    pub use crate::core::currency::CurrencyCode;
    pub use crate::core::error::{CompressionError, Result};
    pub use crate::core::ledger::Ledger;
    pub use crate::core::party::PartyId;
    pub use crate::core::trade::{Direction, TradeLeg, TradePair, TradeSet};
    pub use crate::ingest::loader::Portfolio;
    pub use crate::optimization::engine::{generate_proposals, EngineConfig, ProposalBook, ProposalEngine};
    pub use crate::optimization::netting::{compute_netting, CompressionRate, NettingResult};
    pub use crate::optimization::proposal::{Action, Proposal};
    pub use crate::optimization::reconciliation::Reconciliation;
    pub use crate::pipeline::{CompressionPipeline, CompressionReport};
}
