//! One synchronous compression pass: netting, proposals, reconciliation.

use crate::core::bucket::{BookBucketKey, BookLevel, BucketKey, PositionLevel};
use crate::core::error::{CompressionError, Result};
use crate::core::ledger::Ledger;
use crate::core::trade::TradeSet;
use crate::ingest::loader::Portfolio;
use crate::ingest::record::ExcludedTrade;
use crate::optimization::engine::{render_proposals, EngineConfig, EngineStats, ProposalEngine};
use crate::optimization::netting::{compute_netting, NettingResult, NettingSummary};
use crate::optimization::proposal::Proposal;
use crate::optimization::reconciliation::Reconciliation;
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Everything a compression run produces.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionReport {
    pub request_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub config: EngineConfig,
    pub trade_count: usize,
    pub position_netting: Vec<NettingResult<BucketKey>>,
    pub book_netting: Vec<NettingResult<BookBucketKey>>,
    pub summary: NettingSummary,
    pub proposals: Vec<Proposal>,
    pub stats: EngineStats,
    pub reconciliation: Reconciliation,
    /// Net positions after compression, identical to those before.
    pub positions: Ledger,
    pub excluded: Vec<ExcludedTrade>,
}

impl fmt::Display for CompressionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Compression Report ===")?;
        writeln!(f, "Request ID: {}", self.request_id)?;
        writeln!(f, "Generated:  {}", self.generated_at.to_rfc3339())?;
        writeln!(f, "Trades:     {}", self.trade_count)?;
        writeln!(f, "Excluded:   {}", self.excluded.len())?;
        writeln!(f)?;
        write!(f, "{}", self.summary)?;
        writeln!(f)?;
        write!(f, "{}", self.stats)?;
        writeln!(f)?;
        writeln!(f, "=== Proposals ===")?;
        write!(f, "{}", render_proposals(&self.proposals))?;
        writeln!(f)?;
        write!(f, "{}", self.reconciliation)?;
        if !self.excluded.is_empty() {
            writeln!(f, "\n=== Excluded Trades ===")?;
            for excluded in &self.excluded {
                writeln!(
                    f,
                    "{} {} {}: {}",
                    excluded.record.party, excluded.record.trade_id, excluded.record.clearing_id, excluded.reason
                )?;
            }
        }
        Ok(())
    }
}

/// Runs netting, proposal generation and reconciliation in order.
#[derive(Debug, Clone, Default)]
pub struct CompressionPipeline {
    engine: ProposalEngine,
}

impl CompressionPipeline {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: ProposalEngine::new(config),
        }
    }

    pub fn run(&self, trades: &TradeSet) -> Result<CompressionReport> {
        self.run_with_exclusions(trades, Vec::new())
    }

    /// Run over a loaded portfolio, carrying its exclusions into the report.
    pub fn run_portfolio(&self, portfolio: &Portfolio) -> Result<CompressionReport> {
        self.run_with_exclusions(&portfolio.trades, portfolio.excluded.clone())
    }

    fn run_with_exclusions(&self, trades: &TradeSet, excluded: Vec<ExcludedTrade>) -> Result<CompressionReport> {
        let request_id = Uuid::new_v4();
        info!("[{}] compressing {} trades", request_id, trades.len());

        let started = Instant::now();
        let position_netting = compute_netting(trades, &PositionLevel);
        let book_netting = compute_netting(trades, &BookLevel);
        let summary = NettingSummary::from_results(&position_netting);
        info!(
            "[{}] netting: {} position rows, {} book rows in {:?}",
            request_id,
            position_netting.len(),
            book_netting.len(),
            started.elapsed()
        );

        let started = Instant::now();
        let book = self.engine.generate(trades, &position_netting)?;
        info!(
            "[{}] proposals: {} legs ({} kept, {} cancelled, {} added) in {:?}",
            request_id,
            book.proposals.len(),
            book.stats.kept,
            book.stats.cancelled,
            book.stats.added,
            started.elapsed()
        );

        let started = Instant::now();
        let before = Ledger::from_legs(trades.legs());
        let surviving: Vec<_> = book
            .proposals
            .iter()
            .filter(|p| p.action.is_live())
            .map(|p| p.to_leg())
            .collect();
        let positions = Ledger::from_legs(&surviving);
        if !positions.is_balanced() || !positions.same_positions(&before) {
            return Err(CompressionError::InvariantViolation(
                "net positions changed after compression".to_string(),
            ));
        }
        let reconciliation = Reconciliation::from_proposals(&book.proposals);
        if let Some(party) = reconciliation.inconsistent_parties().first() {
            return Err(CompressionError::InvariantViolation(format!(
                "net position of {} changed after compression",
                party
            )));
        }
        info!("[{}] reconciliation in {:?}", request_id, started.elapsed());

        Ok(CompressionReport {
            request_id,
            generated_at: Utc::now(),
            config: self.engine.config().clone(),
            trade_count: trades.len(),
            position_netting,
            book_netting,
            summary,
            proposals: book.proposals,
            stats: book.stats,
            reconciliation,
            positions,
            excluded,
        })
    }
}
