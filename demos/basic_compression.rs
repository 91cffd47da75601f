//! Basic portfolio compression example.
//!
//! Shows how netting targets turn into keep, cancel and add proposals
//! while every party's net position stays where it was.

use chrono::NaiveDate;
use compression_engine::core::currency::CurrencyCode;
use compression_engine::core::party::PartyId;
use compression_engine::core::trade::{TradePair, TradeSet};
use compression_engine::optimization::engine::EngineConfig;
use compression_engine::optimization::netting::render_table;
use compression_engine::optimization::proposal::Action;
use compression_engine::pipeline::CompressionPipeline;
use compression_engine::prelude::{CompressionError, Result};

fn main() -> Result<()> {
    println!("╔════════════════════════════════════════════════╗");
    println!("║  compression-engine: Basic Compression Example ║");
    println!("╚════════════════════════════════════════════════╝\n");

    let aud = CurrencyCode::new("AUD");
    let maturity = NaiveDate::from_ymd_opt(2024, 12, 31)
        .ok_or_else(|| CompressionError::InvalidConfig("invalid maturity date".to_string()))?;

    // --- Scenario 1: An exact subset survives ---
    println!("━━━ Scenario 1: Exact Subset ━━━\n");

    // A pays 100, 150 and 250 and receives 250: net pay 250.
    let trades = TradeSet::from_pairs(vec![
        TradePair::mirrored("CCP1", "A", "B", aud.clone(), maturity, 100),
        TradePair::mirrored("CCP2", "A", "B", aud.clone(), maturity, 150),
        TradePair::mirrored("CCP3", "A", "C", aud.clone(), maturity, 250),
        TradePair::mirrored("CCP4", "D", "A", aud.clone(), maturity, 250),
    ])?;
    let report = CompressionPipeline::default().run(&trades)?;
    print!("{}", render_table(&report.position_netting));
    println!();
    print!("{}", report.stats);
    println!();

    // --- Scenario 2: No subset, rebooked through the hub ---
    println!("━━━ Scenario 2: Hub Fallback ━━━\n");

    // A pays 100 and 200 and receives 150: no subset sums to 150.
    let trades = TradeSet::from_pairs(vec![
        TradePair::mirrored("CCP1", "A", "B", aud.clone(), maturity, 100),
        TradePair::mirrored("CCP2", "A", "C", aud.clone(), maturity, 200),
        TradePair::mirrored("CCP3", "D", "A", aud, maturity, 150),
    ])?;
    let report = CompressionPipeline::default().run(&trades)?;
    println!("{}", report);

    // Per-party outcome
    println!("━━━ Proposals for A ━━━\n");
    let a = PartyId::new("A");
    for proposal in report.proposals.iter().filter(|p| p.party == a) {
        let note = match proposal.action {
            Action::Add => "new trade",
            Action::Cancel => "torn up",
            _ => "unchanged",
        };
        println!(
            "  {:<12} {} {:>8} vs {:<4} [{}]",
            proposal.clearing_id, proposal.direction, proposal.notional, proposal.counterparty, note
        );
    }
    println!();

    // --- Scenario 3: Hub pairs rerouted between parties ---
    println!("━━━ Scenario 3: Hub Redistribution ━━━\n");

    let pipeline = CompressionPipeline::new(EngineConfig::default().with_hub_redistribution(true));
    let report = pipeline.run(&trades)?;
    for proposal in report.proposals.iter().filter(|p| p.action == Action::Add) {
        println!(
            "  {:<4} {} {:>8} vs {:<4}",
            proposal.party, proposal.direction, proposal.notional, proposal.counterparty
        );
    }
    println!("\n  Hub pairs retired: {}", report.stats.retired_pairs);
    Ok(())
}
