use crate::core::party::PartyId;
use crate::core::trade::Direction;
use crate::optimization::proposal::{Action, Proposal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregate flows of one party before and after compression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartyFlows {
    /// Received over original legs.
    pub total_in: u128,
    /// Paid over original legs.
    pub total_out: u128,
    /// `total_out - total_in` before compression.
    pub net_out: i128,
    /// `out - in` over the legs that survive.
    pub net_out_after: i128,
    /// Gross notional of original legs.
    pub original_notional: u128,
    /// Gross notional of surviving legs.
    pub notional: u128,
    pub original_trades: usize,
    pub new_trades: usize,
}

impl PartyFlows {
    fn record(&mut self, proposal: &Proposal) {
        let notional = proposal.notional as u128;
        let signed_out = -proposal.signed_notional();
        if proposal.action != Action::Add {
            self.original_trades += 1;
            self.original_notional += notional;
            self.net_out += signed_out;
            match proposal.direction {
                Direction::Pay => self.total_out += notional,
                Direction::Receive => self.total_in += notional,
            }
        }
        if proposal.action.is_live() {
            self.new_trades += 1;
            self.notional += notional;
            self.net_out_after += signed_out;
        }
    }

    fn absorb(&mut self, other: &PartyFlows) {
        self.total_in += other.total_in;
        self.total_out += other.total_out;
        self.net_out += other.net_out;
        self.net_out_after += other.net_out_after;
        self.original_notional += other.original_notional;
        self.notional += other.notional;
        self.original_trades += other.original_trades;
        self.new_trades += other.new_trades;
    }

    /// Gross notional went down.
    pub fn reduced(&self) -> bool {
        self.notional < self.original_notional
    }

    /// Share of the original gross notional removed, two decimals.
    pub fn reduction_percent(&self) -> Decimal {
        if self.original_notional == 0 {
            return Decimal::ZERO;
        }
        let removed = self.original_notional.saturating_sub(self.notional);
        match (
            Decimal::from_u128(removed),
            Decimal::from_u128(self.original_notional),
        ) {
            (Some(removed), Some(original)) => (removed * Decimal::ONE_HUNDRED / original).round_dp(2),
            _ => Decimal::ZERO,
        }
    }
}

/// Per-party check of a proposal list against the trades it came from.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    parties: BTreeMap<PartyId, PartyFlows>,
    total: PartyFlows,
}

impl Reconciliation {
    pub fn from_proposals(proposals: &[Proposal]) -> Self {
        let mut parties: BTreeMap<PartyId, PartyFlows> = BTreeMap::new();
        for proposal in proposals {
            parties
                .entry(proposal.party.clone())
                .or_default()
                .record(proposal);
        }
        let mut total = PartyFlows::default();
        for flows in parties.values() {
            total.absorb(flows);
        }
        Reconciliation { parties, total }
    }

    pub fn party(&self, party: &PartyId) -> Option<&PartyFlows> {
        self.parties.get(party)
    }

    pub fn parties(&self) -> impl Iterator<Item = (&PartyId, &PartyFlows)> {
        self.parties.iter()
    }

    pub fn total(&self) -> &PartyFlows {
        &self.total
    }

    /// Parties whose net flow changed.
    pub fn inconsistent_parties(&self) -> Vec<&PartyId> {
        self.parties
            .iter()
            .filter(|(_, flows)| flows.net_out != flows.net_out_after)
            .map(|(party, _)| party)
            .collect()
    }

    /// Every party's net flow is the same after compression.
    pub fn is_consistent(&self) -> bool {
        self.inconsistent_parties().is_empty()
    }
}

impl std::fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Reconciliation ===")?;
        writeln!(
            f,
            "{:<10} {:>15} {:>15} {:>15} {:>17} {:>15} {:>8} {:>7} {:>6}",
            "Party", "TotalIn", "TotalOut", "NetOut", "OriginalNotional", "Notional", "Reduced", "Trades", "New"
        )?;
        for (party, flows) in &self.parties {
            write_row(f, party.as_str(), flows)?;
        }
        write_row(f, "Total", &self.total)?;
        writeln!(f, "\nReduction: {}%", self.total.reduction_percent())?;
        if self.is_consistent() {
            writeln!(f, "Net positions preserved for every party.")?;
        } else {
            for party in self.inconsistent_parties() {
                writeln!(f, "Net position changed for {}", party)?;
            }
        }
        Ok(())
    }
}

fn write_row(f: &mut std::fmt::Formatter<'_>, name: &str, flows: &PartyFlows) -> std::fmt::Result {
    writeln!(
        f,
        "{:<10} {:>15} {:>15} {:>15} {:>17} {:>15} {:>8} {:>7} {:>6}",
        name,
        flows.total_in,
        flows.total_out,
        flows.net_out,
        flows.original_notional,
        flows.notional,
        if flows.reduced() { "Y" } else { "" },
        flows.original_trades,
        flows.new_trades
    )
}
