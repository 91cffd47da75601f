//! Rebalancing of the hub's synthesized trades within one market.
//!
//! Buckets that found no exact subset were settled against the hub with an
//! `Add` pair. Once every party bucket is resolved, the hub's net residual in
//! a market is allocated over its `Add` legs, largest first, trimming and
//! reassigning counterparties along a chain. Legs the allocation never
//! reaches keep their notional. With redistribution enabled, those leftover
//! pairs are then rerouted party to party as well, so the hub keeps only its
//! residual.

use crate::core::bucket::BucketKey;
use crate::core::error::{CompressionError, Result};
use crate::core::party::PartyId;
use crate::core::trade::{BookId, Direction};
use crate::optimization::proposal::{Action, ProposalId, ProposalTable};
use log::debug;

/// What a rebalancing pass did to one hub bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebalanceOutcome {
    /// Signed notional left with the hub.
    pub residual: i128,
    pub reassignments: usize,
    pub retired_pairs: usize,
}

/// Walks the hub's `Add` legs of one bucket, largest first on each side.
pub struct HubRebalancer<'a> {
    table: &'a mut ProposalTable,
    bucket: BucketKey,
    fallback_book: BookId,
    pay: Vec<ProposalId>,
    receive: Vec<ProposalId>,
    pay_cursor: usize,
    receive_cursor: usize,
    redistribute: bool,
    outcome: RebalanceOutcome,
}

impl<'a> HubRebalancer<'a> {
    /// Collect the hub's `Add` legs in `bucket`.
    ///
    /// Fails if any leg in the bucket is still `Pending`.
    pub fn new(table: &'a mut ProposalTable, bucket: BucketKey, fallback_book: BookId) -> Result<Self> {
        let mut pay = Vec::new();
        let mut receive = Vec::new();
        let mut residual = 0;
        for id in table.bucket(&bucket)? {
            let proposal = table.get(*id)?;
            match proposal.action {
                Action::Pending => {
                    return Err(CompressionError::InvariantViolation(format!(
                        "hub leg {} ({}) is still pending",
                        proposal.trade_id, bucket
                    )))
                }
                Action::Add => {
                    residual += proposal.signed_notional();
                    match proposal.direction {
                        Direction::Pay => pay.push(*id),
                        Direction::Receive => receive.push(*id),
                    }
                }
                Action::Keep | Action::Cancel => {}
            }
        }
        for side in [&mut pay, &mut receive] {
            sort_descending(table, side)?;
        }
        Ok(Self {
            table,
            bucket,
            fallback_book,
            pay,
            receive,
            pay_cursor: 0,
            receive_cursor: 0,
            redistribute: false,
            outcome: RebalanceOutcome {
                residual,
                ..RebalanceOutcome::default()
            },
        })
    }

    /// Also reroute the pairs left after the residual is allocated.
    pub fn with_redistribution(mut self, enabled: bool) -> Self {
        self.redistribute = enabled;
        self
    }

    pub fn residual(&self) -> i128 {
        self.outcome.residual
    }

    /// Allocate the residual, then, when redistributing, route every
    /// remaining hub pair directly between parties.
    pub fn run(mut self) -> Result<RebalanceOutcome> {
        if let Some(side) = Direction::of_signed(self.outcome.residual) {
            let amount = u64::try_from(self.outcome.residual.unsigned_abs()).map_err(|_| {
                CompressionError::InvariantViolation(format!(
                    "hub residual {} in {} exceeds the notional range",
                    self.outcome.residual, self.bucket
                ))
            })?;
            self.rebalance(amount, side, None)?;
        }
        if !self.redistribute {
            return Ok(self.outcome);
        }

        while let Some((id, side)) = self
            .next(Direction::Pay)
            .map(|id| (id, Direction::Pay))
            .or_else(|| self.next(Direction::Receive).map(|id| (id, Direction::Receive)))
        {
            let proposal = self.table.get(id)?;
            let (notional, counterparty) = (proposal.notional, proposal.counterparty.clone());
            let clearing_id = proposal.clearing_id.clone();
            self.table.retire_pair(&clearing_id)?;
            self.outcome.retired_pairs += 1;
            debug!(
                "{}: retired hub pair {} ({} {}), rerouting to {}",
                self.bucket, clearing_id, side, notional, counterparty
            );
            self.rebalance(notional, side.opposite(), Some(counterparty))?;
        }
        Ok(self.outcome)
    }

    /// Consume `amount` from `side`, reassigning consumed candidates to
    /// `chain` when one is open. A candidate larger than what is left is
    /// trimmed and its excess continues on the opposite side, chained to
    /// its counterparty.
    fn rebalance(&mut self, mut amount: u64, mut side: Direction, mut chain: Option<PartyId>) -> Result<()> {
        while amount > 0 {
            let id = self
                .next(side)
                .ok_or(CompressionError::RebalanceExhausted { remaining: amount })?;
            let candidate = self.table.get(id)?;
            let notional = candidate.notional;
            let counterparty = candidate.counterparty.clone();
            let clearing_id = candidate.clearing_id.clone();

            if let Some(to) = &chain {
                self.reassign(id, to)?;
            }
            if notional >= amount {
                if notional > amount {
                    self.table.set_notional(&clearing_id, amount)?;
                }
                amount = notional - amount;
                side = side.opposite();
                chain = Some(counterparty);
            } else {
                amount -= notional;
            }
        }
        Ok(())
    }

    /// Hand the hub leg `id` over to `to`: its counterparty now trades with `to`.
    fn reassign(&mut self, id: ProposalId, to: &PartyId) -> Result<()> {
        let staying = self.table.mirror(id)?;
        let key = BucketKey::for_party(&self.bucket.market(), to.clone());
        let book = self
            .table
            .default_book(&key)
            .cloned()
            .unwrap_or_else(|| self.fallback_book.clone());
        self.table.reassign_counterparty(staying, to, book)?;
        self.outcome.reassignments += 1;
        debug!(
            "{}: {} now faces {} instead of the hub",
            self.bucket,
            self.table.get(staying)?.party,
            to
        );
        Ok(())
    }

    fn next(&mut self, side: Direction) -> Option<ProposalId> {
        let (candidates, cursor) = match side {
            Direction::Pay => (&self.pay, &mut self.pay_cursor),
            Direction::Receive => (&self.receive, &mut self.receive_cursor),
        };
        let id = candidates.get(*cursor).copied()?;
        *cursor += 1;
        Some(id)
    }
}

/// Largest notional first, ties by proposal id.
fn sort_descending(table: &ProposalTable, ids: &mut Vec<ProposalId>) -> Result<()> {
    let mut keyed = Vec::with_capacity(ids.len());
    for id in ids.iter() {
        keyed.push((table.get(*id)?.notional, *id));
    }
    keyed.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    *ids = keyed.into_iter().map(|(_, id)| id).collect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::currency::CurrencyCode;
    use crate::core::trade::{ClearingId, TradePair};
    use crate::optimization::proposal::verify_proposals;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn maturity() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    fn key(party: &str) -> BucketKey {
        BucketKey::new(PartyId::new(party), CurrencyCode::new("AUD"), maturity())
    }

    /// Hub pairs: positive amounts mean the party pays the hub.
    fn hub_table(flows: &[(&str, i64)]) -> ProposalTable {
        let mut table = ProposalTable::new();
        for (i, (party, amount)) in flows.iter().enumerate() {
            let id = format!("CCP{}", i + 1);
            let aud = CurrencyCode::new("AUD");
            let pair = if *amount > 0 {
                TradePair::mirrored(id, *party, "HUB", aud, maturity(), *amount as u64)
            } else {
                TradePair::mirrored(id, "HUB", *party, aud, maturity(), amount.unsigned_abs())
            };
            table.insert_pair(&pair).unwrap();
        }
        table
    }

    fn targets(flows: &[(&str, i64)], hub: i128) -> BTreeMap<BucketKey, i128> {
        let mut targets: BTreeMap<BucketKey, i128> = flows
            .iter()
            .map(|(party, amount)| (key(party), -(*amount as i128)))
            .collect();
        targets.insert(key("HUB"), hub);
        targets
    }

    fn run(table: &mut ProposalTable) -> RebalanceOutcome {
        HubRebalancer::new(table, key("HUB"), BookId::new("HUB"))
            .unwrap()
            .run()
            .unwrap()
    }

    fn run_redistributing(table: &mut ProposalTable) -> RebalanceOutcome {
        HubRebalancer::new(table, key("HUB"), BookId::new("HUB"))
            .unwrap()
            .with_redistribution(true)
            .run()
            .unwrap()
    }

    #[test]
    fn test_untouched_candidates_keep_their_notional() {
        // Balanced hub: nothing to allocate, so every pair stays as added.
        let flows = [("A", 100), ("B", -60), ("C", -40)];
        let mut table = hub_table(&flows);
        let outcome = run(&mut table);
        assert_eq!(outcome.residual, 0);
        assert_eq!(outcome.reassignments, 0);
        assert_eq!(outcome.retired_pairs, 0);

        let proposals = table.into_proposals();
        let hub: Vec<u64> = proposals
            .iter()
            .filter(|p| p.party.as_str() == "HUB")
            .map(|p| p.notional)
            .collect();
        assert_eq!(hub, vec![100, 60, 40]);
        assert!(proposals.iter().all(|p| p.action == Action::Add));
        verify_proposals(&proposals, &targets(&flows, 0)).unwrap();
    }

    #[test]
    fn test_zero_residual_routes_directly() {
        // A pays the hub 100, the hub pays B 100: A should pay B.
        let flows = [("A", 100), ("B", -100)];
        let mut table = hub_table(&flows);
        let outcome = run_redistributing(&mut table);
        assert_eq!(outcome.residual, 0);
        assert_eq!(outcome.retired_pairs, 1);
        assert_eq!(outcome.reassignments, 1);

        let proposals = table.into_proposals();
        assert_eq!(proposals.len(), 2);
        assert!(proposals.iter().all(|p| p.party.as_str() != "HUB"));
        let a = proposals.iter().find(|p| p.party.as_str() == "A").unwrap();
        assert_eq!(a.counterparty.as_str(), "B");
        assert_eq!(a.direction, Direction::Pay);
        verify_proposals(&proposals, &targets(&flows, 0)).unwrap();
    }

    #[test]
    fn test_uneven_chain() {
        let flows = [("A", 70), ("B", 30), ("C", -60), ("D", -40)];
        let mut table = hub_table(&flows);
        let outcome = run_redistributing(&mut table);
        assert_eq!(outcome.residual, 0);
        let proposals = table.into_proposals();
        assert!(proposals.iter().all(|p| p.party.as_str() != "HUB"));
        verify_proposals(&proposals, &targets(&flows, 0)).unwrap();
    }

    #[test]
    fn test_residual_stays_with_hub() {
        // Hub net receives 50.
        let flows = [("A", 120), ("B", 30), ("C", -100)];
        let mut table = hub_table(&flows);
        let outcome = run(&mut table);
        assert_eq!(outcome.residual, 50);

        let proposals = table.into_proposals();
        let hub: Vec<_> = proposals.iter().filter(|p| p.party.as_str() == "HUB").collect();
        assert_eq!(hub.iter().map(|p| p.signed_notional()).sum::<i128>(), 50);
        verify_proposals(&proposals, &targets(&flows, 50)).unwrap();
    }

    #[test]
    fn test_trimmed_candidate_keeps_clearing_id() {
        let flows = [("A", 80), ("B", -30)];
        let mut table = hub_table(&flows);
        run(&mut table);
        // A's original hub trade is trimmed to the residual 50.
        let [first, second] = table.pair(&ClearingId::new("CCP1")).unwrap();
        assert_eq!(table.get(first).unwrap().notional, 50);
        assert_eq!(table.get(second).unwrap().notional, 50);
        verify_proposals(&table.into_proposals(), &targets(&flows, 50)).unwrap();
    }

    #[test]
    fn test_pending_hub_leg_rejected() {
        let mut table = ProposalTable::from_trades(
            &crate::core::trade::TradeSet::from_pairs(vec![TradePair::mirrored(
                "CCP1",
                "A",
                "HUB",
                CurrencyCode::new("AUD"),
                maturity(),
                10,
            )])
            .unwrap(),
        )
        .unwrap();
        let result = HubRebalancer::new(&mut table, key("HUB"), BookId::new("HUB"));
        assert!(matches!(result, Err(CompressionError::InvariantViolation(_))));
    }

    #[test]
    fn test_exhaustion_is_reported() {
        // Unbalanced candidates: nothing can absorb the second pay leg.
        let mut table = hub_table(&[("A", -10), ("B", -10)]);
        let mut rebalancer = HubRebalancer::new(&mut table, key("HUB"), BookId::new("HUB")).unwrap();
        let result = rebalancer.rebalance(30, Direction::Pay, None);
        assert!(matches!(
            result,
            Err(CompressionError::RebalanceExhausted { remaining: 10 })
        ));
    }
}
