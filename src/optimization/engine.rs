use crate::core::bucket::BucketKey;
use crate::core::error::{CompressionError, Result};
use crate::core::party::PartyId;
use crate::core::trade::{BookId, ClearingId, Direction, TradeId, TradeLeg, TradePair, TradeSet};
use crate::optimization::hub::HubRebalancer;
use crate::optimization::netting::{bucket_targets, BucketTarget, Classification, NettingResult};
use crate::optimization::proposal::{verify_proposals, Action, Proposal, ProposalId, ProposalTable};
use crate::optimization::subset::{find_exact_subset, SubsetMatch};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Settings for a proposal run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Counterparty that absorbs residuals no exact subset can match.
    pub hub_party: PartyId,
    /// Book used for hub legs when the hub has no book of its own.
    pub hub_book: BookId,
    /// Prefix of synthesized clearing ids.
    pub clearing_id_prefix: String,
    /// Step budget of one exact subset search.
    pub max_search_steps: u64,
    /// Once the hub's residual is allocated, reroute its remaining pairs
    /// directly between parties instead of leaving them with the hub.
    #[serde(default)]
    pub redistribute_hub: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hub_party: PartyId::new("HUB"),
            hub_book: BookId::new("HUB"),
            clearing_id_prefix: "CCP".to_string(),
            max_search_steps: 1_000_000,
            redistribute_hub: false,
        }
    }
}

impl EngineConfig {
    pub fn with_hub(mut self, party: impl Into<String>) -> Self {
        self.hub_party = PartyId::new(party);
        self
    }

    pub fn with_hub_book(mut self, book: impl Into<String>) -> Self {
        self.hub_book = BookId::new(book);
        self
    }

    pub fn with_clearing_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.clearing_id_prefix = prefix.into();
        self
    }

    pub fn with_max_search_steps(mut self, steps: u64) -> Self {
        self.max_search_steps = steps;
        self
    }

    pub fn with_hub_redistribution(mut self, enabled: bool) -> Self {
        self.redistribute_hub = enabled;
        self
    }
}

/// Counters collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub buckets: usize,
    pub exact_matches: usize,
    pub hub_pairs: usize,
    pub exhausted_searches: usize,
    pub reassignments: usize,
    pub retired_pairs: usize,
    pub kept: usize,
    pub cancelled: usize,
    pub added: usize,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Proposal Statistics ===")?;
        writeln!(f, "Buckets:            {}", self.buckets)?;
        writeln!(f, "Exact Matches:      {}", self.exact_matches)?;
        writeln!(f, "Hub Pairs:          {}", self.hub_pairs)?;
        writeln!(f, "Exhausted Searches: {}", self.exhausted_searches)?;
        writeln!(f, "Reassignments:      {}", self.reassignments)?;
        writeln!(f, "Retired Hub Pairs:  {}", self.retired_pairs)?;
        writeln!(f, "Kept Legs:          {}", self.kept)?;
        writeln!(f, "Cancelled Legs:     {}", self.cancelled)?;
        writeln!(f, "Added Legs:         {}", self.added)?;
        Ok(())
    }
}

/// Final output of a proposal run.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalBook {
    /// Live proposals ordered by party, then trade id.
    pub proposals: Vec<Proposal>,
    pub stats: EngineStats,
}

impl ProposalBook {
    /// Re-check the end-of-run invariants against position-level netting.
    pub fn verify(&self, netting: &[NettingResult<BucketKey>]) -> Result<()> {
        verify_proposals(&self.proposals, &signed_targets(&bucket_targets(netting)))
    }

    pub fn with_action(&self, action: Action) -> impl Iterator<Item = &Proposal> {
        self.proposals.iter().filter(move |p| p.action == action)
    }

    pub fn for_party<'a>(&'a self, party: &'a PartyId) -> impl Iterator<Item = &'a Proposal> {
        self.proposals.iter().filter(move |p| &p.party == party)
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

/// Render proposals as a fixed-width table.
pub fn render_proposals(proposals: &[Proposal]) -> String {
    let mut out = format!(
        "{:<8} {:<8} {:<16} {:<3} {:<4} {:<10} {:<8} {:<12} {:>15} {:<6}\n",
        "Party", "Book", "TradeID", "P/R", "Ccy", "Maturity", "CParty", "ClearingID", "Notional", "Action"
    );
    for p in proposals {
        out.push_str(&format!(
            "{:<8} {:<8} {:<16} {:<3} {:<4} {:<10} {:<8} {:<12} {:>15} {:<6}\n",
            p.party.as_str(),
            p.book.as_str(),
            p.trade_id.as_str(),
            p.direction.as_str(),
            p.currency.as_str(),
            p.maturity.format(crate::core::trade::DATE_FORMAT).to_string(),
            p.counterparty.as_str(),
            p.clearing_id.as_str(),
            p.notional,
            p.action.as_str()
        ));
    }
    out
}

/// Assigns a terminal action to every leg of a trade set.
///
/// Buckets are processed in ascending key order and synthesized ids come
/// from a counter that restarts with each run, so two runs over the same
/// input produce the same book.
#[derive(Debug, Clone, Default)]
pub struct ProposalEngine {
    config: EngineConfig,
}

impl ProposalEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Generate proposals from trades and their position-level netting.
    pub fn generate(&self, trades: &TradeSet, netting: &[NettingResult<BucketKey>]) -> Result<ProposalBook> {
        let targets = bucket_targets(netting);
        let mut run = Run {
            config: &self.config,
            targets: &targets,
            table: ProposalTable::from_trades(trades)?,
            next_seq: 1,
            stats: EngineStats::default(),
        };

        let party_keys: Vec<BucketKey> = run
            .table
            .bucket_keys()
            .into_iter()
            .filter(|key| key.party != self.config.hub_party)
            .collect();
        // Fully offset sides go first so no later match can keep a leg there.
        for key in &party_keys {
            run.cancel_terminations(key)?;
        }
        for key in &party_keys {
            run.resolve_bucket(key)?;
        }

        for key in run.table.bucket_keys() {
            if key.party == self.config.hub_party {
                run.rebalance_hub(key)?;
            }
        }

        let mut stats = run.stats;
        let proposals = run.table.into_proposals();
        for proposal in &proposals {
            match proposal.action {
                Action::Keep => stats.kept += 1,
                Action::Cancel => stats.cancelled += 1,
                Action::Add => stats.added += 1,
                Action::Pending => {}
            }
        }
        verify_proposals(&proposals, &signed_targets(&targets))?;
        Ok(ProposalBook { proposals, stats })
    }
}

/// Generate proposals with the given configuration.
pub fn generate_proposals(
    trades: &TradeSet,
    netting: &[NettingResult<BucketKey>],
    config: &EngineConfig,
) -> Result<ProposalBook> {
    ProposalEngine::new(config.clone()).generate(trades, netting)
}

fn signed_targets(targets: &BTreeMap<BucketKey, BucketTarget>) -> BTreeMap<BucketKey, i128> {
    targets.iter().map(|(key, t)| (key.clone(), t.signed)).collect()
}

/// Mutable state of a single run.
struct Run<'a> {
    config: &'a EngineConfig,
    targets: &'a BTreeMap<BucketKey, BucketTarget>,
    table: ProposalTable,
    next_seq: u64,
    stats: EngineStats,
}

impl Run<'_> {
    fn target(&self, key: &BucketKey) -> Result<BucketTarget> {
        self.targets
            .get(key)
            .copied()
            .ok_or_else(|| CompressionError::UnknownBucket(key.clone()))
    }

    fn cancel_terminations(&mut self, key: &BucketKey) -> Result<()> {
        let target = self.target(key)?;
        for direction in [Direction::Pay, Direction::Receive] {
            if target.classification(direction) == Classification::Termination {
                for id in self.pending(key, Some(direction))? {
                    self.cancel_if_pending(id)?;
                }
            }
        }
        Ok(())
    }

    fn resolve_bucket(&mut self, key: &BucketKey) -> Result<()> {
        self.stats.buckets += 1;

        let residual = self.target(key)?.signed - self.table.committed(key)?;
        let direction = match Direction::of_signed(residual) {
            Some(direction) => direction,
            None => {
                debug!("{}: target met, cancelling remaining legs", key);
                return self.cancel_pending(key);
            }
        };
        let amount = u64::try_from(residual.unsigned_abs()).map_err(|_| CompressionError::NotionalOverflow {
            bucket: key.clone(),
            amount: residual,
        })?;

        // Keeping a leg also keeps its mirror, so a leg only qualifies while
        // the mirror's bucket can still take it.
        let mut candidates = Vec::new();
        for id in self.pending(key, Some(direction))? {
            let notional = self.table.get(id)?.notional;
            let mirror_bucket = self.table.get(self.table.mirror(id)?)?.bucket_key();
            match self.headroom(&mirror_bucket, direction.opposite())? {
                Some(room) if room < u128::from(notional) => {}
                _ => candidates.push((notional, id, mirror_bucket)),
            }
        }
        candidates.sort();
        let values: Vec<u64> = candidates.iter().map(|(notional, ..)| *notional).collect();

        let matched = match find_exact_subset(&values, amount, self.config.max_search_steps) {
            SubsetMatch::Found(indices) => {
                if self.fits_mirrors(&candidates, &indices, direction.opposite())? {
                    Some(indices)
                } else {
                    debug!("{}: match overshoots a counterparty bucket, settling against the hub", key);
                    None
                }
            }
            SubsetMatch::BudgetExhausted => {
                warn!(
                    "{}: subset search over {} legs exhausted {} steps, settling against the hub",
                    key,
                    values.len(),
                    self.config.max_search_steps
                );
                self.stats.exhausted_searches += 1;
                None
            }
            SubsetMatch::NotFound => None,
        };

        match matched {
            Some(indices) => {
                debug!("{}: kept {} of {} legs for {} {}", key, indices.len(), values.len(), direction, amount);
                self.stats.exact_matches += 1;
                for i in indices {
                    self.table.set_action(candidates[i].1, Action::Keep)?;
                }
                self.cancel_pending(key)
            }
            None => {
                self.cancel_pending(key)?;
                self.add_hub_pair(key, direction, amount)
            }
        }
    }

    /// Notional `key` can still commit in `direction` before passing its
    /// target. `None` for the hub, which takes any amount.
    fn headroom(&self, key: &BucketKey, direction: Direction) -> Result<Option<u128>> {
        if key.party == self.config.hub_party {
            return Ok(None);
        }
        let remaining = self.target(key)?.signed - self.table.committed(key)?;
        if Direction::of_signed(remaining) == Some(direction) {
            Ok(Some(remaining.unsigned_abs()))
        } else {
            Ok(Some(0))
        }
    }

    /// Whether the mirrors of the picked candidates fit their buckets taken
    /// together.
    fn fits_mirrors(
        &self,
        candidates: &[(u64, ProposalId, BucketKey)],
        picked: &[usize],
        mirror_direction: Direction,
    ) -> Result<bool> {
        let mut per_bucket: BTreeMap<&BucketKey, u128> = BTreeMap::new();
        for &i in picked {
            let (notional, _, bucket) = &candidates[i];
            *per_bucket.entry(bucket).or_insert(0) += u128::from(*notional);
        }
        for (bucket, total) in per_bucket {
            if let Some(room) = self.headroom(bucket, mirror_direction)? {
                if room < total {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn rebalance_hub(&mut self, key: BucketKey) -> Result<()> {
        let fallback = self.config.hub_book.clone();
        let rebalancer = HubRebalancer::new(&mut self.table, key.clone(), fallback)?
            .with_redistribution(self.config.redistribute_hub);
        let residual = rebalancer.residual();
        let outcome = rebalancer.run()?;
        debug!(
            "{}: hub keeps {} after {} reassignments and {} retired pairs",
            key, residual, outcome.reassignments, outcome.retired_pairs
        );
        self.stats.reassignments += outcome.reassignments;
        self.stats.retired_pairs += outcome.retired_pairs;
        Ok(())
    }

    /// Pending legs of a bucket, optionally restricted to one direction.
    fn pending(&self, key: &BucketKey, direction: Option<Direction>) -> Result<Vec<ProposalId>> {
        let mut ids = Vec::new();
        for id in self.table.with_action(key, Action::Pending)? {
            let leg_direction = self.table.get(id)?.direction;
            if direction.map_or(true, |d| d == leg_direction) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// A mirror in the same bucket may already have been resolved.
    fn cancel_if_pending(&mut self, id: ProposalId) -> Result<()> {
        if self.table.get(id)?.action == Action::Pending {
            self.table.set_action(id, Action::Cancel)?;
        }
        Ok(())
    }

    fn cancel_pending(&mut self, key: &BucketKey) -> Result<()> {
        for id in self.pending(key, None)? {
            self.cancel_if_pending(id)?;
        }
        Ok(())
    }

    /// Settle `amount` in `direction` for the bucket's party against the hub.
    fn add_hub_pair(&mut self, key: &BucketKey, direction: Direction, amount: u64) -> Result<()> {
        let clearing_id = self.next_clearing_id();
        let hub = &self.config.hub_party;
        let hub_key = BucketKey::for_party(&key.market(), hub.clone());
        let party_book = self
            .table
            .default_book(key)
            .cloned()
            .ok_or_else(|| CompressionError::UnknownBucket(key.clone()))?;
        let hub_book = self
            .table
            .default_book(&hub_key)
            .cloned()
            .unwrap_or_else(|| self.config.hub_book.clone());

        let leg = |party: &PartyId, book: BookId, direction: Direction, counterparty: &PartyId| {
            TradeLeg::new(
                party.clone(),
                book,
                TradeId::new(format!("{}-{}", party, clearing_id)),
                direction,
                key.currency.clone(),
                key.maturity,
                counterparty.clone(),
                clearing_id.clone(),
                amount,
            )
        };
        let pair = TradePair::new(
            leg(&key.party, party_book, direction, hub),
            leg(hub, hub_book, direction.opposite(), &key.party),
        )?;
        self.table.insert_pair(&pair)?;
        self.stats.hub_pairs += 1;
        debug!("{}: no exact match, added {} {} against {} as {}", key, direction, amount, hub, clearing_id);
        Ok(())
    }

    fn next_clearing_id(&mut self) -> ClearingId {
        loop {
            let id = ClearingId::new(format!("{}{:08}", self.config.clearing_id_prefix, self.next_seq));
            self.next_seq += 1;
            if !self.table.contains_clearing(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bucket::PositionLevel;
    use crate::core::currency::CurrencyCode;
    use crate::optimization::netting::compute_netting;
    use chrono::NaiveDate;

    fn maturity() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    fn set(pairs: &[(&str, &str, &str, u64)]) -> TradeSet {
        let aud = CurrencyCode::new("AUD");
        TradeSet::from_pairs(pairs.iter().map(|(id, payer, receiver, n)| {
            TradePair::mirrored(*id, *payer, *receiver, aud.clone(), maturity(), *n)
        }))
        .unwrap()
    }

    fn generate(trades: &TradeSet) -> ProposalBook {
        let netting = compute_netting(trades, &PositionLevel);
        ProposalEngine::new(EngineConfig::default())
            .generate(trades, &netting)
            .unwrap()
    }

    fn action_of(book: &ProposalBook, trade_id: &str) -> Action {
        book.proposals
            .iter()
            .find(|p| p.trade_id.as_str() == trade_id)
            .map(|p| p.action)
            .unwrap()
    }

    #[test]
    fn test_full_offset_cancels_everything() {
        let trades = set(&[("1", "A", "B", 100), ("2", "A", "B", 200), ("3", "B", "A", 300)]);
        let book = generate(&trades);
        assert_eq!(book.len(), 6);
        assert!(book.proposals.iter().all(|p| p.action == Action::Cancel));
        assert_eq!(book.stats.cancelled, 6);
        assert_eq!(book.stats.hub_pairs, 0);
    }

    #[test]
    fn test_exact_subset_kept() {
        // A pays B 100, 150 and 250, and receives 250 from C. Net pay 250.
        let trades = set(&[
            ("1", "A", "B", 100),
            ("2", "A", "B", 150),
            ("3", "A", "C", 250),
            ("4", "D", "A", 250),
        ]);
        let book = generate(&trades);
        let kept: u64 = book
            .for_party(&PartyId::new("A"))
            .filter(|p| p.action == Action::Keep && p.direction == Direction::Pay)
            .map(|p| p.notional)
            .sum();
        assert_eq!(kept, 250);
        assert_eq!(action_of(&book, "A-4"), Action::Cancel);
        book.verify(&compute_netting(&trades, &PositionLevel)).unwrap();
    }

    #[test]
    fn test_no_subset_goes_through_hub() {
        // A pays B 100 and C 200, receives 150 from D. Net pay 150: no subset.
        let trades = set(&[("1", "A", "B", 100), ("2", "A", "C", 200), ("3", "D", "A", 150)]);
        let book = generate(&trades);
        assert_eq!(action_of(&book, "A-1"), Action::Cancel);
        assert_eq!(action_of(&book, "A-2"), Action::Cancel);

        let party = PartyId::new("A");
        let added: Vec<&Proposal> = book
            .for_party(&party)
            .filter(|p| p.action == Action::Add)
            .collect();
        let net: i128 = added.iter().map(|p| p.signed_notional()).sum();
        assert_eq!(net, -150);
        assert!(book.stats.hub_pairs >= 1);
        book.verify(&compute_netting(&trades, &PositionLevel)).unwrap();
    }

    #[test]
    fn test_synthetic_hub_nets_to_zero() {
        let trades = set(&[("1", "A", "B", 100), ("2", "A", "C", 200), ("3", "D", "A", 150)]);
        let book = generate(&trades);
        let hub = PartyId::new("HUB");
        let net: i128 = book.for_party(&hub).map(|p| p.signed_notional()).sum();
        assert_eq!(net, 0);
        assert!(book.for_party(&hub).all(|p| p.action == Action::Add));
        assert_eq!(book.stats.retired_pairs, 0);
    }

    #[test]
    fn test_redistributing_hub_holds_nothing() {
        let trades = set(&[("1", "A", "B", 100), ("2", "A", "C", 200), ("3", "D", "A", 150)]);
        let netting = compute_netting(&trades, &PositionLevel);
        let config = EngineConfig::default().with_hub_redistribution(true);
        let book = generate_proposals(&trades, &netting, &config).unwrap();
        assert_eq!(book.for_party(&PartyId::new("HUB")).count(), 0);
        book.verify(&netting).unwrap();
    }

    #[test]
    fn test_offset_party_keeps_no_legs() {
        // B receives 100 from A and pays 100 to D: both of B's sides are
        // fully offset, so nothing of B may survive a match made for A or D.
        let trades = set(&[("1", "A", "B", 100), ("2", "B", "D", 100)]);
        let netting = compute_netting(&trades, &PositionLevel);
        let book = generate(&trades);
        let b = PartyId::new("B");
        assert!(book.for_party(&b).all(|p| p.action == Action::Cancel));
        assert!(book
            .proposals
            .iter()
            .filter(|p| p.action.is_live())
            .all(|p| p.counterparty != b));
        book.verify(&netting).unwrap();
    }

    #[test]
    fn test_matches_respect_counterparty_targets() {
        // X pays A 100 and B 100 and receives 150 from Z, so X nets to pay 50.
        // Keeping both of A's and B's legs would push X past 50 and force
        // notional onto X's offset receive side.
        let trades = set(&[("1", "X", "A", 100), ("2", "X", "B", 100), ("3", "Z", "X", 150)]);
        let netting = compute_netting(&trades, &PositionLevel);
        let book = generate(&trades);
        let party = PartyId::new("X");
        let live: Vec<&Proposal> = book
            .for_party(&party)
            .filter(|p| p.action.is_live())
            .collect();
        assert!(!live.is_empty());
        assert!(live.iter().all(|p| p.direction == Direction::Pay));
        let net: i128 = live.iter().map(|p| p.signed_notional()).sum();
        assert_eq!(net, -50);
        book.verify(&netting).unwrap();
    }

    #[test]
    fn test_residual_beyond_notional_range() {
        let trades = set(&[("1", "A", "B", u64::MAX), ("2", "A", "C", u64::MAX)]);
        let netting = compute_netting(&trades, &PositionLevel);
        let err = ProposalEngine::new(EngineConfig::default())
            .generate(&trades, &netting)
            .unwrap_err();
        assert!(matches!(err, CompressionError::NotionalOverflow { .. }));
        assert!(!err.is_internal());
    }

    #[test]
    fn test_every_leg_resolved() {
        let trades = set(&[
            ("1", "A", "B", 100),
            ("2", "B", "C", 70),
            ("3", "C", "A", 30),
            ("4", "A", "C", 55),
            ("5", "C", "B", 12),
        ]);
        let book = generate(&trades);
        assert!(book.proposals.iter().all(|p| p.action != Action::Pending));
        book.verify(&compute_netting(&trades, &PositionLevel)).unwrap();
    }

    #[test]
    fn test_deterministic_across_engines() {
        let trades = set(&[
            ("1", "A", "B", 100),
            ("2", "A", "C", 200),
            ("3", "D", "A", 150),
            ("4", "C", "B", 40),
        ]);
        assert_eq!(generate(&trades).proposals, generate(&trades).proposals);
    }

    #[test]
    fn test_clearing_id_prefix_and_collision() {
        // An input trade already uses the first synthesized id.
        let trades = set(&[("X00000001", "A", "B", 100), ("2", "A", "C", 200), ("3", "D", "A", 150)]);
        let netting = compute_netting(&trades, &PositionLevel);
        let config = EngineConfig::default().with_clearing_id_prefix("X");
        let book = generate_proposals(&trades, &netting, &config).unwrap();
        let synthesized: Vec<&str> = book
            .with_action(Action::Add)
            .map(|p| p.clearing_id.as_str())
            .collect();
        assert!(!synthesized.is_empty());
        assert!(synthesized.iter().all(|id| id.starts_with('X') && *id != "X00000001"));
    }

    #[test]
    fn test_exhausted_search_falls_back_to_hub() {
        let trades = set(&[("1", "A", "B", 100), ("2", "A", "C", 150), ("3", "D", "A", 0)]);
        let netting = compute_netting(&trades, &PositionLevel);
        let config = EngineConfig::default().with_max_search_steps(0);
        let book = generate_proposals(&trades, &netting, &config).unwrap();
        assert!(book.stats.exhausted_searches >= 1);
        book.verify(&netting).unwrap();
    }

    #[test]
    fn test_real_party_as_hub() {
        // B trades for real and also absorbs residuals.
        let trades = set(&[("1", "A", "B", 100), ("2", "A", "C", 200), ("3", "D", "A", 150)]);
        let netting = compute_netting(&trades, &PositionLevel);
        let config = EngineConfig::default().with_hub("B");
        let book = generate_proposals(&trades, &netting, &config).unwrap();
        book.verify(&netting).unwrap();
    }

    #[test]
    fn test_empty_trade_set() {
        let book = generate(&TradeSet::new());
        assert!(book.is_empty());
        assert_eq!(book.stats, EngineStats::default());
    }

    #[test]
    fn test_render_proposals() {
        let trades = set(&[("1", "A", "B", 100)]);
        let book = generate(&trades);
        let table = render_proposals(&book.proposals);
        assert!(table.starts_with("Party"));
        assert!(table.contains("2024/12/31"));
        assert_eq!(table.lines().count(), 3);
    }
}
