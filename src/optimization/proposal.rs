use crate::core::bucket::BucketKey;
use crate::core::currency::CurrencyCode;
use crate::core::error::{CompressionError, Result};
use crate::core::party::PartyId;
use crate::core::trade::{verify_mirror, BookId, ClearingId, Direction, TradeId, TradeLeg, TradePair, TradeSet};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Index of a proposal in its [`ProposalTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProposalId(usize);

impl ProposalId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happens to a leg after compression.
///
/// Every original leg starts `Pending` and ends `Keep` or `Cancel`.
/// Synthesized legs start and end as `Add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Pending,
    Keep,
    #[serde(rename = "CXL", alias = "CANCEL")]
    Cancel,
    Add,
}

impl Action {
    /// Whether the leg survives compression.
    pub fn is_live(self) -> bool {
        matches!(self, Action::Keep | Action::Add)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Pending => "PENDING",
            Action::Keep => "KEEP",
            Action::Cancel => "CXL",
            Action::Add => "ADD",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trade leg annotated with its compression action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub party: PartyId,
    pub book: BookId,
    pub trade_id: TradeId,
    pub direction: Direction,
    pub currency: CurrencyCode,
    pub maturity: NaiveDate,
    pub counterparty: PartyId,
    pub clearing_id: ClearingId,
    pub notional: u64,
    pub action: Action,
    #[serde(skip)]
    retired: bool,
}

impl Proposal {
    fn from_leg(id: ProposalId, leg: &TradeLeg, action: Action) -> Self {
        Self {
            id,
            party: leg.party().clone(),
            book: leg.book().clone(),
            trade_id: leg.trade_id().clone(),
            direction: leg.direction(),
            currency: leg.currency().clone(),
            maturity: leg.maturity(),
            counterparty: leg.counterparty().clone(),
            clearing_id: leg.clearing_id().clone(),
            notional: leg.notional(),
            action,
            retired: false,
        }
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(self.party.clone(), self.currency.clone(), self.maturity)
    }

    pub fn signed_notional(&self) -> i128 {
        self.direction.signed(self.notional)
    }

    /// Detached from every index by a counterparty reassignment.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// The leg this proposal currently describes.
    pub fn to_leg(&self) -> TradeLeg {
        TradeLeg::new(
            self.party.clone(),
            self.book.clone(),
            self.trade_id.clone(),
            self.direction,
            self.currency.clone(),
            self.maturity,
            self.counterparty.clone(),
            self.clearing_id.clone(),
            self.notional,
        )
    }
}

/// Owns every proposal of a run, addressed by [`ProposalId`].
///
/// The bucket index and the clearing index hold ids only. Both legs of a
/// clearing id are always changed together.
#[derive(Debug, Default)]
pub struct ProposalTable {
    proposals: Vec<Proposal>,
    by_bucket: BTreeMap<BucketKey, Vec<ProposalId>>,
    by_clearing: HashMap<ClearingId, [ProposalId; 2]>,
    /// First book seen in each bucket, used for synthesized legs.
    default_books: HashMap<BucketKey, BookId>,
}

impl ProposalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `Pending` proposal per leg of every pair.
    pub fn from_trades(trades: &TradeSet) -> Result<Self> {
        let mut table = Self::new();
        for pair in trades.pairs() {
            table.insert(pair, Action::Pending)?;
        }
        Ok(table)
    }

    /// Index a synthesized pair with both legs marked `Add`.
    pub fn insert_pair(&mut self, pair: &TradePair) -> Result<[ProposalId; 2]> {
        self.insert(pair, Action::Add)
    }

    fn insert(&mut self, pair: &TradePair, action: Action) -> Result<[ProposalId; 2]> {
        if self.by_clearing.contains_key(pair.clearing_id()) {
            return Err(CompressionError::DuplicateClearingId(pair.clearing_id().clone()));
        }
        let [first, second] = pair.legs();
        let ids = [self.push(first, action), self.push(second, action)];
        self.by_clearing.insert(pair.clearing_id().clone(), ids);
        Ok(ids)
    }

    fn push(&mut self, leg: &TradeLeg, action: Action) -> ProposalId {
        let id = ProposalId(self.proposals.len());
        let proposal = Proposal::from_leg(id, leg, action);
        let key = proposal.bucket_key();
        self.default_books
            .entry(key.clone())
            .or_insert_with(|| proposal.book.clone());
        self.by_bucket.entry(key).or_default().push(id);
        self.proposals.push(proposal);
        id
    }

    // --- Lookups ---

    pub fn get(&self, id: ProposalId) -> Result<&Proposal> {
        self.proposals
            .get(id.0)
            .ok_or(CompressionError::UnknownProposal(id.0))
    }

    fn get_mut(&mut self, id: ProposalId) -> Result<&mut Proposal> {
        self.proposals
            .get_mut(id.0)
            .ok_or(CompressionError::UnknownProposal(id.0))
    }

    pub fn contains_clearing(&self, clearing_id: &ClearingId) -> bool {
        self.by_clearing.contains_key(clearing_id)
    }

    pub fn pair(&self, clearing_id: &ClearingId) -> Result<[ProposalId; 2]> {
        self.by_clearing
            .get(clearing_id)
            .copied()
            .ok_or_else(|| CompressionError::UnknownClearingId(clearing_id.clone()))
    }

    /// The other leg of the same clearing id.
    pub fn mirror(&self, id: ProposalId) -> Result<ProposalId> {
        let clearing_id = &self.get(id)?.clearing_id;
        let [first, second] = self.pair(clearing_id)?;
        if first == id {
            Ok(second)
        } else if second == id {
            Ok(first)
        } else {
            Err(CompressionError::AsymmetricPair {
                clearing_id: clearing_id.clone(),
                reason: format!("proposal {} is not indexed under its clearing id", id),
            })
        }
    }

    pub fn bucket(&self, key: &BucketKey) -> Result<&[ProposalId]> {
        self.by_bucket
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| CompressionError::UnknownBucket(key.clone()))
    }

    /// Bucket keys in ascending order.
    pub fn bucket_keys(&self) -> Vec<BucketKey> {
        self.by_bucket.keys().cloned().collect()
    }

    pub fn default_book(&self, key: &BucketKey) -> Option<&BookId> {
        self.default_books.get(key)
    }

    /// Ids in a bucket holding the given action.
    pub fn with_action(&self, key: &BucketKey, action: Action) -> Result<Vec<ProposalId>> {
        let mut ids = Vec::new();
        for id in self.bucket(key)? {
            if self.get(*id)?.action == action {
                ids.push(*id);
            }
        }
        Ok(ids)
    }

    /// Signed notional already committed in a bucket by `Keep` and `Add`.
    pub fn committed(&self, key: &BucketKey) -> Result<i128> {
        let mut sum = 0;
        for id in self.bucket(key)? {
            let proposal = self.get(*id)?;
            if proposal.action.is_live() {
                sum += proposal.signed_notional();
            }
        }
        Ok(sum)
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    // --- Mutations ---

    /// Resolve a pending leg and its mirror to `Keep` or `Cancel`.
    pub fn set_action(&mut self, id: ProposalId, action: Action) -> Result<()> {
        if !matches!(action, Action::Keep | Action::Cancel) {
            return Err(CompressionError::InvariantViolation(format!(
                "pending legs resolve to KEEP or CXL, not {}",
                action
            )));
        }
        let mirror = self.mirror(id)?;
        for leg in [id, mirror] {
            let proposal = self.get(leg)?;
            if proposal.action != Action::Pending {
                return Err(CompressionError::AsymmetricPair {
                    clearing_id: proposal.clearing_id.clone(),
                    reason: format!("leg {} is already {}", leg, proposal.action),
                });
            }
        }
        self.get_mut(id)?.action = action;
        self.get_mut(mirror)?.action = action;
        Ok(())
    }

    /// Change the notional of both legs of a clearing id.
    pub fn set_notional(&mut self, clearing_id: &ClearingId, notional: u64) -> Result<()> {
        for id in self.pair(clearing_id)? {
            self.get_mut(id)?.notional = notional;
        }
        Ok(())
    }

    /// Move the far side of `staying`'s trade onto `to`.
    ///
    /// The mirror leg is retired and detached from its bucket. A new leg is
    /// booked on `to` with the retired leg's direction and action, and the
    /// clearing index now pairs `staying` with it.
    pub fn reassign_counterparty(
        &mut self,
        staying: ProposalId,
        to: &PartyId,
        book: BookId,
    ) -> Result<ProposalId> {
        let retired = self.mirror(staying)?;
        let staying_leg = self.get(staying)?.clone();
        if &staying_leg.party == to {
            return Err(CompressionError::InvariantViolation(format!(
                "cannot reassign clearing id {} to its own party {}",
                staying_leg.clearing_id, to
            )));
        }
        let far = self.get(retired)?.clone();
        self.detach(retired)?;

        let new_id = ProposalId(self.proposals.len());
        let leg = TradeLeg::new(
            to.clone(),
            book,
            TradeId::new(format!("{}-{}", to, far.clearing_id)),
            far.direction,
            far.currency.clone(),
            far.maturity,
            staying_leg.party.clone(),
            far.clearing_id.clone(),
            far.notional,
        );
        let proposal = Proposal::from_leg(new_id, &leg, far.action);
        self.by_bucket
            .entry(proposal.bucket_key())
            .or_default()
            .push(new_id);
        self.proposals.push(proposal);

        self.get_mut(staying)?.counterparty = to.clone();
        self.by_clearing
            .insert(far.clearing_id.clone(), [staying, new_id]);
        Ok(new_id)
    }

    /// Drop a synthesized pair entirely.
    pub fn retire_pair(&mut self, clearing_id: &ClearingId) -> Result<()> {
        for id in self.pair(clearing_id)? {
            if self.get(id)?.action != Action::Add {
                return Err(CompressionError::InvariantViolation(format!(
                    "only synthesized pairs can be retired, clearing id {}",
                    clearing_id
                )));
            }
            self.detach(id)?;
        }
        self.by_clearing.remove(clearing_id);
        Ok(())
    }

    fn detach(&mut self, id: ProposalId) -> Result<()> {
        let key = self.get(id)?.bucket_key();
        let ids = self
            .by_bucket
            .get_mut(&key)
            .ok_or_else(|| CompressionError::UnknownBucket(key.clone()))?;
        ids.retain(|other| *other != id);
        self.get_mut(id)?.retired = true;
        Ok(())
    }

    /// Proposals that are still attached, in table order.
    pub fn live(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.iter().filter(|p| !p.retired)
    }

    /// Final output: attached proposals ordered by party, then trade id.
    pub fn into_proposals(self) -> Vec<Proposal> {
        let mut proposals: Vec<Proposal> =
            self.proposals.into_iter().filter(|p| !p.retired).collect();
        proposals.sort_by(|a, b| {
            (&a.party, &a.trade_id, a.id).cmp(&(&b.party, &b.trade_id, b.id))
        });
        proposals
    }
}

/// Check the end-of-run invariants over a final proposal list.
///
/// - no proposal is left `Pending`,
/// - each clearing id has exactly two legs that mirror each other and share
///   the same action,
/// - in every bucket the signed sum over `Keep` and `Add` equals the signed
///   target, zero for buckets without one.
pub fn verify_proposals(proposals: &[Proposal], targets: &BTreeMap<BucketKey, i128>) -> Result<()> {
    let mut pairs: HashMap<&ClearingId, Vec<&Proposal>> = HashMap::new();
    let mut sums: BTreeMap<BucketKey, i128> = BTreeMap::new();

    for proposal in proposals {
        if proposal.action == Action::Pending {
            return Err(CompressionError::InvariantViolation(format!(
                "proposal {} ({} {}) is still pending",
                proposal.id, proposal.party, proposal.trade_id
            )));
        }
        pairs.entry(&proposal.clearing_id).or_default().push(proposal);
        let sum = sums.entry(proposal.bucket_key()).or_insert(0);
        if proposal.action.is_live() {
            *sum += proposal.signed_notional();
        }
    }

    for (clearing_id, legs) in &pairs {
        let asymmetric = |reason: String| CompressionError::AsymmetricPair {
            clearing_id: (*clearing_id).clone(),
            reason,
        };
        let [first, second] = legs.as_slice() else {
            return Err(asymmetric(format!("{} legs", legs.len())));
        };
        if first.action != second.action {
            return Err(asymmetric(format!(
                "actions differ: {} and {}",
                first.action, second.action
            )));
        }
        verify_mirror(&first.to_leg(), &second.to_leg()).map_err(asymmetric)?;
    }

    for key in sums.keys().chain(targets.keys()) {
        let expected = targets.get(key).copied().unwrap_or(0);
        let actual = sums.get(key).copied().unwrap_or(0);
        if expected != actual {
            return Err(CompressionError::TargetMismatch {
                bucket: key.clone(),
                expected,
                actual,
            });
        }
    }
    Ok(())
}
