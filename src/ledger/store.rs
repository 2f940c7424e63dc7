use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    candidate::{Candidate, NewCandidate, Tally},
    history::{HistoryEntry, NewHistoryEntry},
    mongodb::Id,
    voter::VoterId,
};

/// Persistence behind the vote ledger and its history.
///
/// Every mutation of a candidate's ledger happens inside a [`LedgerTxn`]
/// obtained from [`LedgerStore::begin`]. Implementations must make each
/// transaction serializable with respect to every other transaction on the
/// same candidate, and must not make transactions on different candidates
/// wait for each other.
#[rocket::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction over one candidate's ledger.
    ///
    /// Returns `Ok(None)` if no such candidate exists.
    async fn begin(&self, candidate_id: Id) -> Result<Option<Box<dyn LedgerTxn>>>;

    /// Returns `Ok(None)` if no such candidate exists.
    async fn has_voted(&self, candidate_id: Id, voter: &VoterId) -> Result<Option<bool>>;

    /// All history entries of a candidate, oldest first, as of one point in
    /// time. Returns `Ok(None)` if no such candidate exists.
    async fn history(&self, candidate_id: Id) -> Result<Option<Vec<HistoryEntry>>>;

    /// The candidates the given voter currently votes for.
    async fn voted_for(&self, voter: &VoterId) -> Result<Vec<Id>>;

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate>;

    async fn candidate(&self, candidate_id: Id) -> Result<Option<Candidate>>;

    /// A page of candidates, most votes first then by name, plus the total
    /// candidate count.
    async fn candidates(&self, skip: u64, limit: u32) -> Result<(Vec<Candidate>, u64)>;
}

/// An open, atomic unit of work on one candidate's ledger.
///
/// Nothing becomes visible to other readers until [`LedgerTxn::commit`]
/// succeeds. Dropping the transaction without committing discards it.
#[rocket::async_trait]
pub trait LedgerTxn: Send {
    async fn tally(&mut self) -> Result<Tally>;

    async fn has_voter(&mut self, voter: &VoterId) -> Result<bool>;

    /// Add a voter who is not yet in the voter set, incrementing the counter
    /// and the revision. Returns the updated tally.
    async fn add_voter(&mut self, voter: &VoterId) -> Result<Tally>;

    /// Remove a voter who is in the voter set, decrementing the counter and
    /// incrementing the revision. Returns the updated tally.
    async fn remove_voter(&mut self, voter: &VoterId) -> Result<Tally>;

    /// Timestamp of the newest history entry for this candidate, if any.
    async fn latest_timestamp(&mut self) -> Result<Option<DateTime<Utc>>>;

    async fn insert_history(&mut self, entry: NewHistoryEntry) -> Result<HistoryEntry>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Shared handle on the configured [`LedgerStore`], kept in managed state.
#[derive(Clone)]
pub struct Store(Arc<dyn LedgerStore>);

impl Store {
    pub fn new(store: impl LedgerStore + 'static) -> Self {
        Self(Arc::new(store))
    }
}

impl Deref for Store {
    type Target = dyn LedgerStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
