use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{Result, StorageError};
use crate::ledger::store::{LedgerStore, LedgerTxn};
use crate::model::{
    candidate::{Candidate, NewCandidate, Tally},
    history::{HistoryEntry, NewHistoryEntry},
    mongodb::Id,
    voter::VoterId,
};

/// A candidate and its history, guarded together.
#[derive(Debug)]
struct Record {
    candidate: Candidate,
    history: Vec<HistoryEntry>,
}

/// In-memory ledger store.
///
/// Each candidate sits behind its own async mutex; a transaction holds that
/// mutex from `begin` until it is committed or dropped, so transactions on
/// one candidate run one at a time while other candidates are unaffected.
/// Changes are staged in the transaction and only applied on commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Id, Arc<Mutex<Record>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, candidate_id: Id) -> Option<Arc<Mutex<Record>>> {
        self.records.read().await.get(&candidate_id).cloned()
    }
}

#[rocket::async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self, candidate_id: Id) -> Result<Option<Box<dyn LedgerTxn>>> {
        let record = match self.record(candidate_id).await {
            Some(record) => record,
            None => return Ok(None),
        };
        let guard = record.lock_owned().await;
        let tally = guard.candidate.tally(candidate_id);
        Ok(Some(Box::new(MemoryTxn {
            guard,
            tally,
            membership: None,
            history: Vec::new(),
        })))
    }

    async fn has_voted(&self, candidate_id: Id, voter: &VoterId) -> Result<Option<bool>> {
        match self.record(candidate_id).await {
            Some(record) => Ok(Some(record.lock().await.candidate.voters.contains(voter))),
            None => Ok(None),
        }
    }

    async fn history(&self, candidate_id: Id) -> Result<Option<Vec<HistoryEntry>>> {
        match self.record(candidate_id).await {
            Some(record) => Ok(Some(record.lock().await.history.clone())),
            None => Ok(None),
        }
    }

    async fn voted_for(&self, voter: &VoterId) -> Result<Vec<Id>> {
        let records = self.records.read().await.clone();
        let mut ids = Vec::new();
        for (id, record) in records {
            if record.lock().await.candidate.voters.contains(voter) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let candidate = Candidate::with_new_id(candidate);
        let record = Record {
            candidate: candidate.clone(),
            history: Vec::new(),
        };
        self.records
            .write()
            .await
            .insert(candidate.id, Arc::new(Mutex::new(record)));
        Ok(candidate)
    }

    async fn candidate(&self, candidate_id: Id) -> Result<Option<Candidate>> {
        match self.record(candidate_id).await {
            Some(record) => Ok(Some(record.lock().await.candidate.clone())),
            None => Ok(None),
        }
    }

    async fn candidates(&self, skip: u64, limit: u32) -> Result<(Vec<Candidate>, u64)> {
        let records = self
            .records
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        let mut candidates = Vec::with_capacity(records.len());
        for record in records {
            candidates.push(record.lock().await.candidate.clone());
        }
        candidates.sort_by(|a, b| {
            b.number_of_votes
                .cmp(&a.number_of_votes)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        let total = candidates.len() as u64;
        let page = candidates
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }
}

/// An open transaction on one in-memory candidate.
struct MemoryTxn {
    guard: OwnedMutexGuard<Record>,
    tally: Tally,
    /// Staged voter change: the voter and whether they are now a member.
    membership: Option<(VoterId, bool)>,
    history: Vec<HistoryEntry>,
}

impl MemoryTxn {
    fn is_member(&self, voter: &VoterId) -> bool {
        match &self.membership {
            Some((staged, member)) if staged == voter => *member,
            _ => self.guard.candidate.voters.contains(voter),
        }
    }

    fn stage(&mut self, voter: &VoterId, member: bool) -> Result<Tally> {
        // A transaction changes at most one voter, and never back and forth.
        if self.membership.is_some() || self.is_member(voter) == member {
            return Err(StorageError::Stale(self.tally.candidate_id).into());
        }
        self.membership = Some((voter.clone(), member));
        self.tally.number_of_votes = if member {
            self.tally.number_of_votes + 1
        } else {
            self.tally.number_of_votes - 1
        };
        self.tally.revision += 1;
        Ok(self.tally)
    }
}

#[rocket::async_trait]
impl LedgerTxn for MemoryTxn {
    async fn tally(&mut self) -> Result<Tally> {
        Ok(self.tally)
    }

    async fn has_voter(&mut self, voter: &VoterId) -> Result<bool> {
        Ok(self.is_member(voter))
    }

    async fn add_voter(&mut self, voter: &VoterId) -> Result<Tally> {
        self.stage(voter, true)
    }

    async fn remove_voter(&mut self, voter: &VoterId) -> Result<Tally> {
        self.stage(voter, false)
    }

    async fn latest_timestamp(&mut self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .history
            .last()
            .or_else(|| self.guard.history.last())
            .map(|entry| entry.timestamp))
    }

    async fn insert_history(&mut self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
        let entry = HistoryEntry::with_new_id(entry);
        self.history.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTxn {
            mut guard,
            tally,
            membership,
            history,
        } = *self;
        let record = &mut *guard;
        if let Some((voter, member)) = membership {
            if member {
                record.candidate.voters.insert(voter);
            } else {
                record.candidate.voters.remove(&voter);
            }
        }
        record.candidate.number_of_votes = tally.number_of_votes;
        record.candidate.revision = tally.revision;
        record.history.extend(history);
        Ok(())
    }
}
