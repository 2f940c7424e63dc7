//! The vote ledger: who votes for which candidate, and how many votes each
//! candidate has.
//!
//! A candidate's `number_of_votes` is a cached count of its voter set. Both
//! only change through [`VoteLedger::cast`] and [`VoteLedger::retract`],
//! which update them together with one [`HistoryLog`] entry in a single
//! transaction. Repeating a cast or retract is a successful no-op and
//! records nothing.

mod history;
mod memory;
mod mongo;
mod retry;
mod store;

pub use history::HistoryLog;
pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use retry::{RetryPolicy, DEFAULT_TRANSACTION_ATTEMPTS};
pub use store::{LedgerStore, LedgerTxn, Store};

use rocket::tokio::time::sleep;

use crate::error::{Error, Result, StorageError};
use crate::model::{mongodb::Id, voter::VoterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Cast,
    Retract,
}

#[derive(Clone)]
pub struct VoteLedger {
    store: Store,
    retry: RetryPolicy,
}

impl VoteLedger {
    /// A ledger that tries each conflicting mutation at most `attempts`
    /// times (at least once), backing off exponentially in between.
    pub fn new(store: Store, attempts: u32) -> Self {
        Self::with_retry_policy(store, RetryPolicy::with_attempts(attempts))
    }

    pub fn with_retry_policy(store: Store, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Record `voter` as voting for the candidate and return the candidate's
    /// counter. Does nothing if they already do.
    pub async fn cast(&self, candidate_id: Id, voter: &VoterId) -> Result<u32> {
        self.mutate(candidate_id, voter, Change::Cast).await
    }

    /// Withdraw `voter`'s vote for the candidate and return the candidate's
    /// counter. Does nothing if they have no vote to withdraw.
    pub async fn retract(&self, candidate_id: Id, voter: &VoterId) -> Result<u32> {
        self.mutate(candidate_id, voter, Change::Retract).await
    }

    pub async fn has_voted(&self, candidate_id: Id, voter: &VoterId) -> Result<bool> {
        self.store
            .has_voted(candidate_id, voter)
            .await?
            .ok_or_else(|| candidate_not_found(candidate_id))
    }

    async fn mutate(&self, candidate_id: Id, voter: &VoterId, change: Change) -> Result<u32> {
        let mut attempt = 1;
        loop {
            match self.try_mutate(candidate_id, voter, change).await {
                Err(err) if err.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        error!("{change:?} on candidate {candidate_id} failed after {attempt} attempts: {err}");
                        return Err(StorageError::Conflict { attempts: attempt }.into());
                    }
                    let pause = self.retry.backoff(attempt);
                    warn!("{change:?} on candidate {candidate_id} conflicted (attempt {attempt}), retrying in {pause:?}: {err}");
                    sleep(pause).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_mutate(&self, candidate_id: Id, voter: &VoterId, change: Change) -> Result<u32> {
        let mut txn = self
            .store
            .begin(candidate_id)
            .await?
            .ok_or_else(|| candidate_not_found(candidate_id))?;

        let voted = txn.has_voter(voter).await?;
        let tally = match (change, voted) {
            (Change::Cast, false) => txn.add_voter(voter).await?,
            (Change::Retract, true) => txn.remove_voter(voter).await?,
            // Already in the requested state; the transaction is discarded.
            _ => return Ok(txn.tally().await?.number_of_votes),
        };
        HistoryLog::append(txn.as_mut(), &tally).await?;
        txn.commit().await?;

        debug!(
            "{change:?} by {voter} on candidate {candidate_id}: now {} votes (revision {})",
            tally.number_of_votes, tally.revision
        );
        Ok(tally.number_of_votes)
    }
}

fn candidate_not_found(candidate_id: Id) -> Error {
    Error::not_found(format!("Candidate with ID '{}'", candidate_id))
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use rocket::{futures::future::join_all, tokio};

    use super::*;
    use crate::model::{
        api::candidate::CandidateSpec,
        candidate::{Candidate, NewCandidate, Tally},
        history::{HistoryEntry, NewHistoryEntry},
    };

    async fn new_candidate(store: &Store) -> Id {
        let candidate = NewCandidate::try_from(CandidateSpec::named("Dave")).unwrap();
        store.insert_candidate(candidate).await.unwrap().id
    }

    fn voter(name: &str) -> VoterId {
        VoterId::new(name).unwrap()
    }

    async fn voters_of(store: &Store, candidate_id: Id) -> HashSet<VoterId> {
        store.candidate(candidate_id).await.unwrap().unwrap().voters.clone()
    }

    #[backend_test]
    async fn cast_twice_same_as_once(store: Store, ledger: VoteLedger, history: HistoryLog) {
        let candidate = new_candidate(&store).await;
        let alice = voter("alice");

        assert_eq!(ledger.cast(candidate, &alice).await.unwrap(), 1);
        assert_eq!(ledger.cast(candidate, &alice).await.unwrap(), 1);

        let stored = store.candidate(candidate).await.unwrap().unwrap();
        assert_eq!(stored.number_of_votes, 1);
        assert_eq!(stored.voters, HashSet::from([alice.clone()]));
        assert!(ledger.has_voted(candidate, &alice).await.unwrap());
        assert_eq!(history.history(candidate).await.unwrap().len(), 1);
    }

    #[backend_test]
    async fn cast_then_retract_restores_state(store: Store, ledger: VoteLedger) {
        let candidate = new_candidate(&store).await;
        ledger.cast(candidate, &voter("bob")).await.unwrap();
        let before = store.candidate(candidate).await.unwrap().unwrap();

        ledger.cast(candidate, &voter("alice")).await.unwrap();
        ledger.retract(candidate, &voter("alice")).await.unwrap();

        let after = store.candidate(candidate).await.unwrap().unwrap();
        assert_eq!(after.number_of_votes, before.number_of_votes);
        assert_eq!(after.voters, before.voters);
        assert!(!ledger.has_voted(candidate, &voter("alice")).await.unwrap());
    }

    #[backend_test]
    async fn retract_without_vote_is_noop(store: Store, ledger: VoteLedger, history: HistoryLog) {
        let candidate = new_candidate(&store).await;
        assert_eq!(ledger.retract(candidate, &voter("alice")).await.unwrap(), 0);

        let stored = store.candidate(candidate).await.unwrap().unwrap();
        assert_eq!(stored.number_of_votes, 0);
        assert_eq!(stored.revision, 0);
        assert!(history.history(candidate).await.unwrap().is_empty());
    }

    #[backend_test]
    async fn history_matches_returned_counts(store: Store, ledger: VoteLedger, history: HistoryLog) {
        let candidate = new_candidate(&store).await;
        let calls = [
            (Change::Cast, "alice"),
            (Change::Cast, "bob"),
            (Change::Cast, "alice"),
            (Change::Cast, "carol"),
            (Change::Retract, "bob"),
            (Change::Retract, "bob"),
            (Change::Retract, "alice"),
        ];

        let mut returned = Vec::new();
        for (change, name) in calls {
            let revision_before = store.candidate(candidate).await.unwrap().unwrap().revision;
            let count = ledger.mutate(candidate, &voter(name), change).await.unwrap();
            let revision_after = store.candidate(candidate).await.unwrap().unwrap().revision;
            if revision_after != revision_before {
                returned.push(count);
            }
        }

        assert_eq!(returned, vec![1, 2, 3, 2, 1]);
        assert_eq!(history.history(candidate).await.unwrap().counts(), returned);
    }

    #[backend_test]
    async fn unknown_candidate_not_found(ledger: VoteLedger) {
        let missing = Id::new();
        let alice = voter("alice");
        assert!(matches!(ledger.cast(missing, &alice).await, Err(Error::NotFound(_))));
        assert!(matches!(ledger.retract(missing, &alice).await, Err(Error::NotFound(_))));
        assert!(matches!(ledger.has_voted(missing, &alice).await, Err(Error::NotFound(_))));
    }

    #[backend_test]
    async fn concurrent_distinct_voters_all_counted(store: Store, ledger: VoteLedger, history: HistoryLog) {
        const VOTERS: usize = 64;
        let candidate = new_candidate(&store).await;

        let tasks = (0..VOTERS).map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.cast(candidate, &voter(&format!("voter{i}"))).await })
        });
        let mut counts = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect::<Vec<_>>();
        counts.sort_unstable();

        // Every cast observed a distinct counter value.
        assert_eq!(counts, (1..=VOTERS as u32).collect::<Vec<_>>());
        let stored = store.candidate(candidate).await.unwrap().unwrap();
        assert_eq!(stored.number_of_votes as usize, VOTERS);
        assert_eq!(stored.voters.len(), VOTERS);
        assert_eq!(
            history.history(candidate).await.unwrap().counts(),
            (1..=VOTERS as u32).collect::<Vec<_>>()
        );
    }

    #[backend_test]
    async fn concurrent_same_voter_counted_once(store: Store, ledger: VoteLedger, history: HistoryLog) {
        let candidate = new_candidate(&store).await;

        let tasks = (0..8).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.cast(candidate, &voter("alice")).await })
        });
        for joined in join_all(tasks).await {
            assert_eq!(joined.unwrap().unwrap(), 1);
        }

        let stored = store.candidate(candidate).await.unwrap().unwrap();
        assert_eq!(stored.number_of_votes, 1);
        assert_eq!(history.history(candidate).await.unwrap().len(), 1);
    }

    #[backend_test]
    async fn candidates_independent(store: Store, ledger: VoteLedger) {
        let first = new_candidate(&store).await;
        let second = new_candidate(&store).await;

        // Hold the first candidate's transaction open.
        let txn = store.begin(first).await.unwrap().unwrap();
        assert_eq!(ledger.cast(second, &voter("alice")).await.unwrap(), 1);
        drop(txn);

        assert_eq!(ledger.cast(first, &voter("alice")).await.unwrap(), 1);
        let mut voted_for = store.voted_for(&voter("alice")).await.unwrap();
        voted_for.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(voted_for, expected);
    }

    #[backend_test]
    async fn alice_and_bob_scenario(store: Store, ledger: VoteLedger, history: HistoryLog) {
        let c = new_candidate(&store).await;

        assert_eq!(ledger.cast(c, &voter("alice")).await.unwrap(), 1);
        let entries = history.history(c).await.unwrap();
        assert_eq!(entries.counts(), vec![1]);
        let t1 = entries.iter().next().unwrap().timestamp;

        assert_eq!(ledger.cast(c, &voter("bob")).await.unwrap(), 2);
        let entries = history.history(c).await.unwrap();
        assert_eq!(entries.counts(), vec![1, 2]);
        assert_eq!(entries.iter().next().unwrap().timestamp, t1);

        assert_eq!(ledger.retract(c, &voter("alice")).await.unwrap(), 1);
        let entries = history.history(c).await.unwrap();
        assert_eq!(entries.counts(), vec![1, 2, 1]);

        assert_eq!(ledger.retract(c, &voter("alice")).await.unwrap(), 1);
        let unchanged = history.history(c).await.unwrap();
        assert_eq!(unchanged.len(), 3);

        let timestamps = unchanged.iter().map(|e| e.timestamp).collect::<Vec<_>>();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    /// A store whose transactions always fail to commit with a transient
    /// error, wrapping a working store.
    struct Conflicting(MemoryStore);

    struct ConflictingTxn(Box<dyn LedgerTxn>);

    #[rocket::async_trait]
    impl LedgerTxn for ConflictingTxn {
        async fn tally(&mut self) -> Result<Tally> {
            self.0.tally().await
        }
        async fn has_voter(&mut self, voter: &VoterId) -> Result<bool> {
            self.0.has_voter(voter).await
        }
        async fn add_voter(&mut self, voter: &VoterId) -> Result<Tally> {
            self.0.add_voter(voter).await
        }
        async fn remove_voter(&mut self, voter: &VoterId) -> Result<Tally> {
            self.0.remove_voter(voter).await
        }
        async fn latest_timestamp(&mut self) -> Result<Option<DateTime<Utc>>> {
            self.0.latest_timestamp().await
        }
        async fn insert_history(&mut self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
            self.0.insert_history(entry).await
        }
        async fn commit(self: Box<Self>) -> Result<()> {
            let mut txn = self;
            let tally = txn.0.tally().await?;
            Err(StorageError::Stale(tally.candidate_id).into())
        }
    }

    #[rocket::async_trait]
    impl LedgerStore for Conflicting {
        async fn begin(&self, candidate_id: Id) -> Result<Option<Box<dyn LedgerTxn>>> {
            Ok(self
                .0
                .begin(candidate_id)
                .await?
                .map(|txn| Box::new(ConflictingTxn(txn)) as Box<dyn LedgerTxn>))
        }
        async fn has_voted(&self, candidate_id: Id, voter: &VoterId) -> Result<Option<bool>> {
            self.0.has_voted(candidate_id, voter).await
        }
        async fn history(&self, candidate_id: Id) -> Result<Option<Vec<HistoryEntry>>> {
            self.0.history(candidate_id).await
        }
        async fn voted_for(&self, voter: &VoterId) -> Result<Vec<Id>> {
            self.0.voted_for(voter).await
        }
        async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
            self.0.insert_candidate(candidate).await
        }
        async fn candidate(&self, candidate_id: Id) -> Result<Option<Candidate>> {
            self.0.candidate(candidate_id).await
        }
        async fn candidates(&self, skip: u64, limit: u32) -> Result<(Vec<Candidate>, u64)> {
            self.0.candidates(skip, limit).await
        }
    }

    #[rocket::async_test]
    async fn persistent_conflict_surfaces_without_effect() {
        let store = Store::new(Conflicting(MemoryStore::new()));
        let ledger = VoteLedger::new(store.clone(), 3);
        let history = HistoryLog::new(store.clone());
        let candidate = new_candidate(&store).await;

        let result = ledger.cast(candidate, &voter("alice")).await;
        assert!(matches!(
            result,
            Err(Error::Storage(StorageError::Conflict { attempts: 3 }))
        ));

        let stored = store.candidate(candidate).await.unwrap().unwrap();
        assert_eq!(stored.number_of_votes, 0);
        assert!(stored.voters.is_empty());
        assert!(history.history(candidate).await.unwrap().is_empty());
    }

    /// A candidate as seen by one optimistic transaction.
    #[derive(Clone)]
    struct Versioned {
        candidate: Candidate,
        history: Vec<HistoryEntry>,
        version: u64,
    }

    type Records = Arc<Mutex<HashMap<Id, Versioned>>>;

    /// A store with snapshot isolation and no locking: each transaction
    /// works on a private copy of the candidate, and its commit fails with a
    /// transient error if another commit on that candidate landed since it
    /// began. Every step takes a little time so transactions overlap.
    #[derive(Default)]
    struct Optimistic {
        records: Records,
        conflicts: Arc<AtomicUsize>,
    }

    struct OptimisticTxn {
        records: Records,
        conflicts: Arc<AtomicUsize>,
        working: Versioned,
    }

    async fn step() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    impl OptimisticTxn {
        fn tally_now(&self) -> Tally {
            self.working.candidate.tally(self.working.candidate.id)
        }
    }

    #[rocket::async_trait]
    impl LedgerTxn for OptimisticTxn {
        async fn tally(&mut self) -> Result<Tally> {
            Ok(self.tally_now())
        }
        async fn has_voter(&mut self, voter: &VoterId) -> Result<bool> {
            step().await;
            Ok(self.working.candidate.voters.contains(voter))
        }
        async fn add_voter(&mut self, voter: &VoterId) -> Result<Tally> {
            step().await;
            let candidate = &mut self.working.candidate;
            candidate.voters.insert(voter.clone());
            candidate.number_of_votes += 1;
            candidate.revision += 1;
            Ok(self.tally_now())
        }
        async fn remove_voter(&mut self, voter: &VoterId) -> Result<Tally> {
            step().await;
            let candidate = &mut self.working.candidate;
            candidate.voters.remove(voter);
            candidate.number_of_votes -= 1;
            candidate.revision += 1;
            Ok(self.tally_now())
        }
        async fn latest_timestamp(&mut self) -> Result<Option<DateTime<Utc>>> {
            Ok(self.working.history.last().map(|entry| entry.timestamp))
        }
        async fn insert_history(&mut self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
            let entry = HistoryEntry::with_new_id(entry);
            self.working.history.push(entry.clone());
            Ok(entry)
        }
        async fn commit(self: Box<Self>) -> Result<()> {
            step().await;
            let OptimisticTxn {
                records,
                conflicts,
                mut working,
            } = *self;
            let id = working.candidate.id;
            let mut records = records.lock().unwrap();
            let current = records.get_mut(&id).unwrap();
            if current.version != working.version {
                conflicts.fetch_add(1, Ordering::Relaxed);
                return Err(StorageError::Stale(id).into());
            }
            working.version += 1;
            *current = working;
            Ok(())
        }
    }

    impl Optimistic {
        fn get(&self, candidate_id: Id) -> Option<Versioned> {
            self.records.lock().unwrap().get(&candidate_id).cloned()
        }
    }

    #[rocket::async_trait]
    impl LedgerStore for Optimistic {
        async fn begin(&self, candidate_id: Id) -> Result<Option<Box<dyn LedgerTxn>>> {
            step().await;
            Ok(self.get(candidate_id).map(|working| {
                Box::new(OptimisticTxn {
                    records: self.records.clone(),
                    conflicts: self.conflicts.clone(),
                    working,
                }) as Box<dyn LedgerTxn>
            }))
        }
        async fn has_voted(&self, candidate_id: Id, voter: &VoterId) -> Result<Option<bool>> {
            Ok(self
                .get(candidate_id)
                .map(|record| record.candidate.voters.contains(voter)))
        }
        async fn history(&self, candidate_id: Id) -> Result<Option<Vec<HistoryEntry>>> {
            Ok(self.get(candidate_id).map(|record| record.history))
        }
        async fn voted_for(&self, voter: &VoterId) -> Result<Vec<Id>> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|(_, record)| record.candidate.voters.contains(voter))
                .map(|(id, _)| *id)
                .collect())
        }
        async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
            let candidate = Candidate::with_new_id(candidate);
            let record = Versioned {
                candidate: candidate.clone(),
                history: Vec::new(),
                version: 0,
            };
            self.records.lock().unwrap().insert(candidate.id, record);
            Ok(candidate)
        }
        async fn candidate(&self, candidate_id: Id) -> Result<Option<Candidate>> {
            Ok(self.get(candidate_id).map(|record| record.candidate))
        }
        async fn candidates(&self, skip: u64, limit: u32) -> Result<(Vec<Candidate>, u64)> {
            let records = self.records.lock().unwrap();
            let page = records
                .values()
                .skip(skip as usize)
                .take(limit as usize)
                .map(|record| record.candidate.clone())
                .collect();
            Ok((page, records.len() as u64))
        }
    }

    #[rocket::async_test]
    async fn concurrent_casts_outlast_transient_conflicts() {
        const VOTERS: usize = 16;
        let optimistic = Optimistic::default();
        let conflicts = optimistic.conflicts.clone();
        let store = Store::new(optimistic);
        let ledger = VoteLedger::with_retry_policy(store.clone(), RetryPolicy::default());
        let history = HistoryLog::new(store.clone());
        let candidate = new_candidate(&store).await;

        let tasks = (0..VOTERS).map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.cast(candidate, &voter(&format!("voter{i}"))).await })
        });
        let results = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect::<Vec<_>>();

        // Commits did collide, and every cast still went through.
        assert!(conflicts.load(Ordering::Relaxed) > 0);
        let failed = results.iter().filter(|result| result.is_err()).count();
        assert_eq!(failed, 0, "{results:?}");

        let mut counts = results.into_iter().map(|result| result.unwrap()).collect::<Vec<_>>();
        counts.sort_unstable();
        let expected = (1..=VOTERS as u32).collect::<Vec<_>>();
        assert_eq!(counts, expected);

        let stored = store.candidate(candidate).await.unwrap().unwrap();
        assert_eq!(stored.number_of_votes as usize, VOTERS);
        assert_eq!(stored.voters.len(), VOTERS);
        assert_eq!(history.history(candidate).await.unwrap().counts(), expected);
    }

    #[backend_test(mongodb)]
    async fn mongodb_concurrent_votes(store: Store, ledger: VoteLedger, history: HistoryLog) {
        const VOTERS: usize = 16;
        let candidate = new_candidate(&store).await;

        let tasks = (0..VOTERS)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.cast(candidate, &voter(&format!("voter{i}"))).await })
            })
            .chain((0..4).map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.cast(candidate, &voter("voter0")).await })
            }));
        for joined in join_all(tasks).await {
            joined.unwrap().unwrap();
        }

        let stored = store.candidate(candidate).await.unwrap().unwrap();
        assert_eq!(stored.number_of_votes as usize, VOTERS);
        assert_eq!(
            history.history(candidate).await.unwrap().counts(),
            (1..=VOTERS as u32).collect::<Vec<_>>()
        );
        assert_eq!(voters_of(&store, candidate).await.len(), VOTERS);
    }
}
