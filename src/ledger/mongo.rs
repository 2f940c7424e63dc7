use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, Document},
    options::{
        Acknowledgment, FindOneAndUpdateOptions, FindOneOptions, FindOptions, ReadConcern,
        ReturnDocument, SessionOptions, TransactionOptions, WriteConcern,
    },
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

use crate::error::{Result, StorageError};
use crate::ledger::store::{LedgerStore, LedgerTxn};
use crate::model::{
    candidate::{Candidate, CandidateRef, NewCandidate, Tally},
    history::{HistoryEntry, NewHistoryEntry},
    mongodb::{Coll, Id},
    voter::VoterId,
};

/// Ledger store backed by MongoDB.
///
/// Every ledger transaction is a multi-document transaction, so the
/// database must be a replica set. Concurrent transactions on the same
/// candidate document abort with a transient write conflict, which the vote
/// ledger retries.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    candidates: Coll<Candidate>,
    tallies: Coll<Tally>,
    refs: Coll<CandidateRef>,
    history: Coll<HistoryEntry>,
}

impl MongoStore {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            candidates: Coll::from_db(db),
            tallies: Coll::from_db(db),
            refs: Coll::from_db(db),
            history: Coll::from_db(db),
        }
    }
}

/// Read only the counter fields of a candidate document.
fn tally_projection() -> Document {
    doc! { "number_of_votes": 1, "revision": 1 }
}

fn history_order() -> Document {
    doc! { "timestamp": 1, "revision": 1 }
}

#[rocket::async_trait]
impl LedgerStore for MongoStore {
    async fn begin(&self, candidate_id: Id) -> Result<Option<Box<dyn LedgerTxn>>> {
        let mut session = self.client.start_session(None).await?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        session.start_transaction(options).await?;

        let projection = FindOneOptions::builder().projection(tally_projection()).build();
        let tally = self
            .tallies
            .find_one_with_session(candidate_id.as_doc(), projection, &mut session)
            .await?;
        // An unknown candidate drops the session, aborting the transaction.
        Ok(tally.map(|tally| {
            Box::new(MongoTxn {
                session,
                tally,
                tallies: self.tallies.clone(),
                history: self.history.clone(),
            }) as Box<dyn LedgerTxn>
        }))
    }

    async fn has_voted(&self, candidate_id: Id, voter: &VoterId) -> Result<Option<bool>> {
        let filter = doc! { "_id": candidate_id, "voters": voter.as_str() };
        if self.refs.count_documents(filter, None).await? > 0 {
            return Ok(Some(true));
        }
        let exists = self.refs.count_documents(candidate_id.as_doc(), None).await? > 0;
        Ok(exists.then_some(false))
    }

    async fn history(&self, candidate_id: Id) -> Result<Option<Vec<HistoryEntry>>> {
        // Read the candidate and its entries from one consistent snapshot.
        let session_options = SessionOptions::builder().snapshot(true).build();
        let mut session = self.client.start_session(Some(session_options)).await?;

        let exists = self
            .refs
            .find_one_with_session(candidate_id.as_doc(), None, &mut session)
            .await?
            .is_some();
        if !exists {
            return Ok(None);
        }

        let options = FindOptions::builder().sort(history_order()).build();
        let mut cursor = self
            .history
            .find_with_session(doc! { "candidate_id": candidate_id }, options, &mut session)
            .await?;
        let mut entries = Vec::new();
        while let Some(entry) = cursor.next(&mut session).await {
            entries.push(entry?);
        }
        Ok(Some(entries))
    }

    async fn voted_for(&self, voter: &VoterId) -> Result<Vec<Id>> {
        let options = FindOptions::builder().projection(doc! { "_id": 1 }).build();
        let ids = self
            .refs
            .find(doc! { "voters": voter.as_str() }, options)
            .await?
            .map_ok(|candidate| candidate.id)
            .try_collect()
            .await?;
        Ok(ids)
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let candidate = Candidate::with_new_id(candidate);
        self.candidates.insert_one(&candidate, None).await?;
        Ok(candidate)
    }

    async fn candidate(&self, candidate_id: Id) -> Result<Option<Candidate>> {
        Ok(self.candidates.find_one(candidate_id.as_doc(), None).await?)
    }

    async fn candidates(&self, skip: u64, limit: u32) -> Result<(Vec<Candidate>, u64)> {
        let options = FindOptions::builder()
            .sort(doc! { "number_of_votes": -1, "name": 1, "_id": 1 })
            .projection(doc! { "voters": 0 })
            .skip(skip)
            .limit(i64::from(limit))
            .build();
        let page = self
            .candidates
            .find(None, options)
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        let total = self.candidates.count_documents(None, None).await?;
        Ok((page, total))
    }
}

/// An open MongoDB transaction on one candidate.
struct MongoTxn {
    session: ClientSession,
    tally: Tally,
    tallies: Coll<Tally>,
    history: Coll<HistoryEntry>,
}

impl MongoTxn {
    /// Apply `update` to the candidate if it matches `membership`, and keep
    /// the resulting tally.
    async fn update(&mut self, membership: Document, update: Document) -> Result<Tally> {
        let candidate_id = self.tally.candidate_id;
        let mut filter = candidate_id.as_doc();
        filter.extend(membership);
        let options = FindOneAndUpdateOptions::builder()
            .projection(tally_projection())
            .return_document(ReturnDocument::After)
            .build();
        self.tally = self
            .tallies
            .find_one_and_update_with_session(filter, update, options, &mut self.session)
            .await?
            .ok_or(StorageError::Stale(candidate_id))?;
        Ok(self.tally)
    }
}

#[rocket::async_trait]
impl LedgerTxn for MongoTxn {
    async fn tally(&mut self) -> Result<Tally> {
        Ok(self.tally)
    }

    async fn has_voter(&mut self, voter: &VoterId) -> Result<bool> {
        let filter = doc! { "_id": self.tally.candidate_id, "voters": voter.as_str() };
        let count = self
            .tallies
            .count_documents_with_session(filter, None, &mut self.session)
            .await?;
        Ok(count > 0)
    }

    async fn add_voter(&mut self, voter: &VoterId) -> Result<Tally> {
        let membership = doc! { "voters": { "$ne": voter.as_str() } };
        let update = doc! {
            "$addToSet": { "voters": voter.as_str() },
            "$inc": { "number_of_votes": 1, "revision": 1 },
        };
        self.update(membership, update).await
    }

    async fn remove_voter(&mut self, voter: &VoterId) -> Result<Tally> {
        let membership = doc! { "voters": voter.as_str() };
        let update = doc! {
            "$pull": { "voters": voter.as_str() },
            "$inc": { "number_of_votes": -1, "revision": 1 },
        };
        self.update(membership, update).await
    }

    async fn latest_timestamp(&mut self) -> Result<Option<DateTime<Utc>>> {
        let options = FindOneOptions::builder()
            .sort(doc! { "revision": -1 })
            .build();
        let latest = self
            .history
            .find_one_with_session(
                doc! { "candidate_id": self.tally.candidate_id },
                options,
                &mut self.session,
            )
            .await?;
        Ok(latest.map(|entry| entry.timestamp))
    }

    async fn insert_history(&mut self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
        let entry = HistoryEntry::with_new_id(entry);
        self.history
            .insert_one_with_session(&entry, None, &mut self.session)
            .await?;
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut txn = self;
        txn.session.commit_transaction().await?;
        Ok(())
    }
}
