use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::{
    candidate::{Candidate, CandidateRef, Tally},
    history::HistoryEntry,
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Candidate collections
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for Tally {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for CandidateRef {
    const NAME: &'static str = CANDIDATES;
}

// History collection
const HISTORY: &str = "history";
impl MongoCollection for HistoryEntry {
    const NAME: &'static str = HISTORY;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Candidate collection: listing order and voter lookups.
    let ranking_index = IndexModel::builder()
        .keys(doc! {"number_of_votes": -1, "name": 1})
        .build();
    let voters_index = IndexModel::builder().keys(doc! {"voters": 1}).build();
    Coll::<Candidate>::from_db(db)
        .create_indexes([ranking_index, voters_index], None)
        .await?;

    // History collection: ordered retrieval per candidate, and at most one
    // entry per ledger revision.
    let ordered_index = IndexModel::builder()
        .keys(doc! {"candidate_id": 1, "timestamp": 1, "revision": 1})
        .build();
    let revision_index = IndexModel::builder()
        .keys(doc! {"candidate_id": 1, "revision": 1})
        .options(unique)
        .build();
    Coll::<HistoryEntry>::from_db(db)
        .create_indexes([ordered_index, revision_index], None)
        .await?;

    Ok(())
}
