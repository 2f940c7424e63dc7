use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core history entry data: one snapshot of a candidate's vote counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    /// Foreign Key candidate ID.
    pub candidate_id: Id,
    /// The counter value after the mutation that produced this entry.
    pub number_of_votes: u32,
    /// The candidate revision produced by that mutation.
    pub revision: u64,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

/// A history entry from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub entry: NewHistoryEntry,
}

impl HistoryEntry {
    pub fn with_new_id(entry: NewHistoryEntry) -> Self {
        Self {
            id: Id::new(),
            entry,
        }
    }
}

impl Deref for HistoryEntry {
    type Target = NewHistoryEntry;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

/// A candidate's history as of the moment it was read, oldest first.
///
/// Later appends are never visible through an existing `History`; read it
/// again to see them. Iterating does not consume it.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Arc<[HistoryEntry]>,
}

impl History {
    pub fn iter(&self) -> std::slice::Iter<'_, HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The counter values, in order.
    pub fn counts(&self) -> Vec<u32> {
        self.iter().map(|entry| entry.number_of_votes).collect()
    }
}

impl From<Vec<HistoryEntry>> for History {
    fn from(entries: Vec<HistoryEntry>) -> Self {
        Self {
            entries: entries.into(),
        }
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a HistoryEntry;
    type IntoIter = std::slice::Iter<'a, HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
