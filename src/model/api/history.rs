use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::history::HistoryEntry;

/// API-friendly history entry: a counter value and when it was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntryDesc {
    pub number_of_votes: u32,
    pub timestamp: DateTime<Utc>,
}

impl From<&HistoryEntry> for HistoryEntryDesc {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            number_of_votes: entry.number_of_votes,
            timestamp: entry.timestamp,
        }
    }
}
