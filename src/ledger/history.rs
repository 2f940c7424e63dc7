use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::error::{Error, Result};
use crate::ledger::store::{LedgerTxn, Store};
use crate::model::{
    candidate::Tally,
    history::{History, HistoryEntry, NewHistoryEntry},
    mongodb::Id,
};

/// Append-only record of every counter value each candidate has had.
///
/// Entries are only ever written by the vote ledger, inside the same
/// transaction as the mutation they record.
#[derive(Clone)]
pub struct HistoryLog {
    store: Store,
}

impl HistoryLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// A snapshot of the candidate's history, oldest entry first.
    pub async fn history(&self, candidate_id: Id) -> Result<History> {
        self.store
            .history(candidate_id)
            .await?
            .map(History::from)
            .ok_or_else(|| Error::not_found(format!("Candidate with ID '{}'", candidate_id)))
    }

    /// Record `tally` as the candidate's newest counter value.
    ///
    /// Timestamps never go backwards within a candidate's history: if the
    /// clock reads earlier than the newest entry, that entry's timestamp is
    /// reused.
    pub(crate) async fn append(txn: &mut dyn LedgerTxn, tally: &Tally) -> Result<HistoryEntry> {
        let now = now_millis();
        let timestamp = match txn.latest_timestamp().await? {
            Some(latest) if latest > now => latest,
            _ => now,
        };
        txn.insert_history(NewHistoryEntry {
            candidate_id: tally.candidate_id,
            number_of_votes: tally.number_of_votes,
            revision: tally.revision,
            timestamp,
        })
        .await
    }
}

/// The current time at the precision the database stores.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(Duration::milliseconds(1)).unwrap_or(now)
}
