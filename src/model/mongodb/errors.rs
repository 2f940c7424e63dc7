//! Helpers for classifying MongoDB errors that the driver only exposes
//! through error labels.

use mongodb::error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};

/// Return true if the whole transaction that produced this error may be
/// safely re-run, e.g. after a write conflict with a concurrent transaction.
///
/// An unknown commit result is included: every ledger mutation re-checks
/// voter membership before writing, so a re-run after a commit that did
/// land is a no-op.
pub fn is_transient_transaction_error(err: &DbError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
        || err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
}
