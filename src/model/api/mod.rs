//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Voter sets are never exposed, only their size.

pub mod candidate;
pub mod history;
pub mod id;
pub mod pagination;
pub mod vote;
