use serde::{Deserialize, Serialize};

use crate::model::api::id::ApiId;

/// A single vote or unvote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate: ApiId,
    /// `true` to vote for the candidate, `false` to withdraw the vote.
    pub upvote: bool,
}

/// The candidate's counter after a vote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub number_of_votes: u32,
}

/// Whether the requesting voter currently votes for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotedResponse {
    pub voted: bool,
}
