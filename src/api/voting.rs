use std::collections::BTreeSet;

use rocket::{serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::ledger::{Store, VoteLedger};
use crate::logging::RequestId;
use crate::model::{
    api::{
        id::ApiId,
        vote::{VoteRequest, VoteResponse, VotedResponse},
    },
    mongodb::Id,
    voter::VoterId,
};

pub fn routes() -> Vec<Route> {
    routes![vote, batch_vote, has_voted]
}

/// Vote for a candidate, or withdraw a vote.
#[post("/vote", data = "<vote>", format = "json")]
async fn vote(
    request_id: &RequestId,
    voter: VoterId,
    vote: Json<VoteRequest>,
    ledger: &State<VoteLedger>,
) -> Result<Json<VoteResponse>> {
    let candidate_id = *vote.candidate;
    let number_of_votes = if vote.upvote {
        ledger.cast(candidate_id, &voter).await?
    } else {
        ledger.retract(candidate_id, &voter).await?
    };
    debug!("req{request_id}: candidate {candidate_id} has {number_of_votes} votes");
    Ok(Json(VoteResponse { number_of_votes }))
}

/// Replace the voter's whole ballot: vote for exactly the listed candidates,
/// withdrawing every other vote. Returns the candidates now voted for.
#[post("/votes", data = "<ballot>", format = "json")]
async fn batch_vote(
    voter: VoterId,
    ballot: Json<Vec<ApiId>>,
    store: &State<Store>,
    ledger: &State<VoteLedger>,
) -> Result<Json<Vec<ApiId>>> {
    let wanted = ballot.0.into_iter().map(Id::from).collect::<BTreeSet<_>>();

    // Check every candidate before changing anything.
    for candidate_id in &wanted {
        if store.candidate(*candidate_id).await?.is_none() {
            return Err(Error::not_found(format!(
                "Candidate with ID '{}'",
                candidate_id
            )));
        }
    }

    let current = store.voted_for(&voter).await?.into_iter().collect::<BTreeSet<_>>();
    for candidate_id in wanted.difference(&current) {
        ledger.cast(*candidate_id, &voter).await?;
    }
    for candidate_id in current.difference(&wanted) {
        ledger.retract(*candidate_id, &voter).await?;
    }

    Ok(Json(wanted.into_iter().map(ApiId::from).collect()))
}

#[get("/candidates/<candidate_id>/voted")]
async fn has_voted(
    voter: VoterId,
    candidate_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Json<VotedResponse>> {
    let voted = ledger.has_voted(candidate_id, &voter).await?;
    Ok(Json(VotedResponse { voted }))
}
