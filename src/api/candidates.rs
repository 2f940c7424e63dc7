use rocket::{serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::ledger::{HistoryLog, Store};
use crate::model::{
    admin::AdminKey,
    api::{
        candidate::{CandidateDescription, CandidateSpec},
        history::HistoryEntryDesc,
        pagination::{Paginated, Pagination},
    },
    candidate::NewCandidate,
    mongodb::Id,
};

pub fn routes() -> Vec<Route> {
    routes![
        list_candidates,
        get_candidate,
        create_candidate,
        candidate_history,
    ]
}

/// Candidates with the most votes first.
#[get("/candidates")]
async fn list_candidates(
    pagination: Pagination,
    store: &State<Store>,
) -> Result<Json<Paginated<CandidateDescription>>> {
    let (candidates, total) = store
        .candidates(pagination.skip(), pagination.page_size())
        .await?;
    let items = candidates.into_iter().map(Into::into).collect();
    Ok(Json(pagination.to_paginated(total, items)))
}

#[get("/candidates/<candidate_id>")]
async fn get_candidate(
    candidate_id: Id,
    store: &State<Store>,
) -> Result<Json<CandidateDescription>> {
    let candidate = store
        .candidate(candidate_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Candidate with ID '{}'", candidate_id)))?;
    Ok(Json(candidate.into()))
}

#[post("/candidates", data = "<spec>", format = "json")]
async fn create_candidate(
    _admin: AdminKey,
    spec: Json<CandidateSpec>,
    store: &State<Store>,
) -> Result<Json<CandidateDescription>> {
    let candidate = NewCandidate::try_from(spec.0)?;
    let candidate = store.insert_candidate(candidate).await?;
    info!("Created candidate {} ({})", candidate.id, candidate.name);
    Ok(Json(candidate.into()))
}

#[get("/candidates/<candidate_id>/history")]
async fn candidate_history(
    candidate_id: Id,
    history: &State<HistoryLog>,
) -> Result<Json<Vec<HistoryEntryDesc>>> {
    let entries = history.history(candidate_id).await?;
    Ok(Json(entries.iter().map(Into::into).collect()))
}
