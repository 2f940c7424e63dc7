use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::id::ApiId,
    candidate::{Candidate, Links, NewCandidate, Party},
};

/// A new candidate as submitted by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    #[serde(default)]
    pub party: Option<Party>,
    #[serde(default)]
    pub is_incumbent: bool,
    #[serde(default)]
    pub links: Links,
}

impl TryFrom<CandidateSpec> for NewCandidate {
    type Error = Error;

    fn try_from(spec: CandidateSpec) -> Result<Self> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(Error::BadRequest("Candidate name must not be empty".to_string()));
        }
        if matches!(&spec.party, Some(party) if party.name.trim().is_empty()) {
            return Err(Error::BadRequest("Party name must not be empty".to_string()));
        }
        Ok(NewCandidate::new(
            name.to_string(),
            spec.party,
            spec.is_incumbent,
            spec.links,
        ))
    }
}

/// An API-friendly candidate description. The voter set is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: ApiId,
    pub name: String,
    pub party: Option<Party>,
    pub is_incumbent: bool,
    pub links: Links,
    pub number_of_votes: u32,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            name: candidate.candidate.name,
            party: candidate.candidate.party,
            is_incumbent: candidate.candidate.is_incumbent,
            links: candidate.candidate.links,
            number_of_votes: candidate.candidate.number_of_votes,
        }
    }
}

#[cfg(test)]
impl CandidateSpec {
    pub fn example() -> Self {
        Self {
            name: "Alice Example".to_string(),
            party: Some(Party {
                name: "Example Party".to_string(),
                links: Links::default(),
            }),
            is_incumbent: true,
            links: Links {
                official_site: Some("https://alice.example.org".to_string()),
                ..Links::default()
            },
        }
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            party: None,
            is_incumbent: false,
            links: Links::default(),
        }
    }
}
