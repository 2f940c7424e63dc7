use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::{mongodb::Id, voter::VoterId};

/// External links describing a candidate or party. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub official_site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wikipedia_article: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wikipedia_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_parliament_url: Option<String>,
    /// Portrait for candidates, logo for parties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// The party a candidate belongs to. Purely descriptive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    #[serde(default)]
    pub links: Links,
}

/// Core candidate data, as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCandidate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<Party>,
    #[serde(default)]
    pub is_incumbent: bool,
    #[serde(default)]
    pub links: Links,
    /// Cached size of `voters`.
    pub number_of_votes: u32,
    /// Everyone currently voting for this candidate. Listing queries
    /// project this away, hence the default.
    #[serde(default)]
    pub voters: HashSet<VoterId>,
    /// Number of successful ledger mutations so far.
    pub revision: u64,
}

impl NewCandidate {
    /// A candidate with no votes.
    pub fn new(name: String, party: Option<Party>, is_incumbent: bool, links: Links) -> Self {
        Self {
            name,
            party,
            is_incumbent,
            links,
            number_of_votes: 0,
            voters: HashSet::new(),
            revision: 0,
        }
    }

    /// The ledger view of this candidate.
    pub fn tally(&self, candidate_id: Id) -> Tally {
        Tally {
            candidate_id,
            number_of_votes: self.number_of_votes,
            revision: self.revision,
        }
    }
}

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: NewCandidate,
}

impl Candidate {
    /// Assign an ID to a new candidate.
    pub fn with_new_id(candidate: NewCandidate) -> Self {
        Self {
            id: Id::new(),
            candidate,
        }
    }
}

impl Deref for Candidate {
    type Target = NewCandidate;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}

/// The counter half of a candidate's ledger, without the voter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    #[serde(rename = "_id")]
    pub candidate_id: Id,
    pub number_of_votes: u32,
    pub revision: u64,
}

/// Just the ID of a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CandidateRef {
    #[serde(rename = "_id")]
    pub id: Id,
}
