use std::fmt::{Display, Formatter};

use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use serde::{Deserialize, Serialize};

/// Header carrying the voter identity, set by the authentication layer in
/// front of this service.
pub const VOTER_HEADER: &str = "X-Voter-Id";

/// Opaque identity of an authenticated user. Trusted as already verified.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(String);

impl VoterId {
    /// Returns `None` for an empty or all-whitespace identity.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VoterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for VoterId {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.headers().get_one(VOTER_HEADER).and_then(VoterId::new) {
            Some(voter) => Outcome::Success(voter),
            None => Outcome::Failure((Status::Unauthorized, ())),
        }
    }
}
