use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

use crate::model::mongodb::{is_transient_transaction_error, Id};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether retrying the whole ledger mutation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_transient())
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        Self::Storage(StorageError::Db(err))
    }
}

/// Failures of the underlying persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Ledger mutation still conflicting after {attempts} attempts")]
    Conflict { attempts: u32 },
    #[error("Candidate {0} changed during an open ledger transaction")]
    Stale(Id),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Db(err) => is_transient_transaction_error(err),
            Self::Stale(_) => true,
            Self::Conflict { .. } => false,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        Err(match self {
            Self::BadRequest(msg) => {
                debug!("{} {}: {msg}", req.method(), req.uri());
                Status::BadRequest
            }
            Self::NotFound(msg) => {
                debug!("{} {}: {msg}", req.method(), req.uri());
                Status::NotFound
            }
            Self::Storage(err) => {
                error!("{} {}: {err}", req.method(), req.uri());
                Status::InternalServerError
            }
        })
    }
}
