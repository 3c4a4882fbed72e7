//! Error types for `tandem-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::submission::SubmissionStatus;

#[derive(Debug, Error)]
pub enum Error {
  #[error("record not found: {0}")]
  RecordNotFound(Uuid),

  #[error("submission not found: {0}")]
  SubmissionNotFound(Uuid),

  #[error("record {0} is already submitted")]
  AlreadySubmitted(Uuid),

  #[error("invalid period: {from} is after {to}")]
  InvalidPeriod {
    from: chrono::NaiveDate,
    to:   chrono::NaiveDate,
  },

  #[error("submission {id} cannot move from {from} to {to}")]
  InvalidTransition {
    id:   Uuid,
    from: SubmissionStatus,
    to:   SubmissionStatus,
  },

  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
