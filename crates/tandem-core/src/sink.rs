//! Downstream sinks driven by the [`Processor`](crate::processor::Processor).
//!
//! Sinks receive copies of records and submissions; they never write back
//! into the store. Every sink must tolerate being called more than once for
//! the same submission, keyed on its
//! [`ExternalReference`](crate::submission::ExternalReference).

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
  actor::Actor,
  record::{Part, Record},
  submission::{ExternalReference, Submission},
};

// ─── Failures ────────────────────────────────────────────────────────────────

/// How a sink failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
  /// The sink could not be reached or timed out; try again later.
  Transport,
  /// The sink rejected the input; retrying will not help.
  Permanent,
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Transport => "transport",
      Self::Permanent => "permanent",
    })
  }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} failure: {message}")]
pub struct SinkError {
  pub kind:    FailureKind,
  pub message: String,
}

impl SinkError {
  pub fn transport(message: impl Into<String>) -> Self {
    Self { kind: FailureKind::Transport, message: message.into() }
  }

  pub fn permanent(message: impl Into<String>) -> Self {
    Self { kind: FailureKind::Permanent, message: message.into() }
  }
}

// ─── Payloads ────────────────────────────────────────────────────────────────

/// Identifier returned by the archive for a stored copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveReference(pub String);

impl fmt::Display for ArchiveReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Event emitted once a record has been archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEvent {
  pub record_id:            Uuid,
  pub external_reference:   ExternalReference,
  pub subject_id:           String,
  pub legal_entity_id:      String,
  pub part:                 Part,
  pub linked_record_id:     Option<Uuid>,
  pub supersedes_record_id: Option<Uuid>,
  pub archive_reference:    ArchiveReference,
}

impl RecordEvent {
  pub fn new(record: &Record, submission: &Submission, archive_reference: ArchiveReference) -> Self {
    Self {
      record_id: record.record_id,
      external_reference: submission.external_reference.clone(),
      subject_id: record.subject_id.clone(),
      legal_entity_id: record.legal_entity_id.clone(),
      part: record.part,
      linked_record_id: record.linked_record_id,
      supersedes_record_id: record.supersedes_record_id,
      archive_reference,
    }
  }
}

/// A receipt message for whoever filed the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
  pub recipient:          Option<Actor>,
  pub external_reference: ExternalReference,
  pub message:            String,
}

impl Notification {
  pub fn receipt(record: &Record, submission: &Submission) -> Self {
    let filed_by = record
      .submitted_by
      .as_ref()
      .map(|a| a.representation.describe())
      .unwrap_or_else(|| "an unknown party".to_owned());
    let half = match record.part {
      Part::EmployerPart => "employer",
      Part::EmployeePart => "employee",
    };
    let status = if record.linked_record_id.is_some() {
      "matched with the other half"
    } else {
      "awaiting the other half"
    };
    Self {
      recipient:          record.submitted_by.clone(),
      external_reference: submission.external_reference.clone(),
      message:            format!(
        "The {half} part filed by {filed_by} was received as {} and is {status}.",
        submission.external_reference
      ),
    }
  }
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Long-term storage of filed records.
pub trait Archive: Send + Sync {
  fn archive<'a>(
    &'a self,
    record: &'a Record,
    submission: &'a Submission,
  ) -> impl Future<Output = Result<ArchiveReference, SinkError>> + Send + 'a;
}

/// The event bus. Publishing the same record twice must be harmless.
pub trait EventPublisher: Send + Sync {
  fn publish<'a>(
    &'a self,
    event: &'a RecordEvent,
  ) -> impl Future<Output = Result<(), SinkError>> + Send + 'a;
}

/// Best-effort notifications. Failures never affect the submission.
pub trait Notifier: Send + Sync {
  fn notify<'a>(
    &'a self,
    notification: &'a Notification,
  ) -> impl Future<Output = Result<(), SinkError>> + Send + 'a;
}
