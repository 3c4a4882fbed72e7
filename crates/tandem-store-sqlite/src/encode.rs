//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision, `Z` suffix) so that string comparison in SQL matches
//! chronological order. Dates are ISO 8601. The submitting actor is compact
//! JSON. UUIDs are hyphenated lowercase strings.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use tandem_core::{
  actor::Actor,
  record::{Part, Period, Record, RecordStatus},
  submission::{ExternalReference, Submission, SubmissionStatus},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("bad timestamp {s:?}: {e}")))
}

// ─── NaiveDate ────────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::Decode(format!("bad date {s:?}: {e}")))
}

// ─── Part ─────────────────────────────────────────────────────────────────────

pub fn encode_part(p: Part) -> &'static str {
  match p {
    Part::EmployerPart => "employer_part",
    Part::EmployeePart => "employee_part",
  }
}

pub fn decode_part(s: &str) -> Result<Part> {
  match s {
    "employer_part" => Ok(Part::EmployerPart),
    "employee_part" => Ok(Part::EmployeePart),
    other => Err(Error::Decode(format!("unknown part: {other:?}"))),
  }
}

// ─── RecordStatus ─────────────────────────────────────────────────────────────

pub fn encode_record_status(s: RecordStatus) -> &'static str {
  match s {
    RecordStatus::Draft => "draft",
    RecordStatus::Submitted => "submitted",
  }
}

pub fn decode_record_status(s: &str) -> Result<RecordStatus> {
  match s {
    "draft" => Ok(RecordStatus::Draft),
    "submitted" => Ok(RecordStatus::Submitted),
    other => Err(Error::Decode(format!("unknown record status: {other:?}"))),
  }
}

// ─── SubmissionStatus ─────────────────────────────────────────────────────────

pub fn encode_submission_status(s: SubmissionStatus) -> &'static str { s.as_str() }

pub fn decode_submission_status(s: &str) -> Result<SubmissionStatus> {
  match s {
    "received" => Ok(SubmissionStatus::Received),
    "processing" => Ok(SubmissionStatus::Processing),
    "done" => Ok(SubmissionStatus::Done),
    "sink_failed" => Ok(SubmissionStatus::SinkFailed),
    "permanently_failed" => Ok(SubmissionStatus::PermanentlyFailed),
    other => Err(Error::Decode(format!("unknown submission status: {other:?}"))),
  }
}

// ─── Actor ────────────────────────────────────────────────────────────────────

pub fn encode_actor(a: &Actor) -> Result<String> { Ok(serde_json::to_string(a)?) }

pub fn decode_actor(s: &str) -> Result<Actor> { Ok(serde_json::from_str(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawRecord::from_row`].
pub const RECORD_COLUMNS: &str = "record_id, subject_id, counterparty_id, part, legal_entity_id,
  period_from, period_to, payload, status, linked_record_id, supersedes_record_id,
  created_at, updated_at, submitted_at, submitted_by";

/// Raw strings read directly from a `records` row.
pub struct RawRecord {
  pub record_id:            String,
  pub subject_id:           String,
  pub counterparty_id:      Option<String>,
  pub part:                 String,
  pub legal_entity_id:      String,
  pub period_from:          Option<String>,
  pub period_to:            Option<String>,
  pub payload:              String,
  pub status:               String,
  pub linked_record_id:     Option<String>,
  pub supersedes_record_id: Option<String>,
  pub created_at:           String,
  pub updated_at:           String,
  pub submitted_at:         Option<String>,
  pub submitted_by:         Option<String>,
}

impl RawRecord {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:            row.get(0)?,
      subject_id:           row.get(1)?,
      counterparty_id:      row.get(2)?,
      part:                 row.get(3)?,
      legal_entity_id:      row.get(4)?,
      period_from:          row.get(5)?,
      period_to:            row.get(6)?,
      payload:              row.get(7)?,
      status:               row.get(8)?,
      linked_record_id:     row.get(9)?,
      supersedes_record_id: row.get(10)?,
      created_at:           row.get(11)?,
      updated_at:           row.get(12)?,
      submitted_at:         row.get(13)?,
      submitted_by:         row.get(14)?,
    })
  }

  pub fn into_record(self) -> Result<Record> {
    let period = match (self.period_from, self.period_to) {
      (Some(from), Some(to)) => Some(Period::new(decode_date(&from)?, decode_date(&to)?)?),
      (None, None) => None,
      _ => return Err(Error::Decode("half-open period".to_owned())),
    };

    Ok(Record {
      record_id: decode_uuid(&self.record_id)?,
      subject_id: self.subject_id,
      counterparty_id: self.counterparty_id,
      part: decode_part(&self.part)?,
      legal_entity_id: self.legal_entity_id,
      period,
      payload: serde_json::from_str(&self.payload)?,
      status: decode_record_status(&self.status)?,
      linked_record_id: self.linked_record_id.as_deref().map(decode_uuid).transpose()?,
      supersedes_record_id: self
        .supersedes_record_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
      submitted_at: self.submitted_at.as_deref().map(decode_dt).transpose()?,
      submitted_by: self.submitted_by.as_deref().map(decode_actor).transpose()?,
    })
  }
}

/// Column list matching [`RawSubmission::from_row`].
pub const SUBMISSION_COLUMNS: &str = "submission_id, record_id, status, attempt_count,
  last_attempt_at, last_error, external_reference, created_at";

/// Raw strings read directly from a `submissions` row.
pub struct RawSubmission {
  pub submission_id:      String,
  pub record_id:          String,
  pub status:             String,
  pub attempt_count:      i64,
  pub last_attempt_at:    Option<String>,
  pub last_error:         Option<String>,
  pub external_reference: String,
  pub created_at:         String,
}

impl RawSubmission {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      submission_id:      row.get(0)?,
      record_id:          row.get(1)?,
      status:             row.get(2)?,
      attempt_count:      row.get(3)?,
      last_attempt_at:    row.get(4)?,
      last_error:         row.get(5)?,
      external_reference: row.get(6)?,
      created_at:         row.get(7)?,
    })
  }

  pub fn into_submission(self) -> Result<Submission> {
    let attempt_count = u32::try_from(self.attempt_count)
      .map_err(|_| Error::Decode(format!("attempt count out of range: {}", self.attempt_count)))?;

    Ok(Submission {
      submission_id: decode_uuid(&self.submission_id)?,
      record_id: decode_uuid(&self.record_id)?,
      status: decode_submission_status(&self.status)?,
      attempt_count,
      last_attempt_at: self.last_attempt_at.as_deref().map(decode_dt).transpose()?,
      last_error: self.last_error,
      external_reference: ExternalReference::from_stored(self.external_reference),
      created_at: decode_dt(&self.created_at)?,
    })
  }
}
