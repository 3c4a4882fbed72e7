//! Records — one submitted half of a two-party declaration.
//!
//! A record is created as a draft, may be replaced freely while it is a draft,
//! and is submitted exactly once. Once submitted, its identity fields
//! (`part`, `subject_id`, `legal_entity_id`) never change; only the
//! cross-reference fields are rewritten as later submissions arrive.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, actor::Actor};

// ─── Part ────────────────────────────────────────────────────────────────────

/// Which half of the case a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
  EmployerPart,
  EmployeePart,
}

impl Part {
  /// The other half of the same case.
  pub fn opposite(self) -> Self {
    match self {
      Self::EmployerPart => Self::EmployeePart,
      Self::EmployeePart => Self::EmployerPart,
    }
  }
}

/// Whether a record is still editable or has been filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
  Draft,
  Submitted,
}

// ─── Period ──────────────────────────────────────────────────────────────────

/// An inclusive calendar date range with `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct Period {
  from: NaiveDate,
  to:   NaiveDate,
}

#[derive(Deserialize)]
struct RawPeriod {
  from: NaiveDate,
  to:   NaiveDate,
}

impl TryFrom<RawPeriod> for Period {
  type Error = Error;

  fn try_from(raw: RawPeriod) -> Result<Self> { Self::new(raw.from, raw.to) }
}

impl Period {
  pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
    if from > to {
      return Err(Error::InvalidPeriod { from, to });
    }
    Ok(Self { from, to })
  }

  pub fn start(&self) -> NaiveDate { self.from }

  pub fn end(&self) -> NaiveDate { self.to }

  /// True if the two ranges share at least one day. Touching on a single
  /// boundary day counts.
  pub fn overlaps(&self, other: &Period) -> bool {
    self.from.max(other.from) <= self.to.min(other.to)
  }

  /// The smallest period covering every period in `periods`, or `None` if
  /// the iterator is empty.
  pub fn union_of<'a>(periods: impl IntoIterator<Item = &'a Period>) -> Option<Period> {
    periods.into_iter().fold(None, |acc: Option<Period>, p| {
      Some(match acc {
        None => *p,
        Some(u) => Period { from: u.from.min(p.from), to: u.to.max(p.to) },
      })
    })
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One half of a case, as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
  pub record_id:            Uuid,
  /// The employee's identifier.
  pub subject_id:           String,
  /// The employer's identifier, when known.
  pub counterparty_id:      Option<String>,
  pub part:                 Part,
  pub legal_entity_id:      String,
  /// `None` when the payload could not be parsed into a date range.
  pub period:               Option<Period>,
  /// Opaque form content; its schema is owned by the intake layer.
  pub payload:              serde_json::Value,
  pub status:               RecordStatus,
  /// The live record for the opposite half of this case.
  pub linked_record_id:     Option<Uuid>,
  /// The earlier version of this same half that this record replaces.
  pub supersedes_record_id: Option<Uuid>,
  pub created_at:           DateTime<Utc>,
  pub updated_at:           DateTime<Utc>,
  pub submitted_at:         Option<DateTime<Utc>>,
  pub submitted_by:         Option<Actor>,
}

impl Record {
  pub fn is_submitted(&self) -> bool { self.status == RecordStatus::Submitted }

  /// Build a fresh draft from caller input. Timestamps are set by the caller
  /// (normally the store).
  pub fn draft(input: NewRecord, now: DateTime<Utc>) -> Result<Self> {
    input.validate()?;
    Ok(Self {
      record_id:            Uuid::new_v4(),
      subject_id:           input.subject_id,
      counterparty_id:      input.counterparty_id,
      part:                 input.part,
      legal_entity_id:      input.legal_entity_id,
      period:               input.period,
      payload:              input.payload,
      status:               RecordStatus::Draft,
      linked_record_id:     None,
      supersedes_record_id: None,
      created_at:           now,
      updated_at:           now,
      submitted_at:         None,
      submitted_by:         None,
    })
  }

  /// Replace the editable content of a draft.
  ///
  /// Fails with [`Error::AlreadySubmitted`] once the record has been filed.
  pub fn revise(&mut self, input: NewRecord, now: DateTime<Utc>) -> Result<()> {
    if self.is_submitted() {
      return Err(Error::AlreadySubmitted(self.record_id));
    }
    input.validate()?;
    self.subject_id = input.subject_id;
    self.counterparty_id = input.counterparty_id;
    self.part = input.part;
    self.legal_entity_id = input.legal_entity_id;
    self.period = input.period;
    self.payload = input.payload;
    self.updated_at = now;
    Ok(())
  }
}

// ─── NewRecord ───────────────────────────────────────────────────────────────

/// Input to [`crate::store::DeclarationStore::create_record`] and
/// [`crate::store::DeclarationStore::update_record`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
  pub subject_id:      String,
  #[serde(default)]
  pub counterparty_id: Option<String>,
  pub part:            Part,
  pub legal_entity_id: String,
  #[serde(default)]
  pub period:          Option<Period>,
  #[serde(default)]
  pub payload:         serde_json::Value,
}

impl NewRecord {
  /// Convenience constructor with the optional fields left empty.
  pub fn new(
    subject_id: impl Into<String>,
    part: Part,
    legal_entity_id: impl Into<String>,
    period: Option<Period>,
  ) -> Self {
    Self {
      subject_id: subject_id.into(),
      counterparty_id: None,
      part,
      legal_entity_id: legal_entity_id.into(),
      period,
      payload: serde_json::Value::Null,
    }
  }

  fn validate(&self) -> Result<()> {
    if self.subject_id.trim().is_empty() {
      return Err(Error::MissingField("subject_id"));
    }
    if self.legal_entity_id.trim().is_empty() {
      return Err(Error::MissingField("legal_entity_id"));
    }
    Ok(())
  }
}
