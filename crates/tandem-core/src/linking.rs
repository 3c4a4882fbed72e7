//! The linking engine — pairs each newly submitted half with its counterpart
//! and with the earlier version of itself it replaces.
//!
//! Both halves of a case are filed independently, in any order, and possibly
//! more than once (corrections). After every submission the engine leaves
//! exactly one live record per half, and the two live halves point at each
//! other.
//!
//! The engine is a pure function over the candidate set. Reading the
//! candidates and writing the touched records back must happen inside one
//! transaction; see [`crate::submit`].

use std::cmp::Ordering;

use uuid::Uuid;

use crate::{
  Error, Result,
  record::{Period, Record},
};

/// The cross-references chosen for a newly submitted record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Linkage {
  pub supersedes_record_id: Option<Uuid>,
  pub linked_record_id:     Option<Uuid>,
  /// Candidates whose `linked_record_id` was rewritten and must be saved.
  pub touched:              Vec<Uuid>,
}

/// Candidate order: most recently submitted first, then by id.
fn tie_break(a: &Record, b: &Record) -> Ordering {
  b.submitted_at
    .cmp(&a.submitted_at)
    .then_with(|| a.record_id.cmp(&b.record_id))
}

fn overlaps(a: Option<&Period>, b: Option<&Period>) -> bool {
  matches!((a, b), (Some(a), Some(b)) if a.overlaps(b))
}

/// Attach `record` to its predecessor and/or counterpart among `candidates`.
///
/// `candidates` should hold every submitted record with the same
/// `subject_id`; anything else in the slice (drafts, other subjects, the
/// record itself) is ignored. Cross-references are written into `record` and
/// into the affected candidates in place.
pub fn link(record: &mut Record, candidates: &mut [Record]) -> Result<Linkage> {
  record.supersedes_record_id = None;
  record.linked_record_id = None;

  let mut order: Vec<usize> = (0..candidates.len())
    .filter(|&i| {
      let c = &candidates[i];
      c.record_id != record.record_id
        && c.is_submitted()
        && c.subject_id == record.subject_id
        && c.legal_entity_id == record.legal_entity_id
    })
    .collect();
  order.sort_by(|&a, &b| tie_break(&candidates[a], &candidates[b]));

  let mut linkage = Linkage::default();

  // ── Supersession: same half, newer version ────────────────────────────────
  let same_half: Vec<usize> = order
    .iter()
    .copied()
    .filter(|&i| candidates[i].part == record.part)
    .collect();
  let history = Period::union_of(same_half.iter().filter_map(|&i| candidates[i].period.as_ref()));

  if let Some(&pred) = same_half.first()
    && overlaps(record.period.as_ref(), history.as_ref())
  {
    let pred_id = candidates[pred].record_id;
    record.supersedes_record_id = Some(pred_id);
    linkage.supersedes_record_id = Some(pred_id);

    if let Some(counterpart_id) = candidates[pred].linked_record_id {
      let cp = candidates
        .iter()
        .position(|c| c.record_id == counterpart_id)
        .ok_or(Error::RecordNotFound(counterpart_id))?;

      candidates[cp].linked_record_id = Some(record.record_id);
      candidates[pred].linked_record_id = None;
      record.linked_record_id = Some(counterpart_id);
      linkage.linked_record_id = Some(counterpart_id);
      linkage.touched.extend([counterpart_id, pred_id]);
    }
  }

  // ── Counterpart: opposite half, same case ─────────────────────────────────
  if record.linked_record_id.is_none() {
    let wanted = record.part.opposite();
    let found = order.iter().copied().find(|&i| {
      let c = &candidates[i];
      c.part == wanted
        && c.linked_record_id.is_none()
        && overlaps(record.period.as_ref(), c.period.as_ref())
    });

    if let Some(i) = found {
      let counterpart_id = candidates[i].record_id;
      candidates[i].linked_record_id = Some(record.record_id);
      record.linked_record_id = Some(counterpart_id);
      linkage.linked_record_id = Some(counterpart_id);
      linkage.touched.push(counterpart_id);
    }
  }

  Ok(linkage)
}

#[cfg(test)]
mod tests {
  use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

  use super::*;
  use crate::record::{NewRecord, Part, RecordStatus};

  fn period(from: &str, to: &str) -> Period {
    Period::new(
      from.parse::<NaiveDate>().unwrap(),
      to.parse::<NaiveDate>().unwrap(),
    )
    .unwrap()
  }

  fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap() }

  /// A submitted record for subject `emp-1` at legal entity `le-1`.
  fn submitted(part: Part, p: Period, minutes: i64) -> Record {
    let at = t0() + Duration::minutes(minutes);
    let mut r =
      Record::draft(NewRecord::new("emp-1", part, "le-1", Some(p)), at).unwrap();
    r.status = RecordStatus::Submitted;
    r.submitted_at = Some(at);
    r
  }

  fn find(cands: &[Record], id: Uuid) -> &Record {
    cands.iter().find(|c| c.record_id == id).unwrap()
  }

  #[test]
  fn overlapping_opposite_halves_link() {
    let a = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    let mut b = submitted(Part::EmployerPart, period("2024-03-01", "2024-12-31"), 1);
    let mut cands = vec![a.clone()];

    let linkage = link(&mut b, &mut cands).unwrap();
    assert_eq!(linkage.linked_record_id, Some(a.record_id));
    assert_eq!(linkage.supersedes_record_id, None);
    assert_eq!(b.linked_record_id, Some(a.record_id));
    assert_eq!(cands[0].linked_record_id, Some(b.record_id));
    assert_eq!(linkage.touched, vec![a.record_id]);
  }

  #[test]
  fn disjoint_periods_do_not_link() {
    let a = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    let mut b = submitted(Part::EmployerPart, period("2025-01-01", "2025-12-31"), 1);
    let mut cands = vec![a];

    let linkage = link(&mut b, &mut cands).unwrap();
    assert_eq!(linkage, Linkage::default());
    assert!(b.linked_record_id.is_none());
    assert!(cands[0].linked_record_id.is_none());
  }

  #[test]
  fn adjacent_periods_do_not_link() {
    let a = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    let mut b = submitted(Part::EmployerPart, period("2024-07-01", "2024-12-31"), 1);
    let mut cands = vec![a];
    link(&mut b, &mut cands).unwrap();
    assert!(b.linked_record_id.is_none());
  }

  #[test]
  fn single_shared_day_links() {
    let a = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    let mut b = submitted(Part::EmployerPart, period("2024-06-30", "2024-12-31"), 1);
    let mut cands = vec![a.clone()];
    link(&mut b, &mut cands).unwrap();
    assert_eq!(b.linked_record_id, Some(a.record_id));
  }

  #[test]
  fn different_legal_entity_does_not_link() {
    let mut a = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    a.legal_entity_id = "le-2".into();
    let mut b = submitted(Part::EmployerPart, period("2024-01-01", "2024-06-30"), 1);
    let mut cands = vec![a];
    link(&mut b, &mut cands).unwrap();
    assert!(b.linked_record_id.is_none());
  }

  #[test]
  fn already_claimed_counterpart_is_skipped() {
    let mut a = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    a.linked_record_id = Some(Uuid::new_v4());
    let mut b = submitted(Part::EmployerPart, period("2024-01-01", "2024-06-30"), 1);
    let mut cands = vec![a];
    link(&mut b, &mut cands).unwrap();
    assert!(b.linked_record_id.is_none());
  }

  #[test]
  fn successor_inherits_counterpart() {
    let mut p = submitted(Part::EmployerPart, period("2024-01-01", "2024-06-30"), 0);
    let mut c = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 1);
    p.linked_record_id = Some(c.record_id);
    c.linked_record_id = Some(p.record_id);
    let mut s = submitted(Part::EmployerPart, period("2024-02-01", "2024-07-31"), 2);
    let mut cands = vec![p.clone(), c.clone()];

    let linkage = link(&mut s, &mut cands).unwrap();
    assert_eq!(s.supersedes_record_id, Some(p.record_id));
    assert_eq!(s.linked_record_id, Some(c.record_id));
    assert_eq!(find(&cands, c.record_id).linked_record_id, Some(s.record_id));
    assert_eq!(find(&cands, p.record_id).linked_record_id, None);
    assert_eq!(linkage.touched.len(), 2);
  }

  #[test]
  fn successor_without_inherited_link_looks_for_counterpart() {
    let p = submitted(Part::EmployerPart, period("2024-01-01", "2024-03-31"), 0);
    let c = submitted(Part::EmployeePart, period("2024-05-01", "2024-06-30"), 1);
    // The correction widens the period so it now overlaps the employee half.
    let mut s = submitted(Part::EmployerPart, period("2024-03-01", "2024-06-30"), 2);
    let mut cands = vec![p.clone(), c.clone()];

    link(&mut s, &mut cands).unwrap();
    assert_eq!(s.supersedes_record_id, Some(p.record_id));
    assert_eq!(s.linked_record_id, Some(c.record_id));
    assert_eq!(find(&cands, c.record_id).linked_record_id, Some(s.record_id));
  }

  #[test]
  fn supersession_uses_union_of_history() {
    // Two earlier versions: Jan and Mar. The correction covers Feb only,
    // which overlaps neither version alone but does overlap their hull.
    let v1 = submitted(Part::EmployeePart, period("2024-01-01", "2024-01-31"), 0);
    let v2 = submitted(Part::EmployeePart, period("2024-03-01", "2024-03-31"), 1);
    let mut s = submitted(Part::EmployeePart, period("2024-02-01", "2024-02-28"), 2);
    let mut cands = vec![v1, v2.clone()];

    link(&mut s, &mut cands).unwrap();
    assert_eq!(s.supersedes_record_id, Some(v2.record_id));
  }

  #[test]
  fn supersession_picks_most_recent_version() {
    let older = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    let newer = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 5);
    let mut s = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 9);
    // Input order must not matter.
    let mut cands = vec![newer.clone(), older.clone()];
    cands.reverse();

    link(&mut s, &mut cands).unwrap();
    assert_eq!(s.supersedes_record_id, Some(newer.record_id));
  }

  #[test]
  fn counterpart_tie_break_prefers_most_recent() {
    let early = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    let late = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 3);
    let mut e = submitted(Part::EmployerPart, period("2024-01-01", "2024-06-30"), 4);
    let mut cands = vec![early, late.clone()];

    link(&mut e, &mut cands).unwrap();
    assert_eq!(e.linked_record_id, Some(late.record_id));
  }

  #[test]
  fn record_without_period_never_matches() {
    let a = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    let mut b = submitted(Part::EmployerPart, period("2024-01-01", "2024-06-30"), 1);
    b.period = None;
    let mut cands = vec![a];
    assert_eq!(link(&mut b, &mut cands).unwrap(), Linkage::default());
  }

  #[test]
  fn missing_inherited_counterpart_is_not_found() {
    let mut p = submitted(Part::EmployerPart, period("2024-01-01", "2024-06-30"), 0);
    let ghost = Uuid::new_v4();
    p.linked_record_id = Some(ghost);
    let mut s = submitted(Part::EmployerPart, period("2024-01-01", "2024-06-30"), 1);
    let mut cands = vec![p];

    let err = link(&mut s, &mut cands).unwrap_err();
    assert!(matches!(err, Error::RecordNotFound(id) if id == ghost));
  }

  #[test]
  fn drafts_and_self_are_ignored() {
    let mut draft = submitted(Part::EmployeePart, period("2024-01-01", "2024-06-30"), 0);
    draft.status = RecordStatus::Draft;
    let mut b = submitted(Part::EmployerPart, period("2024-01-01", "2024-06-30"), 1);
    let mut cands = vec![draft, b.clone()];
    assert_eq!(link(&mut b, &mut cands).unwrap(), Linkage::default());
  }
}
