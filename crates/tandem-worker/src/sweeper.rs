//! The retry sweep.
//!
//! Each pass takes the `retry-sweep` lease, re-drives every retry candidate
//! through the processor, and releases the lease. Instances that fail to get
//! the lease skip the pass. The lease is renewed before each candidate so a
//! long pass keeps it, and a pass that loses it stops early.

use std::{future::Future, sync::Arc, time::Duration as StdDuration};

use chrono::Utc;
use tandem_core::{
  processor::Processor,
  sink::{Archive, EventPublisher, Notifier},
  store::DeclarationStore,
  submission::SubmissionStatus,
};

/// Name of the lease guarding the sweep across instances.
pub const SWEEP_LEASE: &str = "retry-sweep";

#[derive(Debug, Clone)]
pub struct SweepSettings {
  /// Lease holder identity for this instance.
  pub holder:       String,
  /// `Processing` attempts older than this are presumed crashed.
  pub stale_after:  chrono::Duration,
  pub max_attempts: u32,
  pub lease_ttl:    chrono::Duration,
}

/// What one sweep pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
  /// The lease was held elsewhere and nothing ran.
  pub skipped:   bool,
  pub picked:    usize,
  pub done:      usize,
  pub failed:    usize,
  /// Candidates whose attempt hit a store error.
  pub errors:    usize,
  /// Stale `Processing` rows picked up again.
  pub recovered: usize,
}

pub struct Sweeper<S, A, P, N> {
  processor: Arc<Processor<S, A, P, N>>,
  settings:  SweepSettings,
}

impl<S, A, P, N> Sweeper<S, A, P, N>
where
  S: DeclarationStore,
  A: Archive,
  P: EventPublisher,
  N: Notifier,
{
  pub fn new(processor: Arc<Processor<S, A, P, N>>, settings: SweepSettings) -> Self {
    Self { processor, settings }
  }

  pub fn settings(&self) -> &SweepSettings { &self.settings }

  /// Run a single pass. Only lease and candidate-query errors are returned;
  /// a failing candidate is logged and counted.
  #[tracing::instrument(skip(self), fields(holder = %self.settings.holder))]
  pub async fn sweep_once(&self) -> Result<SweepReport, S::Error> {
    let store = self.processor.store();
    let SweepSettings { holder, stale_after, max_attempts, lease_ttl } = &self.settings;

    if !store.try_acquire_lease(SWEEP_LEASE, holder, *lease_ttl).await? {
      tracing::debug!("sweep lease held elsewhere; skipping pass");
      return Ok(SweepReport { skipped: true, ..Default::default() });
    }

    let result = self.drain(*stale_after, *max_attempts, *lease_ttl).await;
    if let Err(err) = store.release_lease(SWEEP_LEASE, holder).await {
      tracing::warn!(error = %err, "failed to release sweep lease");
    }
    let report = result?;

    if report.picked > 0 {
      tracing::info!(
        picked = report.picked,
        done = report.done,
        failed = report.failed,
        errors = report.errors,
        recovered = report.recovered,
        "sweep pass finished"
      );
    }
    Ok(report)
  }

  async fn drain(
    &self,
    stale_after: chrono::Duration,
    max_attempts: u32,
    lease_ttl: chrono::Duration,
  ) -> Result<SweepReport, S::Error> {
    let store = self.processor.store();
    let holder = self.settings.holder.as_str();
    let candidates = store
      .find_retry_candidates(Utc::now() - stale_after, max_attempts)
      .await?;

    let mut report = SweepReport { picked: candidates.len(), ..Default::default() };
    for candidate in candidates {
      if !store.try_acquire_lease(SWEEP_LEASE, holder, lease_ttl).await? {
        tracing::warn!("sweep lease lost mid-pass; stopping");
        break;
      }
      if candidate.status == SubmissionStatus::Processing {
        // A crashed attempt never reached `record_outcome`, so it is not
        // counted against `max_attempts`.
        tracing::warn!(
          submission_id = %candidate.submission_id,
          attempts = candidate.attempt_count,
          last_attempt_at = ?candidate.last_attempt_at,
          "re-driving stale attempt"
        );
        report.recovered += 1;
      }
      match self.processor.run(candidate.submission_id).await {
        Ok(outcome) if outcome.status == SubmissionStatus::Done => report.done += 1,
        Ok(_) => report.failed += 1,
        Err(err) => {
          tracing::error!(
            submission_id = %candidate.submission_id,
            error = %err,
            "retry attempt failed"
          );
          report.errors += 1;
        }
      }
    }
    Ok(report)
  }

  /// Sweep every `interval` until `shutdown` resolves.
  pub async fn run_until(&self, interval: StdDuration, shutdown: impl Future<Output = ()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        _ = &mut shutdown => {
          tracing::info!("sweeper shutting down");
          return;
        }
        _ = ticker.tick() => {
          if let Err(err) = self.sweep_once().await {
            tracing::error!(error = %err, "sweep pass failed");
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use chrono::NaiveDate;
  use tandem_core::{
    actor::{Actor, Representation},
    record::{NewRecord, Part, Period, Record},
    sink::{ArchiveReference, Notification, RecordEvent, SinkError},
    submission::Submission,
  };
  use tandem_store_sqlite::SqliteStore;

  use super::*;

  /// Fails with a transport error for the first `failures` calls.
  #[derive(Clone)]
  struct FlakyArchive {
    failures: usize,
    calls:    Arc<AtomicUsize>,
  }

  impl Archive for FlakyArchive {
    async fn archive(
      &self,
      record: &Record,
      _submission: &Submission,
    ) -> Result<ArchiveReference, SinkError> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst);
      if n < self.failures {
        return Err(SinkError::transport("archive offline"));
      }
      Ok(ArchiveReference(record.record_id.to_string()))
    }
  }

  struct NullPublisher;

  impl EventPublisher for NullPublisher {
    async fn publish(&self, _event: &RecordEvent) -> Result<(), SinkError> { Ok(()) }
  }

  struct NullNotifier;

  impl Notifier for NullNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), SinkError> { Ok(()) }
  }

  type TestSweeper = Sweeper<SqliteStore, FlakyArchive, NullPublisher, NullNotifier>;

  fn settings(holder: &str) -> SweepSettings {
    SweepSettings {
      holder:       holder.to_owned(),
      stale_after:  chrono::Duration::minutes(15),
      max_attempts: 3,
      lease_ttl:    chrono::Duration::minutes(5),
    }
  }

  async fn setup(failures: usize, holder: &str) -> (TestSweeper, Arc<AtomicUsize>) {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let archive = FlakyArchive { failures, calls: calls.clone() };
    let processor = Arc::new(Processor::new(store, archive, NullPublisher, NullNotifier));
    (Sweeper::new(processor, settings(holder)), calls)
  }

  /// File an employee half and leave its submission `Received`.
  async fn file_record(store: &SqliteStore) -> Submission {
    let period = Period::new(
      NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
    )
    .unwrap();
    let draft = store
      .create_record(NewRecord::new("emp-1", Part::EmployeePart, "le-1", Some(period)))
      .await
      .unwrap();
    store
      .submit(draft.record_id, Actor::new("emp-user", Representation::Employee))
      .await
      .unwrap()
      .submission
  }

  async fn file_and_run(sweeper: &TestSweeper) -> Submission {
    let submission = file_record(sweeper.processor.store()).await;
    sweeper.processor.run(submission.submission_id).await.unwrap()
  }

  #[tokio::test]
  async fn sweep_retries_sink_failures() {
    let (sweeper, calls) = setup(1, "node-a").await;
    let first = file_and_run(&sweeper).await;
    assert_eq!(first.status, SubmissionStatus::SinkFailed);

    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report, SweepReport { picked: 1, done: 1, ..Default::default() });
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stored = sweeper
      .processor
      .store()
      .get_submission(first.submission_id)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.status, SubmissionStatus::Done);
    assert_eq!(stored.attempt_count, 2);
  }

  #[tokio::test]
  async fn sweep_stops_at_max_attempts() {
    let (sweeper, calls) = setup(usize::MAX, "node-a").await;
    file_and_run(&sweeper).await;

    // Attempts 2 and 3, then the submission is exhausted.
    assert_eq!(sweeper.sweep_once().await.unwrap().failed, 1);
    assert_eq!(sweeper.sweep_once().await.unwrap().failed, 1);
    assert_eq!(sweeper.sweep_once().await.unwrap().picked, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn sweep_skips_when_lease_is_held_elsewhere() {
    let (sweeper, calls) = setup(1, "node-a").await;
    file_and_run(&sweeper).await;

    let store = sweeper.processor.store();
    assert!(
      store
        .try_acquire_lease(SWEEP_LEASE, "node-b", chrono::Duration::minutes(5))
        .await
        .unwrap()
    );

    let report = sweeper.sweep_once().await.unwrap();
    assert!(report.skipped);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn sweep_releases_lease_after_pass() {
    let (sweeper, _) = setup(0, "node-a").await;
    sweeper.sweep_once().await.unwrap();

    let store = sweeper.processor.store();
    assert!(
      store
        .try_acquire_lease(SWEEP_LEASE, "node-b", chrono::Duration::minutes(5))
        .await
        .unwrap()
    );
  }

  #[tokio::test]
  async fn stale_processing_is_recovered() {
    let (sweeper, calls) = setup(0, "node-a").await;
    let store = sweeper.processor.store();
    let stuck = file_record(store).await;
    store.mark_started(stuck.submission_id).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(5)).await;

    let eager = Sweeper::new(
      sweeper.processor.clone(),
      SweepSettings { stale_after: chrono::Duration::zero(), ..settings("node-a") },
    );
    let report = eager.sweep_once().await.unwrap();
    assert_eq!(report, SweepReport { picked: 1, done: 1, recovered: 1, ..Default::default() });
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stored = store.get_submission(stuck.submission_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Done);
    assert_eq!(stored.attempt_count, 1);
  }

  /// Hands the sweep lease to another holder during its first call.
  struct LeaseStealingArchive {
    store: Arc<SqliteStore>,
    calls: Arc<AtomicUsize>,
  }

  impl Archive for LeaseStealingArchive {
    async fn archive(
      &self,
      record: &Record,
      _submission: &Submission,
    ) -> Result<ArchiveReference, SinkError> {
      if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
        let taken = self
          .store
          .try_acquire_lease(SWEEP_LEASE, "node-b", chrono::Duration::minutes(5))
          .await
          .map_err(|e| SinkError::transport(e.to_string()))?;
        assert!(taken, "expired lease should be up for grabs");
      }
      Ok(ArchiveReference(record.record_id.to_string()))
    }
  }

  #[tokio::test]
  async fn sweep_stops_when_lease_is_lost_mid_pass() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let first = file_record(&store).await;
    let second = file_record(&store).await;
    tokio::time::sleep(StdDuration::from_millis(5)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let archive = LeaseStealingArchive { store: store.clone(), calls: calls.clone() };
    let processor = Arc::new(Processor::new(store.clone(), archive, NullPublisher, NullNotifier));
    // A zero TTL lets the lease lapse as soon as it is renewed.
    let sweeper = Sweeper::new(
      processor,
      SweepSettings {
        stale_after: chrono::Duration::zero(),
        lease_ttl: chrono::Duration::zero(),
        ..settings("node-a")
      },
    );

    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report, SweepReport { picked: 2, done: 1, ..Default::default() });
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let first = store.get_submission(first.submission_id).await.unwrap().unwrap();
    let second = store.get_submission(second.submission_id).await.unwrap().unwrap();
    assert_eq!(first.status, SubmissionStatus::Done);
    assert_eq!(second.status, SubmissionStatus::Received);
    assert_eq!(second.attempt_count, 0);

    // The new holder keeps the lease; the losing sweep did not release it.
    assert!(
      !store
        .try_acquire_lease(SWEEP_LEASE, "node-a", chrono::Duration::minutes(5))
        .await
        .unwrap()
    );
  }

  #[tokio::test]
  async fn run_until_returns_on_shutdown() {
    let (sweeper, _) = setup(0, "node-a").await;
    sweeper.run_until(StdDuration::from_millis(10), async {}).await;
  }
}
