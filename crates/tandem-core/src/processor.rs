//! The submission processor — drives one submission through its sinks.
//!
//! Every call to [`Processor::run`] is one attempt: it marks the submission
//! started, calls archive → publish → notify, and always resolves to a
//! persisted outcome. Sink failures never escape `run`; the stored status is
//! the error report. Only store errors (and missing rows) are returned.
//!
//! An attempt that crashes between `mark_started` and `record_outcome` leaves
//! the submission in `Processing`; the retry sweep picks it up again once its
//! `last_attempt_at` is older than the staleness window.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
  Error,
  record::Record,
  sink::{Archive, EventPublisher, FailureKind, Notification, Notifier, RecordEvent, SinkError},
  store::DeclarationStore,
  submission::{Submission, SubmissionStatus},
};

pub struct Processor<S, A, P, N> {
  store:     Arc<S>,
  archive:   A,
  publisher: P,
  notifier:  N,
}

impl<S, A, P, N> Processor<S, A, P, N>
where
  S: DeclarationStore,
  A: Archive,
  P: EventPublisher,
  N: Notifier,
{
  pub fn new(store: Arc<S>, archive: A, publisher: P, notifier: N) -> Self {
    Self { store, archive, publisher, notifier }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Run one attempt for `submission_id` and return the persisted result.
  ///
  /// Re-running a terminal submission skips the sinks; the attempt is still
  /// counted and the status is left unchanged.
  #[tracing::instrument(skip(self))]
  pub async fn run(&self, submission_id: Uuid) -> Result<Submission, S::Error> {
    let submission = self
      .store
      .get_submission(submission_id)
      .await?
      .ok_or(Error::SubmissionNotFound(submission_id))?;

    if submission.status.is_terminal() {
      tracing::warn!(
        status = %submission.status,
        "submission already terminal; sinks skipped"
      );
      return self
        .store
        .record_outcome(submission_id, submission.status, submission.last_error)
        .await;
    }

    let record = self
      .store
      .get_record(submission.record_id)
      .await?
      .ok_or(Error::RecordNotFound(submission.record_id))?;

    let started = self.store.mark_started(submission_id).await?;

    match self.deliver(&record, &started).await {
      Ok(()) => {
        tracing::info!(
          external_reference = %started.external_reference,
          "submission processed"
        );
        self
          .store
          .record_outcome(submission_id, SubmissionStatus::Done, None)
          .await
      }
      Err(err) => {
        let status = match err.kind {
          FailureKind::Transport => SubmissionStatus::SinkFailed,
          FailureKind::Permanent => SubmissionStatus::PermanentlyFailed,
        };
        tracing::warn!(
          external_reference = %started.external_reference,
          %status,
          error = %err,
          "submission attempt failed"
        );
        self
          .store
          .record_outcome(submission_id, status, Some(err.to_string()))
          .await
      }
    }
  }

  async fn deliver(&self, record: &Record, submission: &Submission) -> Result<(), SinkError> {
    let archive_reference = self.archive.archive(record, submission).await?;
    tracing::debug!(%archive_reference, "record archived");

    let event = RecordEvent::new(record, submission, archive_reference);
    self.publisher.publish(&event).await?;

    let notification = Notification::receipt(record, submission);
    if let Err(err) = self.notifier.notify(&notification).await {
      tracing::warn!(error = %err, "notification failed; ignoring");
    }
    Ok(())
  }
}
