//! Integration tests for `SqliteStore` against an in-memory database.


use std::{
  collections::VecDeque,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::NaiveDate;
use tandem_core::{
  actor::{Actor, Representation},
  processor::Processor,
  record::{NewRecord, Part, Period, Record},
  sink::{
    Archive, ArchiveReference, EventPublisher, Notification, Notifier, RecordEvent, SinkError,
  },
  store::DeclarationStore,
  submission::Submission,
  submit::SubmitReceipt,
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn period(from: &str, to: &str) -> Period {
  Period::new(
    from.parse::<NaiveDate>().unwrap(),
    to.parse::<NaiveDate>().unwrap(),
  )
  .unwrap()
}

fn employee() -> Actor { Actor::new("emp-user", Representation::Employee) }

fn employer() -> Actor { Actor::new("hr-user", Representation::Employer) }

fn half(part: Part, from: &str, to: &str) -> NewRecord {
  NewRecord::new("emp-1", part, "le-1", Some(period(from, to)))
}

/// Create a draft and submit it in one go.
async fn file(s: &SqliteStore, input: NewRecord) -> SubmitReceipt {
  let actor = match input.part {
    Part::EmployeePart => employee(),
    Part::EmployerPart => employer(),
  };
  let draft = s.create_record(input).await.unwrap();
  s.submit(draft.record_id, actor).await.unwrap()
}

async fn reload(s: &SqliteStore, r: &Record) -> Record {
  s.get_record(r.record_id).await.unwrap().unwrap()
}

// ─── Fake sinks ──────────────────────────────────────────────────────────────

/// Pops one scripted result per call; succeeds once the script runs out.
#[derive(Default)]
struct Script {
  queue: Mutex<VecDeque<SinkError>>,
  calls: AtomicUsize,
}

impl Script {
  fn failing(errors: impl IntoIterator<Item = SinkError>) -> Self {
    Self { queue: Mutex::new(errors.into_iter().collect()), calls: AtomicUsize::new(0) }
  }

  fn next(&self) -> Result<(), SinkError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.queue.lock().unwrap().pop_front() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[derive(Clone, Default)]
struct FakeArchive(Arc<Script>);

impl Archive for FakeArchive {
  async fn archive(
    &self,
    record: &Record,
    _submission: &Submission,
  ) -> Result<ArchiveReference, SinkError> {
    self.0.next()?;
    Ok(ArchiveReference(format!("arc-{}", record.record_id)))
  }
}

#[derive(Clone, Default)]
struct FakePublisher {
  script: Arc<Script>,
  events: Arc<Mutex<Vec<RecordEvent>>>,
}

impl EventPublisher for FakePublisher {
  async fn publish(&self, event: &RecordEvent) -> Result<(), SinkError> {
    self.script.next()?;
    self.events.lock().unwrap().push(event.clone());
    Ok(())
  }
}

#[derive(Clone, Default)]
struct FakeNotifier(Arc<Script>);

impl Notifier for FakeNotifier {
  async fn notify(&self, _notification: &Notification) -> Result<(), SinkError> {
    self.0.next()
  }
}

type TestProcessor = Processor<SqliteStore, FakeArchive, FakePublisher, FakeNotifier>;

struct Harness {
  store:     Arc<SqliteStore>,
  processor: TestProcessor,
  archive:   FakeArchive,
  publisher: FakePublisher,
  notifier:  FakeNotifier,
}

impl Harness {
  async fn new() -> Self {
    Self::with(FakeArchive::default(), FakePublisher::default(), FakeNotifier::default()).await
  }

  async fn with(archive: FakeArchive, publisher: FakePublisher, notifier: FakeNotifier) -> Self {
    let store = Arc::new(store().await);
    let processor =
      Processor::new(store.clone(), archive.clone(), publisher.clone(), notifier.clone());
    Self { store, processor, archive, publisher, notifier }
  }
}
