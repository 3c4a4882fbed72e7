//! `tandemd` — submission worker for two-party declarations.
//!
//! Reads `tandem.toml` (or the path given with `--config`) plus `TANDEM_*`
//! environment variables, opens the SQLite store, and either runs the retry
//! sweep or performs a one-off command.
//!
//! ```text
//! tandemd run
//! tandemd submit record.json --user hr-42 --on-behalf-of acme-payroll
//! tandemd status 0190d6e2-…
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tandem_core::{
  actor::{Actor, Representation},
  processor::Processor,
  record::{NewRecord, Part},
  store::DeclarationStore,
};
use tandem_store_sqlite::SqliteStore;
use tandem_worker::{
  Sweeper, WorkerConfig,
  sinks::{FsArchive, JsonlEventLog, LogNotifier},
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Tandem submission worker")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tandem.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run the retry sweep until interrupted.
  Run,
  /// Run a single sweep pass and exit.
  Sweep,
  /// File a record from a JSON file and process it.
  Submit {
    /// JSON document describing the record.
    file: PathBuf,
    /// Id of the user filing the record.
    #[arg(long)]
    user: String,
    /// File as a representative of this organisation.
    #[arg(long, value_name = "ORG")]
    on_behalf_of: Option<String>,
  },
  /// Print a record and its submission.
  Status { record_id: Uuid },
}

type WorkerProcessor = Processor<SqliteStore, FsArchive, JsonlEventLog, LogNotifier>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let cfg = WorkerConfig::load(&cli.config)
    .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  let processor: Arc<WorkerProcessor> = Arc::new(Processor::new(
    Arc::new(store),
    FsArchive::new(&cfg.archive_dir),
    JsonlEventLog::new(&cfg.event_log),
    LogNotifier,
  ));

  match cli.command {
    Command::Run => {
      let sweeper = Sweeper::new(processor, cfg.sweep_settings());
      tracing::info!(
        holder = %sweeper.settings().holder,
        interval_secs = cfg.sweep_interval().as_secs(),
        "sweeper started"
      );
      sweeper
        .run_until(cfg.sweep_interval(), async {
          if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
          }
        })
        .await;
    }
    Command::Sweep => {
      let sweeper = Sweeper::new(processor, cfg.sweep_settings());
      let report = sweeper.sweep_once().await.context("sweep failed")?;
      println!(
        "skipped={} picked={} done={} failed={} errors={} recovered={}",
        report.skipped, report.picked, report.done, report.failed, report.errors, report.recovered
      );
    }
    Command::Submit { file, user, on_behalf_of } => {
      let raw = tokio::fs::read(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
      let input: NewRecord = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing {}", file.display()))?;
      let actor = Actor::new(user, representation(input.part, on_behalf_of)?);

      let store = processor.store();
      let draft = store.create_record(input).await.context("failed to create record")?;
      let receipt = store
        .submit(draft.record_id, actor)
        .await
        .context("failed to submit record")?;

      // The submit is committed; a failure here is left for the sweep.
      let submission = match processor.run(receipt.submission.submission_id).await {
        Ok(submission) => submission,
        Err(err) => {
          tracing::error!(error = %err, "processing failed; the sweep will retry");
          receipt.submission
        }
      };
      let record = store
        .get_record(receipt.record.record_id)
        .await?
        .unwrap_or(receipt.record);
      print_json(&serde_json::json!({ "record": record, "submission": submission }))?;
    }
    Command::Status { record_id } => {
      let store = processor.store();
      let record = store
        .get_record(record_id)
        .await?
        .with_context(|| format!("no record {record_id}"))?;
      let submission = store.find_submission_by_record(record_id).await?;
      print_json(&serde_json::json!({ "record": record, "submission": submission }))?;
    }
  }

  Ok(())
}

/// Derive the filing capacity from the half being filed.
fn representation(part: Part, on_behalf_of: Option<String>) -> anyhow::Result<Representation> {
  match (part, on_behalf_of) {
    (Part::EmployeePart, None) => Ok(Representation::Employee),
    (Part::EmployeePart, Some(_)) => {
      anyhow::bail!("--on-behalf-of only applies to the employer part")
    }
    (Part::EmployerPart, None) => Ok(Representation::Employer),
    (Part::EmployerPart, Some(org)) => Ok(Representation::Representative { on_behalf_of: org }),
  }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
