//! Out-of-band processing for Tandem.
//!
//! Provides the concrete downstream sinks, the worker configuration, and the
//! retry [`Sweeper`] that re-drives stuck submissions. The `tandemd` binary
//! wires these to a [`tandem_store_sqlite::SqliteStore`].

pub mod config;
pub mod sinks;
pub mod sweeper;

pub use config::WorkerConfig;
pub use sweeper::{SweepReport, SweepSettings, Sweeper};
