//! Worker configuration, deserialised from `tandem.toml` and `TANDEM_*`
//! environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration as StdDuration,
};

use serde::Deserialize;

use crate::sweeper::SweepSettings;

/// Runtime configuration for `tandemd`. Every field has a default, so an
/// empty or missing config file is valid.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
  #[serde(default = "default_store_path")]
  pub store_path:          PathBuf,
  /// Directory the filesystem archive writes into.
  #[serde(default = "default_archive_dir")]
  pub archive_dir:         PathBuf,
  /// JSON-lines file events are appended to.
  #[serde(default = "default_event_log")]
  pub event_log:           PathBuf,
  /// Lease holder name; must differ between running instances.
  #[serde(default = "default_instance_id")]
  pub instance_id:         String,
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
  /// How long an attempt may run before the sweep treats it as crashed.
  /// Keep this well above the duration of a normal attempt.
  #[serde(default = "default_stale_after_secs")]
  pub stale_after_secs:    u64,
  #[serde(default = "default_max_attempts")]
  pub max_attempts:        u32,
  #[serde(default = "default_lease_ttl_secs")]
  pub lease_ttl_secs:      u64,
}

fn default_store_path() -> PathBuf { PathBuf::from("tandem.db") }

fn default_archive_dir() -> PathBuf { PathBuf::from("archive") }

fn default_event_log() -> PathBuf { PathBuf::from("events.jsonl") }

fn default_instance_id() -> String { format!("tandemd-{}", uuid::Uuid::new_v4()) }

fn default_sweep_interval_secs() -> u64 { 60 }

fn default_stale_after_secs() -> u64 { 15 * 60 }

fn default_max_attempts() -> u32 { 5 }

fn default_lease_ttl_secs() -> u64 { 5 * 60 }

impl WorkerConfig {
  /// Layer the optional file at `path` under `TANDEM_*` environment
  /// variables, then expand `~` in every path.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path.to_path_buf()).required(false))
      .add_source(config::Environment::with_prefix("TANDEM").try_parsing(true))
      .build()?;

    let mut cfg: Self = settings.try_deserialize()?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    cfg.archive_dir = expand_tilde(&cfg.archive_dir);
    cfg.event_log = expand_tilde(&cfg.event_log);
    Ok(cfg)
  }

  pub fn sweep_interval(&self) -> StdDuration {
    StdDuration::from_secs(self.sweep_interval_secs.max(1))
  }

  pub fn sweep_settings(&self) -> SweepSettings {
    SweepSettings {
      holder:       self.instance_id.clone(),
      stale_after:  chrono::Duration::seconds(saturating_i64(self.stale_after_secs)),
      max_attempts: self.max_attempts,
      lease_ttl:    chrono::Duration::seconds(saturating_i64(self.lease_ttl_secs)),
    }
  }
}

/// `chrono::Duration::seconds` panics past `i64::MAX / 1000`.
fn saturating_i64(secs: u64) -> i64 {
  i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
