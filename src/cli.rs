//! Clap options for the fixtured daemon.

use crate::config::Config;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Daemon options; anything set here overrides the config file.
#[derive(Clone, Debug, Parser)]
#[command(
    name = "fixtured",
    version,
    about = "TCP ingestion daemon for test-fixture result streams"
)]
pub struct DaemonOpts {
    /// Path to a fixtured.toml config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Landing directory for copied result files
    #[arg(long)]
    pub landing_dir: Option<PathBuf>,

    /// Line-log file for ingest and copy operations
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Cap on buffered bytes per connection, in MiB
    #[arg(long)]
    pub max_pending_mb: Option<usize>,

    /// Disable the JSONL ingest log
    #[arg(long)]
    pub no_ingest_log: bool,
}

impl DaemonOpts {
    /// Resolve the effective configuration: file (or defaults) plus CLI
    /// overrides.
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(landing_dir) = self.landing_dir {
            config.landing_dir = landing_dir;
        }
        if let Some(log_file) = self.log_file {
            config.log_file = Some(log_file);
        }
        if let Some(mb) = self.max_pending_mb {
            config.max_pending_bytes = mb * 1024 * 1024;
        }
        if self.no_ingest_log {
            config.ingest_log = false;
        }
        Ok(config)
    }
}
