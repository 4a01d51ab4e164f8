//! Daemon configuration: defaults, optional TOML file, CLI overrides.

use crate::frame::DEFAULT_MAX_PENDING;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// host:port the server binds to.
    pub bind: String,
    /// Directory referenced result files are copied into.
    pub landing_dir: PathBuf,
    /// Cap on unterminated bytes buffered per connection.
    pub max_pending_bytes: usize,
    /// Optional line-log file for ingest and copy operations.
    pub log_file: Option<PathBuf>,
    /// Append a JSONL record per ingested message under the landing dir.
    pub ingest_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "0.0.0.0:7070".to_string(),
            landing_dir: PathBuf::from("doc_test"),
            max_pending_bytes: DEFAULT_MAX_PENDING,
            log_file: None,
            ingest_log: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Split `bind` into the host and port `TcpIngestServer::start` takes.
    /// IPv6 hosts may be written with the usual brackets (`[::1]:7070`).
    pub fn host_port(&self) -> Result<(String, u16)> {
        let (host, port) = self
            .bind
            .rsplit_once(':')
            .with_context(|| format!("bind must be host:port, got {:?}", self.bind))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let port = port
            .parse()
            .with_context(|| format!("invalid port in bind {:?}", self.bind))?;
        Ok((host.to_string(), port))
    }
}
