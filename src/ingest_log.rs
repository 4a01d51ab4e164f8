//! Append-only JSONL record of ingested messages, kept next to the copied
//! files in the landing directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Decoded,
    DecodeFailed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct IngestLogEntry {
    pub timestamp: String,
    pub client: String,
    pub bytes: usize,
    pub status: IngestStatus,
    pub blocks: usize,
    pub files_copied: u64,
    pub copy_errors: usize,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct IngestLog {
    log_file_path: PathBuf,
}

impl IngestLog {
    pub fn new(landing_dir: &Path) -> Self {
        let log_file_path = landing_dir.join(".fixtured_ingest.jsonl");
        IngestLog { log_file_path }
    }

    pub fn add_entry(&self, entry: IngestLogEntry) -> Result<()> {
        if let Some(parent) = self.log_file_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open ingest log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<IngestLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open ingest log file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: IngestLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
