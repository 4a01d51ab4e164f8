//! Landing-directory copies.
//!
//! Files named by decoded messages are duplicated into a single flat landing
//! directory, preserving only the basename. Copies are best-effort: a failure
//! is logged and counted, never propagated to the connection.

use crate::logger::Logger;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Statistics for one dispatch round of copy operations.
#[derive(Debug, Default, Clone)]
pub struct CopyStats {
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub errors: Vec<String>,
}

impl CopyStats {
    pub fn add_file(&mut self, bytes: u64) {
        self.files_copied += 1;
        self.bytes_copied += bytes;
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }
}

/// Destination of a source file inside the landing directory: same basename,
/// source directory structure is not preserved.
pub fn landing_path(src: &Path, landing_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .with_context(|| format!("source has no file name: {}", src.display()))?;
    Ok(landing_dir.join(name))
}

/// Copy one referenced file into the landing directory, creating the
/// directory if missing. Returns bytes copied.
pub async fn copy_into_landing(
    src: &Path,
    landing_dir: &Path,
    logger: &dyn Logger,
) -> Result<u64> {
    let dst = landing_path(src, landing_dir)?;
    logger.start(src, &dst);

    let result = do_copy(src, landing_dir, &dst).await;
    match &result {
        Ok(bytes) => logger.copy_done(src, &dst, *bytes),
        Err(e) => logger.error("copy", src, &format!("{e:#}")),
    }
    result
}

async fn do_copy(src: &Path, landing_dir: &Path, dst: &Path) -> Result<u64> {
    match tokio::fs::metadata(src).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => bail!("source is not a regular file: {}", src.display()),
        Err(e) => {
            return Err(e).with_context(|| format!("source file does not exist: {}", src.display()))
        }
    }
    tokio::fs::create_dir_all(landing_dir)
        .await
        .with_context(|| format!("create landing dir {}", landing_dir.display()))?;
    tokio::fs::copy(src, dst)
        .await
        .with_context(|| format!("copy {} -> {}", src.display(), dst.display()))
}
