//! File-copy side effects driven by decoded messages.

use crate::copy::{copy_into_landing, CopyStats};
use crate::decode::DecodedMessage;
use crate::logger::Logger;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which field of a `BlockTestComplete` a reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Primary,
    Secondary,
}

/// A file the fixture claims to have produced. Transient: extracted from a
/// decoded message and consumed immediately by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    pub source: PathBuf,
    pub kind: RefKind,
}

/// Collect every file reference carried by a decoded message, in document
/// order. Non-`TestResult` messages carry none.
pub fn file_references(msg: &DecodedMessage) -> Vec<FileReference> {
    let mut refs = Vec::new();
    if let DecodedMessage::TestResult(result) = msg {
        for block in &result.blocks {
            if let Some(path) = &block.path {
                refs.push(FileReference {
                    source: path.clone(),
                    kind: RefKind::Primary,
                });
            }
            if let Some(path) = &block.result_path {
                refs.push(FileReference {
                    source: path.clone(),
                    kind: RefKind::Secondary,
                });
            }
        }
    }
    refs
}

/// Copies files referenced by decoded messages into the landing directory.
#[derive(Clone)]
pub struct Dispatcher {
    landing_dir: PathBuf,
    logger: Arc<dyn Logger>,
}

impl Dispatcher {
    pub fn new(landing_dir: PathBuf, logger: Arc<dyn Logger>) -> Self {
        Dispatcher {
            landing_dir,
            logger,
        }
    }

    pub fn landing_dir(&self) -> &Path {
        &self.landing_dir
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    /// Copy every referenced file into the landing directory. One spawned
    /// task per reference, each `JoinHandle` serving as that copy's result
    /// channel. A failed copy is logged and counted; siblings proceed.
    pub async fn dispatch(&self, msg: &DecodedMessage) -> CopyStats {
        let mut tasks = Vec::new();
        for file_ref in file_references(msg) {
            let landing = self.landing_dir.clone();
            let logger = Arc::clone(&self.logger);
            let source = file_ref.source;
            tasks.push((
                source.clone(),
                tokio::spawn(async move {
                    copy_into_landing(&source, &landing, logger.as_ref()).await
                }),
            ));
        }

        let mut stats = CopyStats::default();
        for (source, task) in tasks {
            match task.await {
                Ok(Ok(bytes)) => stats.add_file(bytes),
                Ok(Err(e)) => stats.add_error(format!("{}: {e:#}", source.display())),
                Err(e) => stats.add_error(format!("copy task for {}: {e}", source.display())),
            }
        }
        stats
    }
}
