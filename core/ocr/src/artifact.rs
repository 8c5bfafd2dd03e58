//! Combined text output of a batch.

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::error;

/// Write-once text file collecting every successful extraction.
///
/// Each section is a `=== Text from <name> ===` header line, the text, and a
/// blank line. Write failures are logged and remembered; they never abort
/// the batch.
pub struct OutputArtifact {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    sections: usize,
    failed: bool,
}

impl OutputArtifact {
    /// Create (or truncate) the artifact at `path`.
    pub async fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (writer, failed) = match File::create(&path).await {
            Ok(file) => (Some(BufWriter::new(file)), false),
            Err(e) => {
                error!(path = %path.display(), "Cannot create output file: {}", e);
                (None, true)
            }
        };

        Self {
            path,
            writer,
            sections: 0,
            failed,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sections written so far.
    pub fn sections(&self) -> usize {
        self.sections
    }

    /// Append one delimited section.
    pub async fn append_section(&mut self, name: &str, text: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        let section = format!("=== Text from {} ===\n{}\n\n", name, text);
        match writer.write_all(section.as_bytes()).await {
            Ok(()) => self.sections += 1,
            Err(e) => {
                error!(path = %self.path.display(), "Error writing output file: {}", e);
                self.writer = None;
                self.failed = true;
            }
        }
    }

    /// Flush and close. Returns whether every write made it to disk.
    pub async fn finish(mut self) -> bool {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                error!(path = %self.path.display(), "Error flushing output file: {}", e);
                self.failed = true;
            }
        }
        !self.failed
    }
}
