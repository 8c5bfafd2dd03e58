//! Shared application state.

use std::path::Path;
use std::sync::Arc;

use driveocr_ocr::BatchOrchestrator;

/// Cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<BatchOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: BatchOrchestrator) -> Self {
        Self {
            inner: Arc::new(orchestrator),
        }
    }

    pub fn orchestrator(&self) -> &BatchOrchestrator {
        &self.inner
    }

    /// Directory holding output artifacts.
    pub fn upload_dir(&self) -> &Path {
        self.inner.work_dir()
    }
}
