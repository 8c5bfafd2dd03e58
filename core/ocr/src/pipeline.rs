//! Single-file conversion: upload as document, export as text, clean up.

use futures::TryStreamExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use driveocr_common::{Error, Result};
use driveocr_storage::{Credential, DocumentService, DocumentUpload, RemoteDocument};

use crate::retry::{RetryConfig, RetryExecutor};

/// Per-deployment pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// MIME type sent with every upload. Content is not sniffed locally.
    pub upload_mime_type: String,
    /// Retry policy for deleting the temporary remote document.
    pub delete_retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_mime_type: "image/jpeg".to_string(),
            delete_retry: RetryConfig::default(),
        }
    }
}

/// Converts local files to text through a `DocumentService`.
pub struct ConversionPipeline {
    service: Arc<dyn DocumentService>,
    config: PipelineConfig,
}

impl ConversionPipeline {
    pub fn new(service: Arc<dyn DocumentService>, config: PipelineConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Convert the file at `path`, naming the remote document after the file.
    pub async fn convert(&self, path: &Path, credential: &Credential) -> Result<String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", path.display())))?;

        self.convert_as(path, &name, credential).await
    }

    /// Convert the file at `path`, naming the remote document `name`.
    ///
    /// # Postconditions
    /// - The remote document, if one was created, has been deleted or its
    ///   deletion failure logged
    ///
    /// # Errors
    /// - Local read failure
    /// - Upload or export failure
    /// - Export that is not UTF-8
    pub async fn convert_as(&self, path: &Path, name: &str, credential: &Credential) -> Result<String> {
        let data = tokio::fs::read(path).await?;

        info!(file = %path.display(), bytes = data.len(), "Uploading and processing");

        let document = self
            .service
            .create_document(
                credential,
                DocumentUpload {
                    name: name.to_string(),
                    mime_type: self.config.upload_mime_type.clone(),
                    data,
                },
            )
            .await?;

        let text = self.export(credential, &document).await;
        self.cleanup(credential, &document).await;

        text
    }

    async fn export(&self, credential: &Credential, document: &RemoteDocument) -> Result<String> {
        let bytes = self
            .service
            .export_text(credential, &document.id)
            .await?
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;

        decode_text(bytes)
    }

    /// Delete the remote document. Failures never fail the conversion.
    async fn cleanup(&self, credential: &Credential, document: &RemoteDocument) {
        let executor = RetryExecutor::new(self.config.delete_retry.clone());

        match executor
            .execute(|| self.service.delete_document(credential, &document.id))
            .await
        {
            Ok(()) => debug!(document_id = %document.id, "Remote document deleted"),
            Err(Error::NotFound(_)) => {
                debug!(document_id = %document.id, "Remote document already gone")
            }
            Err(e) => warn!(
                document_id = %document.id,
                name = %document.name,
                "Failed to delete remote document: {}",
                e
            ),
        }
    }
}

/// Drive prefixes text exports with a byte-order mark.
fn decode_text(bytes: Vec<u8>) -> Result<String> {
    let text = String::from_utf8(bytes)
        .map_err(|e| Error::Conversion(format!("Exported text is not valid UTF-8: {}", e)))?;

    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use driveocr_storage::{MemoryDocumentService, Operation};
    use std::path::PathBuf;

    fn credential() -> Credential {
        Credential {
            access_token: "access".to_string(),
            refresh_token: None,
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec![],
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    fn pipeline(service: Arc<MemoryDocumentService>) -> ConversionPipeline {
        ConversionPipeline::new(
            service,
            PipelineConfig {
                upload_mime_type: "image/png".to_string(),
                delete_retry: RetryConfig::new(2)
                    .with_initial_delay(std::time::Duration::from_millis(1))
                    .with_jitter(false),
            },
        )
    }

    async fn write_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, data).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_convert_returns_text_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "scan.png", "Hello, Welt ✓".as_bytes()).await;
        let service = Arc::new(MemoryDocumentService::new().with_chunk_size(2));

        let text = pipeline(service.clone())
            .convert(&path, &credential())
            .await
            .unwrap();

        assert_eq!(text, "Hello, Welt ✓");
        assert_eq!(service.created_count(), 1);
        assert_eq!(service.document_count(), 0);
        assert!(service.exported_names().contains("scan.png"));
    }

    #[tokio::test]
    async fn test_upload_failure_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "b.jpg", b"data").await;
        let service = Arc::new(MemoryDocumentService::new());
        service.fail_on(Operation::Create, "b.jpg", "quota exceeded");

        let err = pipeline(service.clone())
            .convert(&path, &credential())
            .await
            .unwrap_err();

        assert_eq!(err.message(), "quota exceeded");
        assert_eq!(service.created_count(), 0);
        assert_eq!(service.deleted_count(), 0);
    }

    #[tokio::test]
    async fn test_export_failure_still_deletes_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "c.jpg", b"data").await;
        let service = Arc::new(MemoryDocumentService::new());
        service.fail_on(Operation::Export, "c.jpg", "export failed");

        let result = pipeline(service.clone()).convert(&path, &credential()).await;

        assert!(result.is_err());
        assert_eq!(service.created_count(), 1);
        assert_eq!(service.document_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_fail_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "d.jpg", b"kept").await;
        let service = Arc::new(MemoryDocumentService::new());
        service.fail_on(Operation::Delete, "d.jpg", "backend error");

        let text = pipeline(service.clone())
            .convert(&path, &credential())
            .await
            .unwrap();

        assert_eq!(text, "kept");
        // Orphaned, but reported as success.
        assert_eq!(service.document_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_delete_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "e.jpg", b"x").await;
        let service = Arc::new(MemoryDocumentService::new());
        service.fail_times(Operation::Delete, "e.jpg", 2, "503 backend");

        pipeline(service.clone())
            .convert(&path, &credential())
            .await
            .unwrap();

        assert_eq!(service.document_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_utf8_export_is_error_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "f.jpg", &[0xff, 0xfe, 0x00]).await;
        let service = Arc::new(MemoryDocumentService::new());

        let result = pipeline(service.clone()).convert(&path, &credential()).await;

        assert!(matches!(result, Err(Error::Conversion(_))));
        assert_eq!(service.document_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_byte_file_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.jpg", b"").await;
        let service = Arc::new(MemoryDocumentService::new());

        let text = pipeline(service.clone())
            .convert(&path, &credential())
            .await
            .unwrap();

        assert_eq!(text, "");
        assert_eq!(service.created_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let service = Arc::new(MemoryDocumentService::new());
        let result = pipeline(service.clone())
            .convert(Path::new("/nonexistent/scan.jpg"), &credential())
            .await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(service.created_count(), 0);
    }

    #[tokio::test]
    async fn test_convert_as_uses_given_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, ".upload_123", b"x").await;
        let service = Arc::new(MemoryDocumentService::new());

        pipeline(service.clone())
            .convert_as(&path, "receipt.jpg", &credential())
            .await
            .unwrap();

        assert!(service.exported_names().contains("receipt.jpg"));
    }

    #[test]
    fn test_decode_strips_bom() {
        let mut bytes = "\u{feff}Line one\r\nLine two".as_bytes().to_vec();
        assert_eq!(decode_text(bytes.clone()).unwrap(), "Line one\r\nLine two");

        bytes.drain(..3);
        assert_eq!(decode_text(bytes).unwrap(), "Line one\r\nLine two");
    }
}
