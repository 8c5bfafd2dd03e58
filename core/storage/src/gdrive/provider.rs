//! Google Drive implementation of `DocumentService`.

use async_trait::async_trait;
use tracing::debug;

use driveocr_common::Result;

use crate::provider::{
    ByteStream, DocumentService, DocumentUpload, RemoteDocument, GOOGLE_DOCUMENT_MIME,
    TEXT_EXPORT_MIME,
};

use super::client::{DriveClient, DriveClientConfig};
use super::credential::Credential;

/// Document service backed by Drive's import conversion.
///
/// Uploading with a Google Docs target type makes Drive run OCR on images;
/// exporting that document as `text/plain` yields the recognised text.
pub struct DriveDocumentService {
    client: DriveClient,
}

impl DriveDocumentService {
    pub fn new(config: DriveClientConfig) -> Result<Self> {
        Ok(Self {
            client: DriveClient::new(config)?,
        })
    }

    pub fn with_client(client: DriveClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentService for DriveDocumentService {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn create_document(
        &self,
        credential: &Credential,
        upload: DocumentUpload,
    ) -> Result<RemoteDocument> {
        let file = self
            .client
            .create_converted(
                credential,
                &upload.name,
                GOOGLE_DOCUMENT_MIME,
                &upload.mime_type,
                &upload.data,
            )
            .await?;

        debug!(document_id = %file.id, mime_type = %file.mime_type, "Created Drive document");

        Ok(RemoteDocument {
            id: file.id,
            name: if file.name.is_empty() { upload.name } else { file.name },
        })
    }

    async fn export_text(&self, credential: &Credential, document_id: &str) -> Result<ByteStream> {
        self.client
            .export_stream(credential, document_id, TEXT_EXPORT_MIME)
            .await
    }

    async fn delete_document(&self, credential: &Credential, document_id: &str) -> Result<()> {
        self.client.delete(credential, document_id).await
    }
}
