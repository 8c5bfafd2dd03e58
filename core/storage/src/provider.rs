//! Document service trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use driveocr_common::Result;

use crate::gdrive::Credential;

/// Target type that makes the provider run text recognition on upload.
pub const GOOGLE_DOCUMENT_MIME: &str = "application/vnd.google-apps.document";

/// Export format for recognised documents.
pub const TEXT_EXPORT_MIME: &str = "text/plain";

/// Byte stream type for export downloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Local content to upload as a new remote document.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    /// Name of the remote document.
    pub name: String,
    /// MIME type of `data` as sent to the provider.
    pub mime_type: String,
    /// File content.
    pub data: Vec<u8>,
}

/// A document created on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Provider-specific identifier.
    pub id: String,
    /// Document name.
    pub name: String,
}

/// Remote service that turns uploads into text-exportable documents.
///
/// Every operation acts on behalf of the given credential. Implementations
/// must not retry non-idempotent calls on their own.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Get the service name (e.g., "gdrive", "memory").
    fn name(&self) -> &str;

    /// Create a document from uploaded content, converting it to the
    /// provider's native document format.
    ///
    /// # Postconditions
    /// - A remote document exists until `delete_document` is called
    ///
    /// # Errors
    /// - Upload rejected (quota, unsupported content, permissions)
    /// - Network/authentication errors
    async fn create_document(
        &self,
        credential: &Credential,
        upload: DocumentUpload,
    ) -> Result<RemoteDocument>;

    /// Export a document as plain text.
    ///
    /// The returned stream is finite; callers drain it fully.
    async fn export_text(&self, credential: &Credential, document_id: &str) -> Result<ByteStream>;

    /// Delete a document.
    ///
    /// # Errors
    /// - Document not found
    /// - Network/authentication errors
    async fn delete_document(&self, credential: &Credential, document_id: &str) -> Result<()>;
}
