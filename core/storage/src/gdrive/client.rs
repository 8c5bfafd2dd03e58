//! Google Drive API client.

use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use driveocr_common::{Error, Result};

use super::credential::Credential;
use crate::provider::ByteStream;

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Multipart boundary for metadata + media uploads.
const BOUNDARY: &str = "driveocr_boundary_7c1f3e";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    #[serde(default)]
    pub name: String,
    /// MIME type.
    #[serde(default)]
    pub mime_type: String,
}

/// HTTP behaviour of the client; remote timeouts are configured here.
#[derive(Debug, Clone)]
pub struct DriveClientConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for DriveClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("driveocr/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(config: DriveClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    /// Upload `data` as a new file whose stored type is `target_mime_type`.
    ///
    /// When the target is a Google Docs type, Drive converts the upload on
    /// the way in (for images this runs text recognition).
    pub async fn create_converted(
        &self,
        credential: &Credential,
        name: &str,
        target_mime_type: &str,
        media_mime_type: &str,
        data: &[u8],
    ) -> Result<DriveFile> {
        let url = format!("{}/files", DRIVE_UPLOAD_BASE);

        let metadata = serde_json::json!({
            "name": name,
            "mimeType": target_mime_type,
        });
        let body = multipart_related_body(&serde_json::to_vec(&metadata)?, media_mime_type, data);

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, credential.bearer())
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", BOUNDARY),
            )
            .query(&[("uploadType", "multipart"), ("fields", "id,name,mimeType")])
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload file: {}", e)))?;

        self.handle_response(response).await
    }

    /// Export a Google Docs file as `mime_type`, streamed.
    pub async fn export_stream(
        &self,
        credential: &Credential,
        file_id: &str,
        mime_type: &str,
    ) -> Result<ByteStream> {
        let url = format!("{}/files/{}/export", DRIVE_API_BASE, file_id);

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, credential.bearer())
            .query(&[("mimeType", mime_type)])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to start export: {}", e)))?;

        let response = self.check_status(response).await?;

        let stream = response
            .bytes_stream()
            .map(|result| result.map_err(|e| Error::Network(format!("Stream read error: {}", e))));

        Ok(Box::pin(stream))
    }

    /// Delete a file.
    pub async fn delete(&self, credential: &Credential, file_id: &str) -> Result<()> {
        let url = format!("{}/files/{}", DRIVE_API_BASE, file_id);

        let response = self
            .http
            .delete(&url)
            .header(header::AUTHORIZATION, credential.bearer())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to delete file: {}", e)))?;

        self.check_status(response).await.map(|_| ())
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        self.check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
    }

    /// Pass successful responses through, turn the rest into errors.
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = api_error_message(&body).unwrap_or(body);

        Err(match status {
            StatusCode::NOT_FOUND => Error::NotFound(format!("Resource not found: {}", message)),
            StatusCode::UNAUTHORIZED => {
                Error::Authentication(format!("Invalid or expired token: {}", message))
            }
            StatusCode::FORBIDDEN => Error::PermissionDenied(message),
            _ => Error::Network(format!("API error: {} - {}", status, message)),
        })
    }
}

/// Build a `multipart/related` body: JSON metadata part, then the media part.
fn multipart_related_body(metadata_json: &[u8], media_mime_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + metadata_json.len() + 256);

    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata_json);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", media_mime_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{}--", BOUNDARY).as_bytes());
    body
}

/// Google wraps errors as `{"error": {"message": ...}}`.
fn api_error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_str::<Envelope>(body)
        .ok()
        .map(|e| e.error.message)
}
