//! Batch orchestration over uploaded files.

use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{error, info};

use driveocr_common::{Error, Result, SafeFileName};
use driveocr_storage::{Credential, CredentialManager};

use crate::artifact::OutputArtifact;
use crate::pipeline::ConversionPipeline;

/// One uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Client-supplied name; empty names are skipped.
    pub filename: String,
    pub data: Bytes,
}

impl Submission {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Success,
    Error,
}

/// One line of the batch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Converted {
        filename: String,
        text: String,
        status: EntryStatus,
    },
    Failed {
        filename: String,
        error: String,
        status: EntryStatus,
    },
    /// Terminal entry naming the combined artifact.
    Output {
        output_file: String,
        status: EntryStatus,
    },
}

impl BatchEntry {
    fn converted(filename: &SafeFileName, text: String) -> Self {
        Self::Converted {
            filename: filename.to_string(),
            text,
            status: EntryStatus::Success,
        }
    }

    fn failed(filename: &SafeFileName, error: String) -> Self {
        Self::Failed {
            filename: filename.to_string(),
            error,
            status: EntryStatus::Error,
        }
    }

    pub fn status(&self) -> EntryStatus {
        match self {
            Self::Converted { status, .. }
            | Self::Failed { status, .. }
            | Self::Output { status, .. } => *status,
        }
    }
}

/// Ordered per-file outcomes followed by the artifact entry.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
    #[serde(skip)]
    pub output_path: PathBuf,
}

impl BatchResult {
    /// Per-file entries, in submission order.
    pub fn file_entries(&self) -> &[BatchEntry] {
        match self.entries.split_last() {
            Some((BatchEntry::Output { .. }, files)) => files,
            _ => &self.entries,
        }
    }

    /// Name of the combined artifact.
    pub fn output_file(&self) -> Option<&str> {
        match self.entries.last() {
            Some(BatchEntry::Output { output_file, .. }) => Some(output_file),
            _ => None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.file_entries()
            .iter()
            .filter(|e| matches!(e, BatchEntry::Converted { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.file_entries().len() - self.succeeded()
    }
}

/// Artifact name for a batch started at `started`.
pub fn output_file_name(started: DateTime<Local>) -> String {
    format!("ocr_results_{}.txt", started.format("%Y%m%d_%H%M%S"))
}

/// Runs batches of submissions through the conversion pipeline.
///
/// Files are processed one at a time in submission order. A failing file
/// yields an error entry and never stops the batch; only failing to obtain a
/// credential does.
pub struct BatchOrchestrator {
    pipeline: ConversionPipeline,
    credentials: Arc<CredentialManager>,
    work_dir: PathBuf,
}

impl BatchOrchestrator {
    /// `work_dir` holds temporary uploads and the output artifacts.
    pub fn new(
        pipeline: ConversionPipeline,
        credentials: Arc<CredentialManager>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pipeline,
            credentials,
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Run a batch stamped with the current local time.
    pub async fn run_batch(&self, files: Vec<Submission>) -> Result<BatchResult> {
        self.run_batch_at(files, Local::now()).await
    }

    /// Run a batch whose artifact is named after `started`.
    ///
    /// # Errors
    /// - No credential could be obtained; nothing is processed
    pub async fn run_batch_at(
        &self,
        files: Vec<Submission>,
        started: DateTime<Local>,
    ) -> Result<BatchResult> {
        let credential = self.credentials.get().await?;

        let output_file = output_file_name(started);
        let output_path = self.work_dir.join(&output_file);
        let mut artifact = OutputArtifact::create(&output_path).await;

        let mut entries = Vec::with_capacity(files.len() + 1);
        for submission in files {
            if submission.filename.is_empty() {
                continue;
            }

            let name = SafeFileName::sanitize_or_generate(&submission.filename);
            let entry = self
                .process(&name, &submission.data, &credential, &mut artifact)
                .await;
            entries.push(entry);
        }

        let status = if artifact.finish().await {
            EntryStatus::Success
        } else {
            EntryStatus::Error
        };
        entries.push(BatchEntry::Output {
            output_file,
            status,
        });

        let result = BatchResult {
            entries,
            output_path,
        };
        info!(
            succeeded = result.succeeded(),
            failed = result.failed(),
            output = %result.output_path.display(),
            "Batch complete"
        );

        Ok(result)
    }

    async fn process(
        &self,
        name: &SafeFileName,
        data: &[u8],
        credential: &Credential,
        artifact: &mut OutputArtifact,
    ) -> BatchEntry {
        match self.convert_upload(name, data, credential).await {
            Ok(text) => {
                artifact.append_section(name.as_str(), &text).await;
                info!(filename = %name, "Processed file");
                BatchEntry::converted(name, text)
            }
            Err(e) => {
                error!(filename = %name, "Error processing file: {}", e);
                BatchEntry::failed(name, e.message())
            }
        }
    }

    /// Stage the upload on disk and convert it. The staged copy is removed
    /// when `staged` drops, whatever the outcome.
    async fn convert_upload(
        &self,
        name: &SafeFileName,
        data: &[u8],
        credential: &Credential,
    ) -> Result<String> {
        let staged = self.stage(name).await?;

        tokio::fs::write(staged.path(), data).await?;

        self.pipeline
            .convert_as(staged.path(), name.as_str(), credential)
            .await
    }

    /// Create a unique, self-deleting file in the work directory.
    async fn stage(&self, name: &SafeFileName) -> Result<NamedTempFile> {
        let work_dir = self.work_dir.clone();
        let suffix = format!("_{}", name);

        let staged = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".upload_")
                .suffix(&suffix)
                .tempfile_in(&work_dir)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::retry::RetryConfig;
    use chrono::{Duration, TimeZone, Utc};
    use driveocr_storage::{
        Authenticator, CredentialSource, MemoryDocumentService, Operation, ScriptedOAuth,
        TokenStore,
    };

    struct Fixture {
        work_dir: tempfile::TempDir,
        _token_dir: tempfile::TempDir,
        service: Arc<MemoryDocumentService>,
        oauth: Arc<ScriptedOAuth>,
        orchestrator: BatchOrchestrator,
    }

    fn credential() -> Credential {
        Credential {
            access_token: "persisted".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec![],
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    /// Orchestrator over a memory service with a valid persisted token.
    async fn fixture() -> Fixture {
        let work_dir = tempfile::tempdir().unwrap();
        let token_dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(token_dir.path().join("token.json"));
        store.save(&credential()).await.unwrap();

        let oauth = Arc::new(ScriptedOAuth::new().with_failing_authorize());
        let credentials = Arc::new(CredentialManager::new(Authenticator::new(
            store,
            CredentialSource::default(),
            oauth.clone(),
        )));

        let service = Arc::new(MemoryDocumentService::new());
        let pipeline = ConversionPipeline::new(
            service.clone(),
            PipelineConfig {
                upload_mime_type: "image/jpeg".to_string(),
                delete_retry: RetryConfig::none(),
            },
        );
        let orchestrator = BatchOrchestrator::new(pipeline, credentials, work_dir.path());

        Fixture {
            work_dir,
            _token_dir: token_dir,
            service,
            oauth,
            orchestrator,
        }
    }

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    async fn dir_listing(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name(started()), "ocr_results_20240309_140507.txt");
    }

    #[tokio::test]
    async fn test_mixed_success_and_failure() {
        let f = fixture().await;
        f.service
            .fail_on(Operation::Create, "b.jpg", "quota exceeded");

        let result = f
            .orchestrator
            .run_batch_at(
                vec![
                    Submission::new("a.jpg", "Hello"),
                    Submission::new("b.jpg", "ignored"),
                ],
                started(),
            )
            .await
            .unwrap();

        assert_eq!(result.entries.len(), 3);
        assert_eq!(
            result.entries[0],
            BatchEntry::Converted {
                filename: "a.jpg".to_string(),
                text: "Hello".to_string(),
                status: EntryStatus::Success,
            }
        );
        assert_eq!(
            result.entries[1],
            BatchEntry::Failed {
                filename: "b.jpg".to_string(),
                error: "quota exceeded".to_string(),
                status: EntryStatus::Error,
            }
        );
        assert_eq!(
            result.entries[2],
            BatchEntry::Output {
                output_file: "ocr_results_20240309_140507.txt".to_string(),
                status: EntryStatus::Success,
            }
        );

        let content = tokio::fs::read_to_string(&result.output_path).await.unwrap();
        assert_eq!(content, "=== Text from a.jpg ===\nHello\n\n");
        assert_eq!(result.succeeded(), 1);
        assert_eq!(result.failed(), 1);
    }

    #[tokio::test]
    async fn test_summary_serialization() {
        let f = fixture().await;
        f.service
            .fail_on(Operation::Create, "b.jpg", "quota exceeded");

        let result = f
            .orchestrator
            .run_batch_at(
                vec![Submission::new("a.jpg", "Hello"), Submission::new("b.jpg", "x")],
                started(),
            )
            .await
            .unwrap();

        let json = serde_json::to_value(&result.entries).unwrap();
        assert_eq!(
            json[0],
            serde_json::json!({"filename": "a.jpg", "text": "Hello", "status": "success"})
        );
        assert_eq!(
            json[1],
            serde_json::json!({"filename": "b.jpg", "error": "quota exceeded", "status": "error"})
        );
        assert_eq!(
            json[2],
            serde_json::json!({"output_file": "ocr_results_20240309_140507.txt", "status": "success"})
        );
    }

    #[tokio::test]
    async fn test_only_empty_filenames() {
        let f = fixture().await;

        let result = f
            .orchestrator
            .run_batch_at(
                vec![Submission::new("", "data"), Submission::new("", "")],
                started(),
            )
            .await
            .unwrap();

        assert_eq!(
            result.entries,
            vec![BatchEntry::Output {
                output_file: "ocr_results_20240309_140507.txt".to_string(),
                status: EntryStatus::Success,
            }]
        );
        assert!(result.file_entries().is_empty());
        assert_eq!(tokio::fs::read(&result.output_path).await.unwrap().len(), 0);
        assert_eq!(f.service.created_count(), 0);
    }

    #[tokio::test]
    async fn test_order_preserved_and_sections_follow_it() {
        let f = fixture().await;
        f.service.fail_on(Operation::Export, "2.png", "export failed");

        let files = vec![
            Submission::new("3.png", "third"),
            Submission::new("", "skipped"),
            Submission::new("1.png", "first"),
            Submission::new("2.png", "second"),
            Submission::new("0.png", "zeroth"),
        ];
        let result = f.orchestrator.run_batch_at(files, started()).await.unwrap();

        let names: Vec<&str> = result
            .file_entries()
            .iter()
            .map(|e| match e {
                BatchEntry::Converted { filename, .. } | BatchEntry::Failed { filename, .. } => {
                    filename.as_str()
                }
                BatchEntry::Output { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["3.png", "1.png", "2.png", "0.png"]);

        let content = tokio::fs::read_to_string(&result.output_path).await.unwrap();
        assert_eq!(
            content,
            "=== Text from 3.png ===\nthird\n\n\
             === Text from 1.png ===\nfirst\n\n\
             === Text from 0.png ===\nzeroth\n\n"
        );
    }

    #[tokio::test]
    async fn test_no_temporary_files_survive() {
        let f = fixture().await;
        f.service.fail_on(Operation::Create, "bad.jpg", "rejected");
        f.service.fail_on(Operation::Export, "worse.jpg", "export failed");

        let result = f
            .orchestrator
            .run_batch_at(
                vec![
                    Submission::new("good.jpg", "ok"),
                    Submission::new("bad.jpg", "no"),
                    Submission::new("worse.jpg", "no"),
                ],
                started(),
            )
            .await
            .unwrap();

        assert_eq!(
            dir_listing(f.work_dir.path()).await,
            vec![result.output_file().unwrap().to_string()]
        );
        // Remote documents are gone too.
        assert_eq!(f.service.document_count(), 0);
    }

    #[tokio::test]
    async fn test_filenames_are_sanitized() {
        let f = fixture().await;

        let result = f
            .orchestrator
            .run_batch_at(
                vec![Submission::new("../../etc/my scan.jpg", "text")],
                started(),
            )
            .await
            .unwrap();

        match &result.entries[0] {
            BatchEntry::Converted { filename, .. } => assert_eq!(filename, "etc_my_scan.jpg"),
            other => panic!("unexpected entry: {:?}", other),
        }
        assert!(f.service.exported_names().contains("etc_my_scan.jpg"));
    }

    #[tokio::test]
    async fn test_persisted_credential_is_reused() {
        let f = fixture().await;

        f.orchestrator
            .run_batch_at(vec![Submission::new("a.jpg", "x")], started())
            .await
            .unwrap();
        f.orchestrator
            .run_batch_at(vec![Submission::new("b.jpg", "y")], started())
            .await
            .unwrap();

        assert_eq!(f.oauth.authorize_calls(), 0);
    }

    #[tokio::test]
    async fn test_credential_failure_aborts_batch() {
        let work_dir = tempfile::tempdir().unwrap();
        let token_dir = tempfile::tempdir().unwrap();
        let credentials = Arc::new(CredentialManager::new(Authenticator::new(
            TokenStore::new(token_dir.path().join("token.json")),
            CredentialSource::default(),
            Arc::new(ScriptedOAuth::new()),
        )));
        let service = Arc::new(MemoryDocumentService::new());
        let orchestrator = BatchOrchestrator::new(
            ConversionPipeline::new(service.clone(), PipelineConfig::default()),
            credentials,
            work_dir.path(),
        );

        let result = orchestrator
            .run_batch_at(vec![Submission::new("a.jpg", "x")], started())
            .await;

        assert!(result.is_err());
        assert_eq!(service.created_count(), 0);
        assert!(dir_listing(work_dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_work_dir_reports_errors() {
        let f = fixture().await;
        let gone = f.work_dir.path().join("gone");
        let orchestrator = BatchOrchestrator::new(
            ConversionPipeline::new(f.service.clone(), PipelineConfig::default()),
            f.orchestrator.credentials().clone(),
            &gone,
        );

        let result = orchestrator
            .run_batch_at(vec![Submission::new("a.jpg", "x")], started())
            .await
            .unwrap();

        assert!(matches!(result.entries[0], BatchEntry::Failed { .. }));
        assert_eq!(result.entries[1].status(), EntryStatus::Error);
    }
}
