//! In-memory stand-ins for the remote services.
//!
//! Useful for testing and local development: `MemoryDocumentService`
//! behaves like the document provider with the uploaded bytes as the
//! "recognised" text, and `ScriptedOAuth` issues credentials without a
//! browser.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::stream;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use driveocr_common::{Error, Result};

use crate::gdrive::{ClientSecrets, Credential, OAuthProvider, DRIVE_SCOPE};
use crate::provider::{ByteStream, DocumentService, DocumentUpload, RemoteDocument};

/// Remote operation, for scripting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Export,
    Delete,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    name: String,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<String, StoredDocument>,
    /// (operation, document name) -> remaining failures and message
    failures: HashMap<(Operation, String), (usize, String)>,
    created: usize,
    deleted: usize,
    exported: HashSet<String>,
}

/// In-memory document service.
pub struct MemoryDocumentService {
    state: Mutex<State>,
    chunk_size: usize,
}

impl MemoryDocumentService {
    /// Create a new empty service.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            chunk_size: 4,
        }
    }

    /// Export streams are split into chunks of this many bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Make `operation` on documents named `name` fail with `message`, always.
    pub fn fail_on(&self, operation: Operation, name: &str, message: &str) {
        self.fail_times(operation, name, usize::MAX, message);
    }

    /// Make `operation` on documents named `name` fail `times` times.
    pub fn fail_times(&self, operation: Operation, name: &str, times: usize, message: &str) {
        self.lock()
            .failures
            .insert((operation, name.to_string()), (times, message.to_string()));
    }

    /// Documents currently stored remotely.
    pub fn document_count(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn created_count(&self) -> usize {
        self.lock().created
    }

    pub fn deleted_count(&self) -> usize {
        self.lock().deleted
    }

    /// Names of documents that were exported at least once.
    pub fn exported_names(&self) -> HashSet<String> {
        self.lock().exported.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_failure(state: &mut State, operation: Operation, name: &str) -> Result<()> {
        let key = (operation, name.to_string());
        if let Some((remaining, message)) = state.failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(Error::Network(message.clone()));
            }
        }
        Ok(())
    }

    fn check_credential(credential: &Credential) -> Result<()> {
        if credential.is_valid() {
            Ok(())
        } else {
            Err(Error::Authentication("Invalid or expired token".to_string()))
        }
    }
}

impl Default for MemoryDocumentService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentService for MemoryDocumentService {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_document(
        &self,
        credential: &Credential,
        upload: DocumentUpload,
    ) -> Result<RemoteDocument> {
        Self::check_credential(credential)?;
        let mut state = self.lock();
        Self::check_failure(&mut state, Operation::Create, &upload.name)?;

        let id = Uuid::new_v4().simple().to_string();
        state.documents.insert(
            id.clone(),
            StoredDocument {
                name: upload.name.clone(),
                data: upload.data,
            },
        );
        state.created += 1;

        Ok(RemoteDocument {
            id,
            name: upload.name,
        })
    }

    async fn export_text(&self, credential: &Credential, document_id: &str) -> Result<ByteStream> {
        Self::check_credential(credential)?;
        let mut state = self.lock();
        let document = state
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Document not found: {}", document_id)))?;
        Self::check_failure(&mut state, Operation::Export, &document.name)?;
        state.exported.insert(document.name.clone());

        let chunks: Vec<Result<Bytes>> = document
            .data
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn delete_document(&self, credential: &Credential, document_id: &str) -> Result<()> {
        Self::check_credential(credential)?;
        let mut state = self.lock();
        let name = state
            .documents
            .get(document_id)
            .map(|d| d.name.clone())
            .ok_or_else(|| Error::NotFound(format!("Document not found: {}", document_id)))?;
        Self::check_failure(&mut state, Operation::Delete, &name)?;

        state.documents.remove(document_id);
        state.deleted += 1;
        Ok(())
    }
}

/// OAuth provider that issues credentials without any network access.
pub struct ScriptedOAuth {
    authorize_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    fail_authorize: bool,
    fail_refresh: bool,
    delay: std::time::Duration,
}

impl ScriptedOAuth {
    pub fn new() -> Self {
        Self {
            authorize_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            fail_authorize: false,
            fail_refresh: false,
            delay: std::time::Duration::ZERO,
        }
    }

    pub fn with_failing_authorize(mut self) -> Self {
        self.fail_authorize = true;
        self
    }

    pub fn with_failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    /// Simulated latency for every call.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn issue(&self, serial: usize, client_id: &str, client_secret: &str, token_uri: &str) -> Credential {
        Credential {
            access_token: format!("scripted-access-{}", serial),
            refresh_token: Some(format!("scripted-refresh-{}", serial)),
            token_uri: token_uri.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scopes: vec![DRIVE_SCOPE.to_string()],
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }
}

impl Default for ScriptedOAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuthProvider for ScriptedOAuth {
    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let serial = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;

        if self.fail_refresh || !credential.can_refresh() {
            return Err(Error::Authentication("Token refresh failed: invalid_grant".to_string()));
        }

        Ok(self.issue(
            1000 + serial,
            &credential.client_id,
            &credential.client_secret,
            &credential.token_uri,
        ))
    }

    async fn authorize(&self, secrets: &ClientSecrets) -> Result<Credential> {
        let serial = self.authorize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;

        if self.fail_authorize {
            return Err(Error::Authentication("Authorization denied: access_denied".to_string()));
        }

        Ok(self.issue(
            serial,
            &secrets.client_id,
            &secrets.client_secret,
            &secrets.token_uri,
        ))
    }
}
