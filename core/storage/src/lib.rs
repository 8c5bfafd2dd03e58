//! Remote document storage for driveocr.
//!
//! This crate holds everything that talks to the cloud document provider:
//! the `DocumentService` seam used by the conversion pipeline, the Google
//! Drive implementation of it, and the OAuth2 credential lifecycle
//! (persisted token, refresh, interactive re-authorization).
//!
//! # Design Principles
//! - Provider isolation: the pipeline only sees `DocumentService`
//! - One credential per process: `CredentialManager` serializes authentication
//! - Soft token storage: a missing or corrupt token is "no credential", never fatal

pub mod gdrive;
pub mod memory;
pub mod provider;

pub use gdrive::{
    Authenticator, ClientSecrets, Credential, CredentialManager, CredentialSource,
    DriveClient, DriveClientConfig, DriveDocumentService, GoogleOAuth, OAuthProvider,
    TokenStore,
};
pub use memory::{MemoryDocumentService, Operation, ScriptedOAuth};
pub use provider::{ByteStream, DocumentService, DocumentUpload, RemoteDocument};
