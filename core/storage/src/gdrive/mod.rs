//! Google Drive document provider for driveocr.
//!
//! This module provides:
//! - OAuth2 credentials with refresh and a loopback authorization handshake
//! - A single-slot token store on local disk
//! - A lock-guarded credential manager shared by all requests
//! - A Drive v3 client for upload-as-document, text export and deletion

pub mod auth;
pub mod authenticator;
pub mod client;
pub mod credential;
pub mod manager;
pub mod provider;
pub mod secrets;
pub mod token_store;

pub use auth::{AuthConfig, GoogleOAuth, OAuthProvider, DRIVE_SCOPE};
pub use authenticator::Authenticator;
pub use client::{DriveClient, DriveClientConfig, DriveFile};
pub use credential::Credential;
pub use manager::CredentialManager;
pub use provider::DriveDocumentService;
pub use secrets::{ClientSecrets, CredentialSource};
pub use token_store::TokenStore;
