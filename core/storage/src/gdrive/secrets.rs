//! OAuth2 client definition ("client secrets") and where to find it.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use driveocr_common::{Error, Result};

use super::credential::GOOGLE_TOKEN_URI;

/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// OAuth2 client definition as downloaded from the Google Cloud console.
#[derive(Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// The console wraps the client under the application type.
#[derive(Deserialize)]
struct SecretsDocument {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse a client-secrets document.
    ///
    /// # Errors
    /// - `Error::Configuration` if the payload is not JSON or has no
    ///   `installed`/`web` client
    pub fn from_json(payload: &str) -> Result<Self> {
        let document: SecretsDocument = serde_json::from_str(payload)
            .map_err(|e| Error::Configuration(format!("Invalid client secrets: {}", e)))?;

        document.installed.or(document.web).ok_or_else(|| {
            Error::Configuration(
                "Client secrets must contain an 'installed' or 'web' client".to_string(),
            )
        })
    }
}

impl fmt::Debug for ClientSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Where the client definition comes from: a file, or an inline payload
/// supplied through configuration.
#[derive(Debug, Clone, Default)]
pub struct CredentialSource {
    path: Option<PathBuf>,
    inline: Option<String>,
}

impl CredentialSource {
    pub fn new(path: Option<PathBuf>, inline: Option<String>) -> Self {
        Self {
            path,
            inline: inline.filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(Some(path.into()), None)
    }

    pub fn from_inline(payload: impl Into<String>) -> Self {
        Self::new(None, Some(payload.into()))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Resolve to a parsed client definition.
    ///
    /// An inline payload wins when configured; otherwise the file must exist.
    ///
    /// # Errors
    /// - `Error::Configuration` when neither source resolves, or the chosen
    ///   one does not parse
    pub async fn resolve(&self) -> Result<ClientSecrets> {
        if let Some(inline) = &self.inline {
            return ClientSecrets::from_json(inline);
        }

        let path = self.path.as_ref().ok_or_else(|| {
            Error::Configuration("No client secrets file or inline payload configured".to_string())
        })?;

        let payload = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!(
                "Cannot read client secrets {}: {}",
                path.display(),
                e
            ))
        })?;

        ClientSecrets::from_json(&payload)
    }
}
