//! Process-wide credential shared by all requests.

use tokio::sync::Mutex;
use tracing::debug;

use driveocr_common::Result;

use super::authenticator::Authenticator;
use super::credential::Credential;

/// Lazily authenticates and caches the credential.
///
/// The whole check-and-authenticate runs under one lock, so concurrent
/// callers wait for a single refresh or handshake instead of racing.
pub struct CredentialManager {
    authenticator: Authenticator,
    current: Mutex<Option<Credential>>,
}

impl CredentialManager {
    pub fn new(authenticator: Authenticator) -> Self {
        Self {
            authenticator,
            current: Mutex::new(None),
        }
    }

    /// Get a valid credential, authenticating if necessary.
    ///
    /// # Errors
    /// - Whatever `Authenticator::authenticate` fails with
    pub async fn get(&self) -> Result<Credential> {
        let mut current = self.current.lock().await;

        if let Some(credential) = current.as_ref().filter(|c| c.is_valid()) {
            return Ok(credential.clone());
        }

        debug!("No valid cached credential, authenticating");
        let credential = self.authenticator.authenticate().await?;
        *current = Some(credential.clone());

        Ok(credential)
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }
}
