//! Obtaining a usable credential: reuse, refresh, or re-authorize.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use driveocr_common::Result;

use super::auth::OAuthProvider;
use super::credential::Credential;
use super::secrets::CredentialSource;
use super::token_store::TokenStore;

/// Drives the credential lifecycle.
///
/// 1. Load the persisted token.
/// 2. If it is expired but refreshable, refresh it once; a failed refresh
///    discards it.
/// 3. Without a usable token, resolve the client definition and run the
///    interactive handshake.
/// 4. Persist whatever new token was obtained. A failed save is logged only.
pub struct Authenticator {
    store: TokenStore,
    source: CredentialSource,
    oauth: Arc<dyn OAuthProvider>,
}

impl Authenticator {
    pub fn new(store: TokenStore, source: CredentialSource, oauth: Arc<dyn OAuthProvider>) -> Self {
        Self {
            store,
            source,
            oauth,
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Return a valid credential, authorizing interactively if nothing else works.
    ///
    /// # Errors
    /// - `Error::Configuration` if re-authorization is needed and no client
    ///   definition resolves
    /// - Any error from the interactive handshake
    pub async fn authenticate(&self) -> Result<Credential> {
        if let Some(stored) = self.store.load().await {
            if stored.is_valid() {
                debug!("Reusing persisted credential");
                return Ok(stored);
            }

            if stored.is_expired() && stored.can_refresh() {
                info!("Refreshing expired credential");
                match self.oauth.refresh(&stored).await {
                    Ok(refreshed) => {
                        self.persist(&refreshed).await;
                        return Ok(refreshed);
                    }
                    Err(e) => warn!("Error refreshing credentials: {}", e),
                }
            } else {
                debug!("Persisted credential is unusable and cannot be refreshed");
            }
        }

        let secrets = self.source.resolve().await?;

        info!("Please authenticate with your Google account");
        let credential = self.oauth.authorize(&secrets).await?;
        self.persist(&credential).await;

        Ok(credential)
    }

    async fn persist(&self, credential: &Credential) {
        match self.store.save(credential).await {
            Ok(()) => info!(path = %self.store.path().display(), "Credentials saved"),
            Err(e) => error!(path = %self.store.path().display(), "Error saving credentials: {}", e),
        }
    }
}
