//! Single-slot persisted token.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use driveocr_common::Result;

use super::credential::Credential;

/// Durable home of the last-known credential.
///
/// Reads fail soft: a missing, unreadable or corrupt record loads as `None`.
/// Writes go to a sibling temporary file that is then renamed over the record,
/// so readers see either the old or the new token, never a torn one.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted credential, if any.
    pub async fn load(&self) -> Option<Credential> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted token");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Error loading credentials: {}", e);
                return None;
            }
        };

        match serde_json::from_slice::<Credential>(&bytes) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!(path = %self.path.display(), "Ignoring corrupt token file: {}", e);
                None
            }
        }
    }

    /// Persist `credential`, replacing any previous record.
    ///
    /// # Errors
    /// - I/O errors creating the directory, writing or renaming
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec_pretty(credential)?;
        let tmp = self.temp_path();

        fs::write(&tmp, &data).await?;
        restrict_permissions(&tmp).await;

        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), "Token saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await {
        warn!(path = %path.display(), "Could not restrict token permissions: {}", e);
    }
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdrive::credential::GOOGLE_TOKEN_URI;
    use chrono::{Duration, Utc};

    fn credential(access_token: &str) -> Credential {
        Credential {
            access_token: access_token.to_string(),
            refresh_token: Some("refresh".to_string()),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec!["https://www.googleapis.com/auth/drive".to_string()],
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, b"\x80\x03pickle garbage").await.unwrap();

        let store = TokenStore::new(&path);
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_load_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("token.json"));

        store.save(&credential("first")).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.access_token, "first");
        assert!(loaded.is_valid());
    }

    #[tokio::test]
    async fn test_save_overwrites_single_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));

        store.save(&credential("first")).await.unwrap();
        store.save(&credential("second")).await.unwrap();

        assert_eq!(store.load().await.unwrap().access_token, "second");

        // Only the record itself is left behind.
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["token.json".to_string()]);
    }

    #[tokio::test]
    async fn test_save_into_unwritable_location_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").await.unwrap();

        // Parent is a regular file, so the directory cannot be created.
        let store = TokenStore::new(blocker.join("token.json"));
        assert!(store.save(&credential("x")).await.is_err());
    }
}
