//! Token store backends: a TOML file with 0600 permissions, and memory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use super::tokens::{Credential, PersistedSession, TokenStore};

/// On-disk layout of the session file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    session: PersistedSession,
    credential: Option<Credential>,
}

/// File-backed token store.
pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SessionFile> {
        if !self.path.exists() {
            return Ok(SessionFile::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(SessionFile::default());
        }
        toml::from_str(&content).context("Failed to parse session file")
    }

    fn write(&self, data: &SessionFile) -> Result<()> {
        write_private(&self.path, &toml::to_string_pretty(data).context("Failed to serialize session")?)?;
        tracing::debug!(path = %self.path.display(), "Session file written");
        Ok(())
    }

    async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut SessionFile),
    {
        let _guard = self.lock.lock().await;
        let mut data = self.read()?;
        f(&mut data);
        self.write(&data)
    }
}

/// Write `content` to `path` by way of a temporary sibling and a rename, so
/// readers only ever see the old or the new file.
pub(crate) fn write_private(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create data directory")?;
    }

    let tmp = path.with_extension("tmp");
    // A leftover from an interrupted write keeps its old mode; start fresh
    if tmp.exists() {
        fs::remove_file(&tmp).with_context(|| format!("Failed to remove {}", tmp.display()))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    // Owner-only from creation (file contains tokens)
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(&tmp)
        .with_context(|| format!("Failed to create {}", tmp.display()))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.sync_all())
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    drop(file);

    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<PersistedSession> {
        let _guard = self.lock.lock().await;
        Ok(self.read()?.session)
    }

    async fn save(&self, session: &PersistedSession) -> Result<()> {
        let session = session.clone();
        self.update(move |data| data.session = session).await
    }

    async fn credential(&self) -> Result<Option<Credential>> {
        let _guard = self.lock.lock().await;
        Ok(self.read()?.credential)
    }

    async fn set_credential(&self, credential: Credential) -> Result<()> {
        self.update(move |data| data.credential = Some(credential)).await
    }

    async fn clear_credential(&self) -> Result<()> {
        self.update(|data| data.credential = None).await
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// In-memory token store, for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    data: RwLock<SessionFile>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            data: RwLock::new(SessionFile {
                credential: Some(credential),
                ..SessionFile::default()
            }),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<PersistedSession> {
        Ok(self.data.read().await.session.clone())
    }

    async fn save(&self, session: &PersistedSession) -> Result<()> {
        self.data.write().await.session = session.clone();
        Ok(())
    }

    async fn credential(&self) -> Result<Option<Credential>> {
        Ok(self.data.read().await.credential.clone())
    }

    async fn set_credential(&self, credential: Credential) -> Result<()> {
        self.data.write().await.credential = Some(credential);
        Ok(())
    }

    async fn clear_credential(&self) -> Result<()> {
        self.data.write().await.credential = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().await.unwrap(), PersistedSession::default());
        assert!(store.credential().await.unwrap().is_none());

        store
            .set_credential(Credential::new("access".into(), Some(3600), None))
            .await
            .unwrap();
        assert_eq!(
            store.credential().await.unwrap().unwrap().access_token.token,
            "access"
        );

        store.clear_credential().await.unwrap();
        assert!(store.credential().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.toml");

        let store = FileTokenStore::new(&path);
        let session = PersistedSession::signed_in(User::new("u1", "a@x.com", Some("A".into())));
        store.save(&session).await.unwrap();
        store
            .set_credential(Credential::new("access".into(), Some(3600), Some("refresh".into())))
            .await
            .unwrap();

        let reopened = FileTokenStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), session);
        let credential = reopened.credential().await.unwrap().unwrap();
        assert_eq!(credential.access_token.token, "access");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh"));

        // Clearing the credential leaves the session projection alone
        reopened.clear_credential().await.unwrap();
        assert!(store.credential().await.unwrap().is_none());
        assert_eq!(store.load().await.unwrap(), session);
        assert!(!path.with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("session.toml"));
        store.save(&PersistedSession::default()).await.unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_temp_file_does_not_leak_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, "stale").unwrap();
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileTokenStore::new(&path);
        store
            .set_credential(Credential::new("access".into(), None, None))
            .await
            .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!tmp.exists());
        assert_eq!(
            store.credential().await.unwrap().unwrap().access_token.token,
            "access"
        );
    }

    #[tokio::test]
    async fn test_file_store_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        fs::write(&path, "").unwrap();

        let store = FileTokenStore::new(&path);
        assert_eq!(store.load().await.unwrap(), PersistedSession::default());
    }
}
