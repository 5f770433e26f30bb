use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::models::user::{SessionToken, User};

/// What survives a restart: the bearer token and the last known user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub token: SessionToken,
    pub user: User,
}

impl PersistedSession {
    fn is_valid(&self) -> bool {
        !self.token.is_blank() && !self.user.id.trim().is_empty()
    }
}

/// JSON file holding the persisted session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted session. Anything unreadable or malformed counts as
    /// "no session" and the offending file is removed.
    pub async fn load(&self) -> Option<PersistedSession> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to read session file: {e}");
                return None;
            }
        };

        match serde_json::from_slice::<PersistedSession>(&raw) {
            Ok(session) if session.is_valid() => Some(session),
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "discarding incomplete session file");
                self.discard().await;
                None
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "discarding malformed session file: {e}");
                self.discard().await;
                None
            }
        }
    }

    pub async fn save(&self, session: &PersistedSession) -> Result<(), ClientError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| ClientError::Protocol(format!("failed to encode session: {e}")))?;
        tokio::fs::write(&self.path, json).await?;
        restrict_permissions(&self.path).await;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn discard(&self) {
        if let Err(e) = self.clear().await {
            tracing::warn!(path = %self.path.display(), "failed to remove session file: {e}");
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) =
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
    {
        tracing::warn!(path = %path.display(), "failed to restrict session file permissions: {e}");
    }
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) {}
