use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::error::ServerError;

/// Resolve a vault-relative path, refusing anything that could step outside
/// the base directory. The paths this crate builds are plain
/// `users/<id>/<name>` strings, so every component must be `Normal`.
fn ensure_within(base: &Path, relative: &str) -> Result<PathBuf, ServerError> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            _ => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
        }
    }
    Ok(resolved)
}

/// Ciphertext store under `<data_dir>/users/<owner_id>/<name>`. Bytes are
/// kept exactly as received; the server never decrypts or inspects them.
#[derive(Debug, Clone)]
pub struct FileVault {
    base_path: PathBuf,
}

impl FileVault {
    pub async fn new(base_path: PathBuf) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Internal(format!(
                "Failed to create vault directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Vault initialized");

        Ok(Self { base_path })
    }

    /// Reject file names that could escape a user's vault directory.
    pub fn validate_name(name: &str) -> Result<(), ServerError> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return Err(ServerError::BadRequest(format!(
                "Invalid file name: '{name}'"
            )));
        }
        Ok(())
    }

    /// Vault-relative storage path for an owner's file. This string is what
    /// gets persisted in the file record.
    pub fn relative_path(owner_id: i64, name: &str) -> String {
        format!("users/{owner_id}/{name}")
    }

    /// Create an identity's vault directory (done at registration).
    pub async fn ensure_user_dir(&self, user_id: i64) -> Result<(), ServerError> {
        let dir = self.base_path.join("users").join(user_id.to_string());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to create user dir: {e}")))?;
        Ok(())
    }

    /// Overwrite the ciphertext at a vault-relative path.
    pub async fn store(&self, relative: &str, data: &[u8]) -> Result<(), ServerError> {
        let path = self.safe_path(relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ServerError::Internal(format!("Failed to create dir: {e}")))?;
        }

        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to write '{relative}': {e}")))?;

        debug!(path = %relative, size = data.len(), "Stored ciphertext");
        Ok(())
    }

    /// Read the ciphertext at a vault-relative path.
    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_path(relative)?;

        if !path.exists() {
            return Err(ServerError::NotFound(format!(
                "No stored content at '{relative}'"
            )));
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to read '{relative}': {e}")))?;

        debug!(path = %relative, size = data.len(), "Read ciphertext");
        Ok(data)
    }

    fn safe_path(&self, relative: &str) -> Result<PathBuf, ServerError> {
        ensure_within(&self.base_path, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_vault() -> (FileVault, TempDir) {
        let dir = TempDir::new().unwrap();
        let vault = FileVault::new(dir.path().to_path_buf()).await.unwrap();
        (vault, dir)
    }

    #[tokio::test]
    async fn test_store_and_read() {
        let (vault, _dir) = test_vault().await;
        let rel = FileVault::relative_path(1, "report.txt.aes");

        vault.store(&rel, b"ciphertext-bytes").await.unwrap();
        let data = vault.read(&rel).await.unwrap();
        assert_eq!(data, b"ciphertext-bytes");
    }

    #[tokio::test]
    async fn test_overwrite_replaces() {
        let (vault, _dir) = test_vault().await;
        let rel = FileVault::relative_path(1, "doc.aes");

        vault.store(&rel, b"v1").await.unwrap();
        vault.store(&rel, b"v2").await.unwrap();
        assert_eq!(vault.read(&rel).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_missing_file_not_found() {
        let (vault, _dir) = test_vault().await;
        assert!(vault.read("users/1/ghost.aes").await.is_err());
    }

    #[test]
    fn test_validate_name_rejects_traversal() {
        assert!(FileVault::validate_name("report.txt.aes").is_ok());
        assert!(FileVault::validate_name("../etc/passwd").is_err());
        assert!(FileVault::validate_name("a/b").is_err());
        assert!(FileVault::validate_name("a\\b").is_err());
        assert!(FileVault::validate_name("").is_err());
    }
}
