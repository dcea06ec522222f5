//! Versioned encrypted file operations.
//!
//! Authorization here is collaborator-set membership; the router has already
//! established *who* is calling. Ciphertext and signatures are opaque: the
//! server never verifies a file signature itself, since only the client holds
//! the trust anchor to do that.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use coffer_shared::protocol::{Collaborator, DownloadResponse, UploadRequest};
use coffer_store::Database;

use crate::error::ServerError;
use crate::vault::FileVault;

pub struct FileService {
    db: Arc<Mutex<Database>>,
    vault: Arc<FileVault>,
}

impl FileService {
    pub fn new(db: Arc<Mutex<Database>>, vault: Arc<FileVault>) -> Self {
        Self { db, vault }
    }

    /// Store a new ciphertext version.
    ///
    /// The record is resolved by `(declared owner, name)`. A first write
    /// creates it at version 1 with the caller as owner, modifier and sole
    /// collaborator. An overwrite requires collaborator membership and bumps
    /// the version by exactly 1, unless the incoming signature equals the
    /// stored one: then the write is a replayed duplicate (client retry or
    /// replication echo) and the current version is returned unchanged.
    pub async fn upload(&self, caller: i64, req: &UploadRequest) -> Result<i64, ServerError> {
        FileVault::validate_name(&req.name)?;

        let mut db = self.db.lock().await;
        let owner = db
            .user_by_username(&req.owner)
            .map_err(|_| ServerError::NotFound(format!("Unknown owner '{}'", req.owner)))?;

        match db.file_by_owner_and_name(owner.id, &req.name)? {
            None => {
                // First write: the declared owner must be the caller itself.
                if owner.id != caller {
                    return Err(ServerError::NotFound(
                        "You do not have access to this file".to_string(),
                    ));
                }
                let relative = FileVault::relative_path(owner.id, &req.name);
                let record = db.create_file(caller, &req.name, &relative, &req.signature)?;
                drop(db);

                self.vault.store(&relative, &req.ciphertext).await?;
                info!(name = %req.name, owner = %req.owner, "created file at version 1");
                Ok(record.version)
            }
            Some(file) => {
                if !db.is_collaborator(file.id, caller)? {
                    return Err(ServerError::Forbidden(
                        "You do not have access to this file".to_string(),
                    ));
                }
                if file.signature == req.signature {
                    debug!(name = %req.name, version = file.version, "duplicate upload ignored");
                    return Ok(file.version);
                }
                let version = db.update_file(file.id, &req.signature, caller)?;
                drop(db);

                self.vault.store(&file.path, &req.ciphertext).await?;
                info!(name = %req.name, version, "accepted file overwrite");
                Ok(version)
            }
        }
    }

    /// Return the stored ciphertext with the metadata a client needs to
    /// verify and decrypt it: the last modifier's certificate and username
    /// (the IV source), the version and the owner.
    pub async fn download(&self, caller: i64, name: &str) -> Result<DownloadResponse, ServerError> {
        FileVault::validate_name(name)?;

        let (file, modifier, owner) = {
            let db = self.db.lock().await;
            let file = db.file_for_collaborator(name, caller)?.ok_or_else(|| {
                ServerError::NotFound("You do not have access to this file".to_string())
            })?;
            let modifier = db.user_by_id(file.modifier_id)?;
            let owner = db.user_by_id(file.owner_id)?;
            (file, modifier, owner)
        };

        let ciphertext = self.vault.read(&file.path).await?;

        Ok(DownloadResponse {
            ciphertext,
            signature: file.signature,
            modifier_certificate_pem: modifier.certificate_pem,
            last_modifier: modifier.username,
            version: file.version,
            owner: owner.username,
        })
    }

    /// Fetch another identity's public-key credential.
    pub async fn share(&self, username: &str) -> Result<String, ServerError> {
        let user = self
            .db
            .lock()
            .await
            .user_by_username(username)
            .map_err(|_| ServerError::NotFound(format!("Unknown user '{username}'")))?;
        Ok(user.certificate_pem)
    }

    /// Revoke a collaborator and rotate the share.
    ///
    /// Owner-only. Returns the collaborators that remain entitled (owner and
    /// target excluded) with their certificates, then resets the set to the
    /// owner alone: the removed user held the file key, so the caller must
    /// re-key and re-invite everyone returned here.
    pub async fn remove(
        &self,
        caller: i64,
        target_username: &str,
        file_name: &str,
    ) -> Result<Vec<Collaborator>, ServerError> {
        FileVault::validate_name(file_name)?;

        let mut db = self.db.lock().await;
        let file = db
            .file_for_collaborator(file_name, caller)?
            .filter(|f| f.owner_id == caller)
            .ok_or_else(|| ServerError::Forbidden("You do not own this file".to_string()))?;

        let target = db
            .user_by_username(target_username)
            .map_err(|_| ServerError::NotFound(format!("Unknown user '{target_username}'")))?;

        if !db.is_collaborator(file.id, target.id)? {
            return Err(ServerError::NotFound(
                "User does not have access to this file".to_string(),
            ));
        }

        let remaining: Vec<Collaborator> = db
            .collaborators(file.id)?
            .into_iter()
            .filter(|u| u.id != caller && u.id != target.id)
            .map(|u| Collaborator {
                username: u.username,
                certificate_pem: u.certificate_pem,
            })
            .collect();

        db.reset_collaborators(file.id, caller)?;

        info!(
            file = %file_name,
            removed = %target_username,
            remaining = remaining.len(),
            "revoked collaborator, share must be re-keyed"
        );
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_store::StoreError;

    async fn service() -> (FileService, Arc<Mutex<Database>>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let vault = Arc::new(FileVault::new(dir.path().to_path_buf()).await.unwrap());
        (FileService::new(db.clone(), vault), db, dir)
    }

    async fn add_user(db: &Arc<Mutex<Database>>, name: &str) -> i64 {
        db.lock().await.create_user(name, "PEM").unwrap().id
    }

    fn upload_req(name: &str, owner: &str, sig: &[u8]) -> UploadRequest {
        UploadRequest {
            name: name.to_string(),
            ciphertext: format!("ct-{}", String::from_utf8_lossy(sig)).into_bytes(),
            signature: sig.to_vec(),
            owner: owner.to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_upload_then_overwrites() {
        let (service, db, _dir) = service().await;
        let alice = add_user(&db, "alice").await;

        let v1 = service
            .upload(alice, &upload_req("r.aes", "alice", b"sig-1"))
            .await
            .unwrap();
        assert_eq!(v1, 1);

        let v2 = service
            .upload(alice, &upload_req("r.aes", "alice", b"sig-2"))
            .await
            .unwrap();
        assert_eq!(v2, 2);

        let resp = service.download(alice, "r.aes").await.unwrap();
        assert_eq!(resp.version, 2);
        assert_eq!(resp.signature, b"sig-2");
        assert_eq!(resp.ciphertext, b"ct-sig-2");
        assert_eq!(resp.owner, "alice");
        assert_eq!(resp.last_modifier, "alice");
    }

    #[tokio::test]
    async fn test_replayed_upload_does_not_increment() {
        let (service, db, _dir) = service().await;
        let alice = add_user(&db, "alice").await;

        let req = upload_req("r.aes", "alice", b"sig-1");
        assert_eq!(service.upload(alice, &req).await.unwrap(), 1);
        // Same payload again, as a retried call would send it.
        assert_eq!(service.upload(alice, &req).await.unwrap(), 1);

        let resp = service.download(alice, "r.aes").await.unwrap();
        assert_eq!(resp.version, 1);
    }

    #[tokio::test]
    async fn test_non_collaborator_cannot_upload_or_download() {
        let (service, db, _dir) = service().await;
        let alice = add_user(&db, "alice").await;
        let bob = add_user(&db, "bob").await;

        service
            .upload(alice, &upload_req("r.aes", "alice", b"sig-1"))
            .await
            .unwrap();

        let err = service
            .upload(bob, &upload_req("r.aes", "alice", b"sig-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        let err = service.download(bob, "r.aes").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_collaborator_overwrite_tracks_modifier() {
        let (service, db, _dir) = service().await;
        let alice = add_user(&db, "alice").await;
        let bob = add_user(&db, "bob").await;

        service
            .upload(alice, &upload_req("r.aes", "alice", b"sig-1"))
            .await
            .unwrap();
        {
            let db = db.lock().await;
            let file = db.file_for_collaborator("r.aes", alice).unwrap().unwrap();
            db.add_collaborator(file.id, bob).unwrap();
        }

        let v2 = service
            .upload(bob, &upload_req("r.aes", "alice", b"sig-2"))
            .await
            .unwrap();
        assert_eq!(v2, 2);

        let resp = service.download(alice, "r.aes").await.unwrap();
        assert_eq!(resp.last_modifier, "bob");
        assert_eq!(resp.owner, "alice");
    }

    #[tokio::test]
    async fn test_remove_returns_remaining_and_resets() {
        let (service, db, _dir) = service().await;
        let alice = add_user(&db, "alice").await;
        let bob = add_user(&db, "bob").await;
        let carol = add_user(&db, "carol").await;

        service
            .upload(alice, &upload_req("r.aes", "alice", b"sig-1"))
            .await
            .unwrap();
        let file_id = {
            let db = db.lock().await;
            let file = db.file_for_collaborator("r.aes", alice).unwrap().unwrap();
            db.add_collaborator(file.id, bob).unwrap();
            db.add_collaborator(file.id, carol).unwrap();
            file.id
        };

        let remaining = service.remove(alice, "bob", "r.aes").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].username, "carol");

        let db = db.lock().await;
        assert!(db.is_collaborator(file_id, alice).unwrap());
        assert!(!db.is_collaborator(file_id, bob).unwrap());
        assert!(!db.is_collaborator(file_id, carol).unwrap());
    }

    #[tokio::test]
    async fn test_remove_is_owner_only() {
        let (service, db, _dir) = service().await;
        let alice = add_user(&db, "alice").await;
        let bob = add_user(&db, "bob").await;

        service
            .upload(alice, &upload_req("r.aes", "alice", b"sig-1"))
            .await
            .unwrap();
        {
            let db = db.lock().await;
            let file = db.file_for_collaborator("r.aes", alice).unwrap().unwrap();
            db.add_collaborator(file.id, bob).unwrap();
        }

        let err = service.remove(bob, "alice", "r.aes").await.unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_share_returns_certificate() {
        let (service, db, _dir) = service().await;
        add_user(&db, "alice").await;

        assert_eq!(service.share("alice").await.unwrap(), "PEM");
        assert!(matches!(
            service.share("ghost").await.unwrap_err(),
            ServerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_traversal_names_rejected() {
        let (service, db, _dir) = service().await;
        let alice = add_user(&db, "alice").await;

        let err = service
            .upload(alice, &upload_req("../escape.aes", "alice", b"sig"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    // StoreError is part of this module's contract surface via From.
    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            ServerError::from(StoreError::UsernameTaken),
            ServerError::DuplicateIdentity
        ));
        assert!(matches!(
            ServerError::from(StoreError::DuplicateInvite),
            ServerError::DuplicateInvite
        ));
    }
}
