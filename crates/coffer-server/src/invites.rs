//! Key-sharing invites.
//!
//! The owner wraps the file key under the invitee's certificate client-side;
//! the server only stores and releases the opaque wrapped blob. Accepting an
//! invite consumes it and promotes the invitee into the file's collaborator
//! set, idempotently, so membership stays the single authorization rule.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use coffer_store::Database;

use crate::error::ServerError;

pub struct InviteService {
    db: Arc<Mutex<Database>>,
}

impl InviteService {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Store an invite for a non-collaborator. Owner-only.
    pub async fn invite(
        &self,
        caller: i64,
        invitee_username: &str,
        file_name: &str,
        wrapped_key: &[u8],
    ) -> Result<(), ServerError> {
        let db = self.db.lock().await;

        let file = db
            .file_for_collaborator(file_name, caller)?
            .filter(|f| f.owner_id == caller)
            .ok_or_else(|| ServerError::Forbidden("You do not own this file".to_string()))?;

        let invitee = db
            .user_by_username(invitee_username)
            .map_err(|_| ServerError::NotFound(format!("Unknown user '{invitee_username}'")))?;

        if db.is_collaborator(file.id, invitee.id)? {
            return Err(ServerError::AlreadyCollaborator);
        }

        db.create_invite(invitee.id, file.id, wrapped_key)?;
        info!(file = %file_name, invitee = %invitee_username, "stored invite");
        Ok(())
    }

    /// Consume the caller's pending invite for a file and return the wrapped
    /// key stored with it.
    pub async fn accept(&self, caller: i64, file_name: &str) -> Result<Vec<u8>, ServerError> {
        let db = self.db.lock().await;

        let invite = db.pending_invite(caller, file_name)?.ok_or_else(|| {
            ServerError::NotFound("You have not been invited to edit this file".to_string())
        })?;

        db.mark_accepted(invite.id)?;
        db.add_collaborator(invite.file_id, caller)?;

        info!(file = %file_name, invitee = caller, "invite accepted");
        Ok(invite.wrapped_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (InviteService, Arc<Mutex<Database>>, i64, i64) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let (alice, bob) = {
            let mut guard = db.lock().await;
            let alice = guard.create_user("alice", "PEM-A").unwrap().id;
            let bob = guard.create_user("bob", "PEM-B").unwrap().id;
            guard
                .create_file(alice, "r.aes", "users/1/r.aes", b"sig")
                .unwrap();
            (alice, bob)
        };
        (InviteService::new(db.clone()), db, alice, bob)
    }

    #[tokio::test]
    async fn test_invite_then_accept_returns_wrapped_key() {
        let (service, db, alice, bob) = setup().await;

        service
            .invite(alice, "bob", "r.aes", b"wrapped-key-bytes")
            .await
            .unwrap();

        let wrapped = service.accept(bob, "r.aes").await.unwrap();
        assert_eq!(wrapped, b"wrapped-key-bytes");

        // Accepting promoted bob into the collaborator set.
        let guard = db.lock().await;
        let file = guard.file_for_collaborator("r.aes", bob).unwrap().unwrap();
        assert!(guard.is_collaborator(file.id, bob).unwrap());
    }

    #[tokio::test]
    async fn test_accept_without_invite_fails() {
        let (service, _db, _alice, bob) = setup().await;
        let err = service.accept(bob, "r.aes").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_accept_by_wrong_identity_fails() {
        let (service, db, alice, _bob) = setup().await;
        let carol = db.lock().await.create_user("carol", "PEM-C").unwrap().id;

        service
            .invite(alice, "bob", "r.aes", b"wrapped")
            .await
            .unwrap();

        let err = service.accept(carol, "r.aes").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_invite_rejected() {
        let (service, _db, alice, _bob) = setup().await;

        service
            .invite(alice, "bob", "r.aes", b"wrapped-1")
            .await
            .unwrap();
        let err = service
            .invite(alice, "bob", "r.aes", b"wrapped-2")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::DuplicateInvite));
    }

    #[tokio::test]
    async fn test_invite_to_collaborator_rejected() {
        let (service, db, alice, bob) = setup().await;
        {
            let guard = db.lock().await;
            let file = guard.file_for_collaborator("r.aes", alice).unwrap().unwrap();
            guard.add_collaborator(file.id, bob).unwrap();
        }

        let err = service
            .invite(alice, "bob", "r.aes", b"wrapped")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AlreadyCollaborator));
    }

    #[tokio::test]
    async fn test_invite_is_owner_only() {
        let (service, db, alice, bob) = setup().await;
        {
            let guard = db.lock().await;
            let file = guard.file_for_collaborator("r.aes", alice).unwrap().unwrap();
            guard.add_collaborator(file.id, bob).unwrap();
            guard.create_user("carol", "PEM-C").unwrap();
        }

        // Bob can edit but does not own, so he cannot invite carol.
        let err = service
            .invite(bob, "carol", "r.aes", b"wrapped")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_second_accept_fails_after_consumption() {
        let (service, _db, alice, bob) = setup().await;

        service
            .invite(alice, "bob", "r.aes", b"wrapped")
            .await
            .unwrap();
        service.accept(bob, "r.aes").await.unwrap();

        let err = service.accept(bob, "r.aes").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }
}
