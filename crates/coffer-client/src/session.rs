//! Client session: key handling, encryption and the command implementations.
//!
//! File keys live next to the working directory as `<file>.key`; local
//! ciphertext copies live under the files directory as `<file>.aes`.
//! Uploading deletes the plaintext: the file stays locked until `download`
//! or `unlock`.

use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::debug;

use coffer_net::ApiClient;
use coffer_shared::constants::ENCRYPTED_SUFFIX;
use coffer_shared::crypto::{self, FileKey};
use coffer_shared::keys::{Certificate, Keypair};
use coffer_shared::protocol::{InviteRequest, RemoveRequest, UploadRequest};

use crate::cache::{CachedFile, FileCache};

const PRIVATE_KEY_FILE: &str = "key.pem";
const CERTIFICATE_FILE: &str = "certificate.pem";

pub struct Session {
    api: ApiClient,
    cache: FileCache,
    keys_dir: PathBuf,
    files_dir: PathBuf,
    username: Option<String>,
}

impl Session {
    pub fn new(
        api: ApiClient,
        cache: FileCache,
        keys_dir: PathBuf,
        files_dir: PathBuf,
    ) -> Self {
        Self {
            api,
            cache,
            keys_dir,
            files_dir,
            username: None,
        }
    }

    fn remote_name(file_name: &str) -> String {
        format!("{file_name}{ENCRYPTED_SUFFIX}")
    }

    fn require_login(&self) -> anyhow::Result<String> {
        self.username
            .clone()
            .context("not logged in — run `login <username>` first")
    }

    fn load_keypair(&self) -> anyhow::Result<Keypair> {
        Keypair::load(&self.keys_dir.join(PRIVATE_KEY_FILE))
            .context("no private key found — run `keygen` first")
    }

    async fn read_file_key(&self, file_name: &str) -> anyhow::Result<FileKey> {
        let path = format!("{file_name}.key");
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("no key file '{path}' for this file"))?;
        let key: FileKey = bytes
            .as_slice()
            .try_into()
            .with_context(|| format!("key file '{path}' has the wrong size"))?;
        Ok(key)
    }

    async fn write_file_key(&self, file_name: &str, key: &FileKey) -> anyhow::Result<()> {
        tokio::fs::write(format!("{file_name}.key"), key)
            .await
            .context("failed to write key file")
    }

    // ------------------------------------------------------------------
    // Identity commands
    // ------------------------------------------------------------------

    /// Generate the long-term keypair and certificate files.
    pub async fn keygen(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.keys_dir).await?;
        let key_path = self.keys_dir.join(PRIVATE_KEY_FILE);
        if key_path.exists() {
            bail!("a keypair already exists at '{}'", key_path.display());
        }

        println!("Generating RSA keypair (this can take a moment)...");
        let keypair = Keypair::generate()?;
        keypair.save(&key_path)?;
        keypair
            .certificate()
            .save(&self.keys_dir.join(CERTIFICATE_FILE))?;

        println!("Keypair written to '{}'", self.keys_dir.display());
        Ok(())
    }

    /// Register this identity's certificate under a username.
    pub async fn register(&self, username: &str) -> anyhow::Result<()> {
        let certificate = Certificate::load(&self.keys_dir.join(CERTIFICATE_FILE))
            .context("no certificate found — run `keygen` first")?;
        self.api
            .register(username, &certificate.to_pem()?)
            .await?;
        println!("User registered successfully");
        Ok(())
    }

    /// Challenge–response login; prints pending invite notifications.
    pub async fn login(&mut self, username: &str) -> anyhow::Result<()> {
        let keypair = self.load_keypair()?;

        let nonce = self.api.get_number(username).await?;
        let signed = crypto::sign(nonce.as_bytes(), &keypair);
        let resp = self.api.get_token(username, signed).await?;

        self.username = Some(username.to_string());
        println!("User logged in successfully");

        for invite in &resp.pending_invites {
            let file = invite
                .strip_suffix(ENCRYPTED_SUFFIX)
                .unwrap_or(invite.as_str());
            println!("You have been invited to edit {file}");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // File commands
    // ------------------------------------------------------------------

    /// Encrypt, sign and upload a plaintext file, then delete the plaintext.
    pub async fn upload(&mut self, file_name: &str) -> anyhow::Result<()> {
        let me = self.require_login()?;

        let plaintext = tokio::fs::read(file_name)
            .await
            .with_context(|| format!("cannot read '{file_name}'"))?;

        let key = match self.read_file_key(file_name).await {
            Ok(key) => key,
            Err(_) => {
                let key = crypto::generate_file_key();
                self.write_file_key(file_name, &key).await?;
                debug!(file = file_name, "generated new file key");
                key
            }
        };

        let owner = self
            .cache
            .get(file_name)
            .map(|entry| entry.owner.clone())
            .unwrap_or_else(|| me.clone());

        self.push_version(file_name, &plaintext, &key, &owner).await?;

        tokio::fs::remove_file(file_name).await.ok();
        println!("File uploaded");
        Ok(())
    }

    /// Encrypt under the caller's IV, sign, upload, store the ciphertext
    /// copy and update the cache. Shared by `upload` and the `remove`
    /// re-key path.
    async fn push_version(
        &mut self,
        file_name: &str,
        plaintext: &[u8],
        key: &FileKey,
        owner: &str,
    ) -> anyhow::Result<i64> {
        let me = self.require_login()?;
        let remote = Self::remote_name(file_name);

        let iv = crypto::derive_iv(&me)?;
        let ciphertext = crypto::encrypt(key, &iv, plaintext);
        let keypair = self.load_keypair()?;
        let signature = crypto::sign(&ciphertext, &keypair);

        let version = self
            .api
            .upload(&UploadRequest {
                name: remote.clone(),
                ciphertext: ciphertext.clone(),
                signature,
                owner: owner.to_string(),
            })
            .await?;

        tokio::fs::create_dir_all(&self.files_dir).await?;
        tokio::fs::write(self.files_dir.join(&remote), &ciphertext).await?;

        self.cache.put(
            file_name,
            CachedFile {
                owner: owner.to_string(),
                version,
                last_modifier: me,
            },
        );
        self.cache.save()?;
        Ok(version)
    }

    /// Download, verify against the modifier's certificate, decrypt with the
    /// modifier's IV. A failed signature leaves the local encrypted copy
    /// untouched so `unlock` can still recover the last good version.
    pub async fn download(&mut self, file_name: &str) -> anyhow::Result<()> {
        self.require_login()?;
        let key = self.read_file_key(file_name).await?;
        let remote = Self::remote_name(file_name);

        let resp = self.api.download(&remote).await?;

        let modifier_cert = Certificate::from_pem(&resp.modifier_certificate_pem)
            .context("server returned an unparseable certificate")?;
        if !crypto::verify(&resp.ciphertext, &modifier_cert, &resp.signature) {
            bail!(
                "remote copy of '{file_name}' failed signature verification (tampered or \
                 corrupted); your local copy is untouched — use `unlock {file_name}` to \
                 recover it"
            );
        }

        tokio::fs::create_dir_all(&self.files_dir).await?;
        tokio::fs::write(self.files_dir.join(&remote), &resp.ciphertext).await?;

        let iv = crypto::derive_iv(&resp.last_modifier)?;
        let plaintext = crypto::decrypt(&key, &iv, &resp.ciphertext)?;
        tokio::fs::write(file_name, plaintext).await?;

        self.cache.put(
            file_name,
            CachedFile {
                owner: resp.owner,
                version: resp.version,
                last_modifier: resp.last_modifier,
            },
        );
        self.cache.save()?;

        println!("File downloaded (version {})", resp.version);
        Ok(())
    }

    /// Decrypt the local encrypted copy without contacting the server, using
    /// the cached last-modifier IV.
    pub async fn unlock(&self, file_name: &str) -> anyhow::Result<()> {
        let entry = self
            .cache
            .get(file_name)
            .with_context(|| format!("'{file_name}' is not in the local cache"))?;
        let key = self.read_file_key(file_name).await?;

        let remote = Self::remote_name(file_name);
        let ciphertext = tokio::fs::read(self.files_dir.join(&remote))
            .await
            .with_context(|| format!("no local encrypted copy of '{file_name}'"))?;

        let iv = crypto::derive_iv(&entry.last_modifier)?;
        let plaintext = crypto::decrypt(&key, &iv, &ciphertext)?;
        tokio::fs::write(file_name, plaintext).await?;

        println!("File unlocked");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sharing commands
    // ------------------------------------------------------------------

    /// Wrap the file key under the invitee's certificate and send the invite.
    pub async fn invite(&self, target: &str, file_name: &str) -> anyhow::Result<()> {
        self.require_login()?;
        let key = self.read_file_key(file_name).await?;

        let cert_pem = self.api.share(target).await?;
        let certificate = Certificate::from_pem(&cert_pem)
            .context("server returned an unparseable certificate")?;
        let wrapped_key = crypto::wrap_key(&key, &certificate)?;

        self.api
            .invite(&InviteRequest {
                username: target.to_string(),
                file_name: Self::remote_name(file_name),
                wrapped_key,
            })
            .await?;

        println!("Invite sent");
        Ok(())
    }

    /// Accept a pending invite and store the unwrapped file key.
    pub async fn accept(&self, file_name: &str) -> anyhow::Result<()> {
        self.require_login()?;
        let keypair = self.load_keypair()?;

        let wrapped = self.api.accept(&Self::remote_name(file_name)).await?;
        let key = crypto::unwrap_key(&wrapped, &keypair)?;
        self.write_file_key(file_name, &key).await?;

        println!("Invite accepted");
        Ok(())
    }

    /// Revoke a collaborator, then rotate the share: the removed user still
    /// knows the old key, so a fresh key is generated, the file re-encrypted
    /// and uploaded, and every remaining collaborator re-invited with the
    /// new key wrapped under their certificate.
    pub async fn remove(&mut self, target: &str, file_name: &str) -> anyhow::Result<()> {
        let me = self.require_login()?;
        let remote = Self::remote_name(file_name);

        let collaborators = self
            .api
            .remove(&RemoveRequest {
                username: target.to_string(),
                file_name: remote.clone(),
            })
            .await?;
        println!("Removed {target} from '{file_name}'");

        // Recover the plaintext before the old key is overwritten.
        let plaintext = match tokio::fs::read(file_name).await {
            Ok(bytes) => bytes,
            Err(_) => {
                let entry = self.cache.get(file_name).with_context(|| {
                    format!("'{file_name}' is not in the local cache; download it before removing")
                })?;
                let old_key = self.read_file_key(file_name).await?;
                let ciphertext = tokio::fs::read(self.files_dir.join(&remote))
                    .await
                    .context("no local encrypted copy; download the file before removing")?;
                let iv = crypto::derive_iv(&entry.last_modifier)?;
                crypto::decrypt(&old_key, &iv, &ciphertext)?
            }
        };

        let new_key = crypto::generate_file_key();
        self.write_file_key(file_name, &new_key).await?;

        let owner = self
            .cache
            .get(file_name)
            .map(|entry| entry.owner.clone())
            .unwrap_or(me);
        let version = self
            .push_version(file_name, &plaintext, &new_key, &owner)
            .await?;
        tokio::fs::remove_file(file_name).await.ok();
        println!("File re-keyed at version {version}");

        for collaborator in &collaborators {
            let certificate = Certificate::from_pem(&collaborator.certificate_pem)
                .context("server returned an unparseable certificate")?;
            let wrapped_key = crypto::wrap_key(&new_key, &certificate)?;
            self.api
                .invite(&InviteRequest {
                    username: collaborator.username.clone(),
                    file_name: remote.clone(),
                    wrapped_key,
                })
                .await?;
            println!("Re-invited {}", collaborator.username);
        }
        Ok(())
    }

    /// Flush local state on clean shutdown.
    pub fn close(&self) -> anyhow::Result<()> {
        self.cache.save()
    }
}
