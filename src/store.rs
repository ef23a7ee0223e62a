//! Encrypted on-disk storage for authorization state.
//!
//! The store keeps two records under the platform data directory:
//! * `credentials` - the full [`Credential`]: token pair, expiry, identity
//! * `owner` - the bare [`Owner`] identity that survives token loss
//!
//! # Storage Format
//!
//! Each record is JSON, sealed with AES-256-GCM and written as
//! `nonce || ciphertext` to its own file. The key is derived from the
//! machine id, binding records to the installation: copying the files to
//! another machine yields only an unreadable record that is cleared on
//! first load.
//!
//! # Durability
//!
//! Writes go to a staging file first and are moved into place with an
//! atomic rename, so a crash mid-write leaves the previous record intact.
//! A record that fails to decrypt or parse is treated as absent: it is
//! cleared, logged loudly and never aborts startup.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::Config,
    credentials::{Credential, Owner},
    error::{Error, Result},
};

/// File name stem of the token pair record.
const CREDENTIALS_RECORD: &str = "credentials";

/// File name stem of the bare identity record.
const OWNER_RECORD: &str = "owner";

/// Length of the AES-GCM nonce prefixed to each sealed record.
const NONCE_LEN: usize = 12;

/// Encrypted key/value store for [`Credential`] and [`Owner`] records.
pub struct CredentialStore {
    /// Directory holding the record files.
    dir: PathBuf,

    /// Cipher keyed to this installation.
    cipher: Aes256Gcm,
}

impl CredentialStore {
    /// Opens the store under the configured data directory, creating the
    /// directory if necessary.
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created.
    pub fn open(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let key = Self::derive_key(config);
        Ok(Self {
            dir: config.data_dir.clone(),
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        })
    }

    /// Loads the stored token pair.
    ///
    /// A corrupt record is cleared and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns error if the record file exists but cannot be read.
    pub fn load_credential(&self) -> Result<Option<Credential>> {
        self.read_record(CREDENTIALS_RECORD)
    }

    /// Persists the token pair, replacing any previous record atomically.
    ///
    /// When the credential carries an owner id, the bare identity record is
    /// refreshed as well. Sign-in material already on file is kept unless
    /// the credential provides its own, so a token refresh cannot erase the
    /// ability to fall back to email sign-in.
    ///
    /// # Errors
    ///
    /// Returns error if serialization, encryption or the file write fails.
    pub fn save_credential(&self, credential: &Credential) -> Result<()> {
        self.write_record(CREDENTIALS_RECORD, credential)?;

        if let Some(id) = &credential.owner_id {
            let previous = self
                .read_record::<Owner>(OWNER_RECORD)?
                .filter(|owner| owner.id == *id);

            let owner = Owner {
                id: id.clone(),
                email: credential
                    .owner_email
                    .clone()
                    .or_else(|| previous.as_ref().and_then(|owner| owner.email.clone())),
                auth_secret: credential
                    .auth_secret
                    .clone()
                    .or_else(|| previous.and_then(|owner| owner.auth_secret)),
            };
            self.write_record(OWNER_RECORD, &owner)?;
        }

        Ok(())
    }

    /// Loads the bare identity record.
    ///
    /// # Errors
    ///
    /// Returns error if the record file exists but cannot be read.
    pub fn load_owner(&self) -> Result<Option<Owner>> {
        self.read_record(OWNER_RECORD)
    }

    /// Persists the bare identity record.
    ///
    /// # Errors
    ///
    /// Returns error if serialization, encryption or the file write fails.
    pub fn save_owner(&self, owner: &Owner) -> Result<()> {
        self.write_record(OWNER_RECORD, owner)
    }

    /// Derives the storage key from the machine id.
    ///
    /// Falls back to the per-session device id when no machine id is
    /// available, in which case records do not survive a restart.
    fn derive_key(config: &Config) -> [u8; 32] {
        let seed = match machine_uid::get() {
            Ok(machine_id) => machine_id,
            Err(e) => {
                warn!("could not get machine id, binding the store to this session: {e}");
                config.device_id.to_string()
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(config.app_name.as_bytes());
        hasher.finalize().into()
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.bin"))
    }

    fn read_record<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let path = self.record_path(name);
        let sealed = match fs::read(&path) {
            Ok(sealed) => sealed,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record = self
            .unseal(&sealed)
            .and_then(|plain| serde_json::from_slice(&plain).map_err(Into::into));
        match record {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                error!("{name} record is corrupt, clearing it: {e}");
                Self::clear_record(&path, name);
                Ok(None)
            }
        }
    }

    fn write_record<T>(&self, name: &str, record: &T) -> Result<()>
    where
        T: Serialize,
    {
        let sealed = self.seal(&serde_json::to_vec(record)?)?;

        let path = self.record_path(name);
        let staging = path.with_extension("tmp");
        fs::write(&staging, &sealed)?;

        // Rename is atomic on the same filesystem: readers see the old
        // record or the new one, never a partial write.
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn clear_record(path: &Path, name: &str) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("could not clear the {name} record: {e}");
            }
        }
    }

    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain)
            .map_err(|e| Error::internal(format!("record encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(Error::data_loss("sealed record too short"));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::data_loss(format!("record decryption failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    use crate::secrets::Secrets;

    fn test_store() -> (CredentialStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = Config::with_secrets(Secrets {
            client_id: "id".to_owned(),
            client_secret: "secret".to_owned(),
        });
        config.data_dir = dir.path().to_path_buf();

        let store = CredentialStore::open(&config).expect("open store");
        (store, dir)
    }

    fn test_credential() -> Credential {
        Credential {
            access_token: Some("a1".to_owned()),
            refresh_token: Some("r1".to_owned()),
            expires_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            owner_id: Some("user-1".to_owned()),
            owner_email: Some("user@example.com".to_owned()),
            auth_secret: Some("s1".to_owned()),
        }
    }

    #[test]
    fn empty_store_has_no_records() {
        let (store, _dir) = test_store();
        assert!(store.load_credential().expect("load").is_none());
        assert!(store.load_owner().expect("load").is_none());
    }

    #[test]
    fn credential_roundtrips() {
        let (store, _dir) = test_store();
        let credential = test_credential();

        store.save_credential(&credential).expect("save");
        let loaded = store.load_credential().expect("load").expect("present");
        assert_eq!(loaded, credential);
    }

    #[test]
    fn save_replaces_whole_record() {
        let (store, dir) = test_store();
        store.save_credential(&test_credential()).expect("save");

        let replacement = Credential {
            access_token: Some("a2".to_owned()),
            ..test_credential()
        };
        store.save_credential(&replacement).expect("save");

        let loaded = store.load_credential().expect("load").expect("present");
        assert_eq!(loaded, replacement);

        // No staging file may be left behind.
        let staging = dir.path().join("credentials.tmp");
        assert!(!staging.exists());
    }

    #[test]
    fn stale_staging_file_does_not_shadow_record() {
        let (store, dir) = test_store();
        store.save_credential(&test_credential()).expect("save");

        // A crash between the staging write and the rename leaves a
        // partial staging file next to the intact record.
        let staging = dir.path().join("credentials.tmp");
        fs::write(&staging, b"partial write").expect("staging");

        let loaded = store.load_credential().expect("load").expect("present");
        assert_eq!(loaded, test_credential());

        // The next save replaces the leftover with its own staging file
        // and moves it into place.
        let replacement = Credential {
            access_token: Some("a2".to_owned()),
            ..test_credential()
        };
        store.save_credential(&replacement).expect("save");
        assert!(!staging.exists());

        let loaded = store.load_credential().expect("load").expect("present");
        assert_eq!(loaded, replacement);
    }

    #[test]
    fn saving_credential_mirrors_owner() {
        let (store, _dir) = test_store();
        store.save_credential(&test_credential()).expect("save");

        let owner = store.load_owner().expect("load").expect("present");
        assert_eq!(owner.id, "user-1");
        assert_eq!(owner.email.as_deref(), Some("user@example.com"));
        assert_eq!(owner.auth_secret.as_deref(), Some("s1"));
    }

    #[test]
    fn refresh_without_sign_in_material_keeps_owner_fields() {
        let (store, _dir) = test_store();
        store.save_credential(&test_credential()).expect("save");

        let refreshed = Credential {
            owner_email: None,
            auth_secret: None,
            ..test_credential()
        };
        store.save_credential(&refreshed).expect("save");

        let owner = store.load_owner().expect("load").expect("present");
        assert_eq!(owner.email.as_deref(), Some("user@example.com"));
        assert_eq!(owner.auth_secret.as_deref(), Some("s1"));
    }

    #[test]
    fn different_owner_replaces_record() {
        let (store, _dir) = test_store();
        store.save_credential(&test_credential()).expect("save");

        let other = Credential {
            owner_id: Some("user-2".to_owned()),
            owner_email: None,
            auth_secret: None,
            ..test_credential()
        };
        store.save_credential(&other).expect("save");

        let owner = store.load_owner().expect("load").expect("present");
        assert_eq!(owner.id, "user-2");
        assert!(owner.email.is_none());
    }

    #[test]
    fn corrupt_record_is_cleared_and_absent() {
        let (store, dir) = test_store();
        store.save_credential(&test_credential()).expect("save");

        let path = dir.path().join("credentials.bin");
        fs::write(&path, b"not a sealed record").expect("corrupt");

        assert!(store.load_credential().expect("load").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn tampered_record_is_cleared_and_absent() {
        let (store, dir) = test_store();
        store.save_credential(&test_credential()).expect("save");

        let path = dir.path().join("credentials.bin");
        let mut sealed = fs::read(&path).expect("read");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        fs::write(&path, &sealed).expect("tamper");

        assert!(store.load_credential().expect("load").is_none());
        assert!(!path.exists());
    }
}
