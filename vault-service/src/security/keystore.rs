//! File-backed X25519 keypair storage.
//!
//! Every entity owns two keypairs on disk: `<eid>_publish.db` for the
//! ratchet channel and `<eid>_device_id.db` for session binding. Both are
//! serialized the same way — a one-byte format version followed by the
//! 32-byte private scalar and the 32-byte public key — so a future
//! algorithm change can branch on the version byte without invalidating
//! keys already on disk.

use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crypto_core::X25519Keypair;

use crate::error::VaultError;

const FORMAT_VERSION: u8 = 1;
const RECORD_LEN: usize = 1 + 32 + 32;

pub struct Keystore {
    base_path: PathBuf,
}

impl Keystore {
    /// Opens the keystore rooted at `base_path`, creating the directory if
    /// it does not already exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn publish_path(&self, eid_hex: &str) -> PathBuf {
        self.base_path.join(format!("{eid_hex}_publish.db"))
    }

    pub fn device_id_path(&self, eid_hex: &str) -> PathBuf {
        self.base_path.join(format!("{eid_hex}_device_id.db"))
    }

    /// Create-if-absent: if `path` already holds a keypair, loads and
    /// returns it; otherwise generates a fresh one, persists it, and
    /// returns that. The create is done with `O_EXCL` so two processes
    /// racing on the same `eid` never produce two different keypairs — the
    /// loser's create fails with `AlreadyExists` and it falls back to
    /// loading what the winner wrote.
    pub fn generate_keypair_and_public_key(&self, path: &Path) -> Result<X25519Keypair, VaultError> {
        match self.create_new(path) {
            Ok(keypair) => Ok(keypair),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => self.load(path),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete-then-create: unconditionally replaces whatever keypair was at
    /// `path` with a fresh one. Used only by authentication's device
    /// rotation — never by entity creation, which must stay idempotent.
    pub fn regenerate_keypair_and_public_key(&self, path: &Path) -> Result<X25519Keypair, VaultError> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(self.create_new(path)?)
    }

    pub fn load(&self, path: &Path) -> Result<X25519Keypair, VaultError> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        fs::File::open(path)?.read_to_end(&mut buf)?;
        deserialize(&buf)
    }

    /// Read the raw serialized record at `path`, for callers that persist
    /// it verbatim alongside the entity row rather than re-deriving it.
    pub fn read_raw(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        fs::File::open(path)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Delete the keystore file at `path`, if present. Used by `DeleteEntity`;
    /// callers log but do not propagate a failure here, since an orphaned
    /// file is inert once the owning entity row is gone.
    pub fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn create_new(&self, path: &Path) -> io::Result<X25519Keypair> {
        let keypair = crypto_core::x25519_keygen();
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&serialize(&keypair))?;
        Ok(keypair)
    }
}

fn serialize(keypair: &X25519Keypair) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    buf[0] = FORMAT_VERSION;
    buf[1..33].copy_from_slice(&keypair.private);
    buf[33..65].copy_from_slice(&keypair.public);
    buf
}

/// Decode a keypair record read back from storage (e.g. the `publish_keypair`
/// / `device_id_keypair` columns), which are byte-for-byte copies of what
/// `read_raw` returns.
pub fn decode_keypair(buf: &[u8]) -> Result<X25519Keypair, VaultError> {
    deserialize(buf)
}

fn deserialize(buf: &[u8]) -> Result<X25519Keypair, VaultError> {
    if buf.len() != RECORD_LEN {
        return Err(VaultError::Keystore(format!(
            "corrupt keystore record: expected {RECORD_LEN} bytes, found {}",
            buf.len()
        )));
    }
    match buf[0] {
        FORMAT_VERSION => {
            let mut private = [0u8; 32];
            let mut public = [0u8; 32];
            private.copy_from_slice(&buf[1..33]);
            public.copy_from_slice(&buf[33..65]);
            Ok(X25519Keypair { private, public })
        }
        other => Err(VaultError::Keystore(format!(
            "unsupported keystore format version {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_keystore() -> (Keystore, tempfile_dir::TempDir) {
        let dir = tempfile_dir::TempDir::new();
        let keystore = Keystore::new(dir.path()).unwrap();
        (keystore, dir)
    }

    /// Minimal `tempfile`-free temp directory so this module doesn't need
    /// to pull in a dev-dependency just for two tests.
    mod tempfile_dir {
        use std::path::{Path, PathBuf};

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("vault-keystore-test-{}", std::process::id()));
                path.push(uuid::Uuid::new_v4().to_string());
                Self(path)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    #[test]
    fn create_if_absent_is_idempotent() {
        let (keystore, dir) = temp_keystore();
        let path = dir.path().join("abc_publish.db");

        let first = keystore.generate_keypair_and_public_key(&path).unwrap();
        let second = keystore.generate_keypair_and_public_key(&path).unwrap();

        assert_eq!(first.public, second.public);
        assert_eq!(first.private, second.private);
    }

    #[test]
    fn regenerate_replaces_the_keypair() {
        let (keystore, dir) = temp_keystore();
        let path = dir.path().join("abc_device_id.db");

        let first = keystore.generate_keypair_and_public_key(&path).unwrap();
        let second = keystore.regenerate_keypair_and_public_key(&path).unwrap();

        assert_ne!(first.public, second.public);

        let reloaded = keystore.load(&path).unwrap();
        assert_eq!(reloaded.public, second.public);
    }

    #[test]
    fn delete_is_idempotent_on_missing_file() {
        let (keystore, dir) = temp_keystore();
        let path = dir.path().join("never_written.db");
        keystore.delete(&path).unwrap();
        keystore.delete(&path).unwrap();
    }

    #[test]
    fn rejects_truncated_record() {
        assert!(deserialize(&[FORMAT_VERSION, 1, 2, 3]).is_err());
    }

    #[test]
    fn rejects_unknown_format_version() {
        let buf = [0u8; RECORD_LEN];
        assert!(deserialize(&buf).is_err());
    }
}
