//! Durable key/value storage.
//!
//! One file per key under the storage directory. Writes go to a temporary
//! file first and are renamed into place, so a reader sees either the old
//! value or the new one.

use protocol_ganymede::{CredentialStore, StoreError, TokenKind};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Last successful poll response, protobuf-encoded.
pub const POLL_RESPONSE_KEY: &str = "poll_response";
pub const DEVICE_ID_KEY: &str = "device-id";

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl FileStore {
    /// Open the store, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    pub fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    pub fn write_blob(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path(key)?;
        let tmp = self.root.join(format!(".{key}.tmp"));

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };

        write().map_err(|source| {
            let _ = fs::remove_file(&tmp);
            StoreError::Io {
                key: key.to_string(),
                source,
            }
        })?;
        tracing::trace!(key, len = data.len(), "stored");
        Ok(())
    }

    pub fn read_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.read_blob(key)? {
            Some(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|_| StoreError::Encoding(key.to_string())),
            None => Ok(None),
        }
    }

    pub fn write_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write_blob(key, value.as_bytes())
    }

    /// Remove `key`. Removing a missing key is not an error.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

impl CredentialStore for FileStore {
    fn read(&self, kind: TokenKind) -> Result<Option<String>, StoreError> {
        self.read_string(kind.key())
    }

    fn write(&self, kind: TokenKind, token: &str) -> Result<(), StoreError> {
        self.write_string(kind.key(), token)
    }
}
