use anyhow::{Context, Result};
use bytes::Bytes;
use hashbrown::HashMap;
use log::debug;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Opaque key to bytes store used to keep downloaded model weights.
pub trait ByteCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Bytes>>;
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// In-process cache. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryByteCache {
    entries: std::sync::Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryByteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ByteCache for MemoryByteCache {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), Bytes::copy_from_slice(bytes));
        Ok(())
    }
}

/// One file per key under a directory, named by the SHA-256 of the key.
pub struct FileByteCache {
    root: PathBuf,
}

impl FileByteCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root.join(format!("{}.bin", hex::encode(digest)))
    }
}

impl ByteCache for FileByteCache {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading cache entry {path:?}")),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating cache directory {:?}", self.root))?;

        let path = self.entry_path(key);
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes).with_context(|| format!("writing {temp_path:?}"))?;
        fs::rename(&temp_path, &path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            anyhow::Error::new(err).context(format!("moving cache entry into {path:?}"))
        })?;
        debug!("cached {} bytes for `{key}` at {path:?}", bytes.len());
        Ok(())
    }
}
