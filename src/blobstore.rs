//! Blob persistence boundary: the content bytes behind a `dhash` never
//! live in LMDB alongside the graph and ACL metadata, per spec.md §1's
//! Non-goal on file-blob persistence. The core only needs something that
//! can round-trip bytes by hash.
//!
//! `FilesystemBlobStore` is one concrete implementation, laid out the way
//! the teacher shapes its own on-disk state under `Config::data_dir`
//! (`config.rs`): content-addressed, two-level fan-out directories so a
//! single directory never holds more than a few thousand entries.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::{err, CapError, Result};

/// External collaborator the core stores content through, addressed only
/// by the caller-supplied digest — never by internal integer id.
pub trait BlobStore: Send + Sync {
    fn put(&self, hash: &str, bytes: &[u8]) -> Result<()>;
    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>>;
}

/// Stores each blob as a file under `root/<hash[0..2]>/<hash[2..4]>/<hash>`.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemBlobStore { root: root.into() }
    }

    fn path_for(&self, hash: &str) -> Result<PathBuf> {
        if hash.len() < 4 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CapError::storage(format!("not a valid content digest: {hash}")));
        }
        Ok(self.root.join(&hash[0..2]).join(&hash[2..4]).join(hash))
    }
}

impl BlobStore for FilesystemBlobStore {
    fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(hash)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(err)?;
        }
        fs::write(&path, bytes).map_err(err)
    }

    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(hash)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(err(e)),
        }
    }
}

/// In-memory store for tests and development; never use under the
/// `server` feature outside of local experimentation.
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        self.entries.lock().unwrap().insert(hash.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(hash).cloned())
    }
}
