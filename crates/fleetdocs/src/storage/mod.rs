//! File storage interface.
//!
//! The pipeline consumes file bytes through `FileStore` and never
//! manages retention, access control, or bucket layout. The local
//! implementation reads straight from disk; tests substitute an
//! in-memory store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;

pub trait FileStore: Send + Sync {
    /// Returns the bytes of the file at the given path.
    fn load(&self, path: &str) -> Result<Vec<u8>, StorageError>;
}

/// Reads files from the local filesystem, optionally rooted.
pub struct LocalFileStore {
    root: Option<PathBuf>,
}

impl LocalFileStore {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Resolves relative paths against `root`.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match self.root {
            Some(ref root) if !Path::new(path).is_absolute() => root.join(path),
            _ => PathBuf::from(path),
        }
    }
}

impl Default for LocalFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore for LocalFileStore {
    fn load(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let resolved = self.resolve(path);
        if !resolved.exists() {
            return Err(StorageError::NotFound(resolved));
        }
        std::fs::read(&resolved).map_err(|e| StorageError::ReadFile {
            path: resolved,
            source: e,
        })
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: impl Into<String>, bytes: Vec<u8>) {
        self.files
            .lock()
            .expect("file store lock")
            .insert(path.into(), bytes);
    }
}

impl FileStore for MemoryFileStore {
    fn load(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .lock()
            .expect("file store lock")
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(PathBuf::from(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_store_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF- fake").unwrap();

        let store = LocalFileStore::new();
        let bytes = store.load(path.to_str().unwrap()).unwrap();
        assert_eq!(bytes, b"%PDF- fake");
    }

    #[test]
    fn test_local_store_missing_is_not_found() {
        let store = LocalFileStore::new();
        let result = store.load("/definitely/not/here.pdf");
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_local_store_root_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scan.png"), b"png bytes").unwrap();

        let store = LocalFileStore::with_root(dir.path());
        assert_eq!(store.load("scan.png").unwrap(), b"png bytes");
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryFileStore::new();
        store.put("/uploads/a.pdf", b"data".to_vec());

        assert_eq!(store.load("/uploads/a.pdf").unwrap(), b"data");
        assert!(matches!(
            store.load("/uploads/b.pdf"),
            Err(StorageError::NotFound(_))
        ));
    }
}
