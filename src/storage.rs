//! Object storage for uploaded source documents
//!
//! The pipeline itself never touches storage; only the upload and download
//! routes do. Missing settings produce [`Storage::Unconfigured`], which reports
//! [`Error::StorageUnconfigured`] when an operation is attempted.

use std::path::{Component, Path, PathBuf};

use log::{info, warn};

use crate::{Error, Result};

/// Storage settings as read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Configured { root: PathBuf, prefix: String },
    Unconfigured { reason: String },
}

impl StorageConfig {
    pub fn from_parts(root: Option<PathBuf>, prefix: String) -> Self {
        match root {
            Some(root) => StorageConfig::Configured { root, prefix },
            None => StorageConfig::Unconfigured {
                reason: "STORAGE_DIR is not set".to_string(),
            },
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, StorageConfig::Configured { .. })
    }
}

/// Minimal capability the service needs from an object store
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under a key derived from `name`; returns the key.
    fn upload(&self, bytes: &[u8], name: &str) -> Result<String>;

    /// Fetch what was stored under `key`.
    fn download(&self, key: &str) -> Result<Vec<u8>>;
}

/// Filesystem-backed store: keys are relative paths below `root`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    prefix: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::Storage(format!("invalid storage key '{}'", key)));
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectStore for LocalObjectStore {
    fn upload(&self, bytes: &[u8], name: &str) -> Result<String> {
        let key = format!(
            "{}uploads/{}-{}",
            self.prefix,
            chrono::Utc::now().timestamp_millis(),
            sanitize_file_name(name)
        );
        let path = self.resolve(&key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        info!("stored {} bytes as {}", bytes.len(), key);
        Ok(key)
    }

    fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::Storage(format!("no object stored under '{}'", key)),
            _ => Error::Io(e),
        })
    }
}

/// The storage collaborator handed to the service
pub enum Storage {
    Configured(Box<dyn ObjectStore>),
    Unconfigured { reason: String },
}

impl Storage {
    pub fn from_config(config: &StorageConfig) -> Self {
        match config {
            StorageConfig::Configured { root, prefix } => {
                Storage::Configured(Box::new(LocalObjectStore::new(root.clone(), prefix.clone())))
            }
            StorageConfig::Unconfigured { reason } => {
                warn!("object storage unavailable: {}", reason);
                Storage::Unconfigured { reason: reason.clone() }
            }
        }
    }

    fn store(&self) -> Result<&dyn ObjectStore> {
        match self {
            Storage::Configured(store) => Ok(store.as_ref()),
            Storage::Unconfigured { reason } => Err(Error::StorageUnconfigured(reason.clone())),
        }
    }

    pub fn upload(&self, bytes: &[u8], name: &str) -> Result<String> {
        self.store()?.upload(bytes, name)
    }

    pub fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.store()?.download(key)
    }
}

fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.html");
    base.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_fails_only_on_use() {
        let storage = Storage::from_config(&StorageConfig::from_parts(None, String::new()));
        match storage.upload(b"<html></html>", "a.html") {
            Err(Error::StorageUnconfigured(reason)) => assert!(reason.contains("STORAGE_DIR")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert!(matches!(storage.download("k"), Err(Error::StorageUnconfigured(_))));
    }

    #[test]
    fn upload_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::from_config(&StorageConfig::Configured {
            root: dir.path().to_path_buf(),
            prefix: "tenant/".into(),
        });
        let key = storage.upload(b"<p>hi</p>", "../my page.html").unwrap();
        assert!(key.starts_with("tenant/uploads/"));
        assert!(key.ends_with("-my_page.html"));
        assert_eq!(storage.download(&key).unwrap(), b"<p>hi</p>");
    }

    #[test]
    fn rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "");
        assert!(matches!(store.download("../etc/passwd"), Err(Error::Storage(_))));
        assert!(matches!(store.download("/etc/passwd"), Err(Error::Storage(_))));
        assert!(matches!(store.download("uploads/missing"), Err(Error::Storage(_))));
    }
}
