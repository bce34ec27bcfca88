use log::info;
use std::path::{ Path, PathBuf };
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid filename '{0}': expected a plain file name")]
    InvalidFilename(String),

    #[error("upload write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat directory of uploaded lab reports, keyed by client filename. Files
/// are written once and never read back by this service.
#[derive(Clone, Debug)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let name = sanitize_filename(filename)?;
        fs::create_dir_all(&self.root).await?;
        let path = self.root.join(name);
        // Concurrent saves under the same name race; last write wins.
        fs::write(&path, bytes).await?;
        info!("Stored upload '{}' ({} bytes)", name, bytes.len());
        Ok(path)
    }
}

/// A client-supplied name must resolve to a single path component inside the
/// upload directory. Separators, NULs, `.` and `..` are rejected.
pub fn sanitize_filename(raw: &str) -> Result<&str, StorageError> {
    let name = raw.trim();
    if name.is_empty()
        || name.len() > 255
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name == "."
        || name == ".."
    {
        return Err(StorageError::InvalidFilename(raw.to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_are_accepted() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("blood work 2024.csv").unwrap(), "blood work 2024.csv");
    }

    #[test]
    fn traversal_and_separator_names_are_rejected() {
        for name in ["", ".", "..", "../escape.txt", "a/b.txt", "a\\b.txt", "nul\0name"] {
            assert!(
                matches!(sanitize_filename(name), Err(StorageError::InvalidFilename(_))),
                "expected rejection for {:?}",
                name
            );
        }
    }

    #[tokio::test]
    async fn save_writes_bytes_under_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path());

        let path = store.save("report.pdf", b"X").await.unwrap();
        assert_eq!(path, dir.path().join("report.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"X");
    }

    #[tokio::test]
    async fn save_creates_the_directory_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));

        store.save("a.txt", b"1").await.unwrap();
        store.save("b.txt", b"2").await.unwrap();
        assert_eq!(std::fs::read(store.root().join("a.txt")).unwrap(), b"1");
        assert_eq!(std::fs::read(store.root().join("b.txt")).unwrap(), b"2");
    }

    #[tokio::test]
    async fn save_refuses_to_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));

        let err = store.save("../escape.txt", b"X").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidFilename(_)));
        assert!(!dir.path().join("escape.txt").exists());
    }
}
