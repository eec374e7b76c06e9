//! Flat file store scoped to a single root directory
//!
//! Only the dispatcher calls into the store, so none of these operations
//! take locks of their own.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Size and timestamps reported by `/info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Length in bytes
    pub size: u64,
    /// Creation time, or modification time where unsupported
    pub created: DateTime<Utc>,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

impl FileInfo {
    /// Render as the `INFO:` reply
    pub fn reply_line(&self) -> String {
        filedock_core::format_info(
            self.size,
            &self.created.to_rfc3339_opts(SecondsFormat::Millis, true),
            &self.modified.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

/// Storage root handle
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open the store, creating the root directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(event = "storage_opened", root = ?root, "Storage root ready");
        Ok(Self { root })
    }

    /// Directory holding the stored files
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a client-supplied name to a path inside the root.
    ///
    /// The store is flat: separators, NUL and dot entries are refused.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0']);

        if invalid {
            return Err(Error::InvalidName(name.to_string()));
        }

        Ok(self.root.join(name))
    }

    /// Names of all regular files, sorted
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names.sort();
        Ok(names)
    }

    /// File content split into lines (lossy UTF-8)
    pub async fn read_lines(&self, name: &str) -> Result<Vec<String>> {
        let bytes = self.read(name).await?;
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Raw file content
    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.existing_file(name).await?;
        fs::read(&path).await.map_err(|e| not_found(e, name))
    }

    /// Write `bytes` to `name`, replacing any previous content
    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Remove a stored file
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.existing_file(name).await?;
        fs::remove_file(&path).await.map_err(|e| not_found(e, name))
    }

    /// Case-insensitive substring match on file names
    pub async fn search(&self, keyword: &str) -> Result<Vec<String>> {
        let needle = keyword.to_lowercase();
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .collect())
    }

    /// Size and timestamps of a stored file
    pub async fn info(&self, name: &str) -> Result<FileInfo> {
        let path = self.existing_file(name).await?;
        let metadata = fs::metadata(&path).await.map_err(|e| not_found(e, name))?;

        let modified: DateTime<Utc> = metadata.modified()?.into();
        // Not every filesystem records a birth time
        let created = metadata.created().map(DateTime::<Utc>::from).unwrap_or(modified);

        Ok(FileInfo {
            size: metadata.len(),
            created,
            modified,
        })
    }

    async fn existing_file(&self, name: &str) -> Result<PathBuf> {
        let path = self.resolve(name)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(Error::FileNotFound(name.to_string())),
            Err(e) => Err(not_found(e, name)),
        }
    }
}

fn not_found(err: std::io::Error, name: &str) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::FileNotFound(name.to_string())
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (Storage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path().join("store")).await.unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn test_open_creates_root() {
        let (storage, _dir) = store().await;
        assert!(storage.root().is_dir());
    }

    #[tokio::test]
    async fn test_resolve_rejects_escapes() {
        let (storage, _dir) = store().await;
        for name in ["", ".", "..", "../etc/passwd", "a/b", "a\\b", "nul\0"] {
            assert!(
                matches!(storage.resolve(name), Err(Error::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
        assert!(storage.resolve("report 2024.txt").is_ok());
        assert!(storage.resolve("..hidden").is_ok());
    }

    #[tokio::test]
    async fn test_write_read_overwrite() {
        let (storage, _dir) = store().await;
        storage.write("a.bin", &[1, 2, 3]).await.unwrap();
        assert_eq!(storage.read("a.bin").await.unwrap(), vec![1, 2, 3]);

        storage.write("a.bin", b"xy").await.unwrap();
        assert_eq!(storage.read("a.bin").await.unwrap(), b"xy");
    }

    #[tokio::test]
    async fn test_read_lines() {
        let (storage, _dir) = store().await;
        storage.write("notes.txt", b"one\r\ntwo\nthree").await.unwrap();
        assert_eq!(
            storage.read_lines("notes.txt").await.unwrap(),
            vec!["one", "two", "three"]
        );
    }

    #[tokio::test]
    async fn test_missing_file() {
        let (storage, _dir) = store().await;
        assert!(matches!(storage.read("nope").await, Err(Error::FileNotFound(_))));
        assert!(matches!(storage.delete("nope").await, Err(Error::FileNotFound(_))));
        assert!(matches!(storage.info("nope").await, Err(Error::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_skips_directories() {
        let (storage, _dir) = store().await;
        storage.write("b.txt", b"b").await.unwrap();
        storage.write("a.txt", b"a").await.unwrap();
        fs::create_dir(storage.root().join("sub")).await.unwrap();

        assert_eq!(storage.list().await.unwrap(), vec!["a.txt", "b.txt"]);
        // Directories are not files
        assert!(matches!(storage.read("sub").await, Err(Error::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_search_case_insensitive() {
        let (storage, _dir) = store().await;
        for name in ["Report.PDF", "annual_report.txt", "photo.png"] {
            storage.write(name, b"x").await.unwrap();
        }

        assert_eq!(
            storage.search("REPORT").await.unwrap(),
            vec!["Report.PDF", "annual_report.txt"]
        );
        assert!(storage.search("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_info() {
        let (storage, _dir) = store().await;
        storage.write("x.txt", b"hello").await.unwrap();

        let info = storage.info("x.txt").await.unwrap();
        assert_eq!(info.size, 5);
        assert!(info.reply_line().starts_with("INFO:Size=5;Created="));

        storage.delete("x.txt").await.unwrap();
        assert!(storage.list().await.unwrap().is_empty());
    }
}
