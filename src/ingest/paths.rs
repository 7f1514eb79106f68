//! Write-once upload tree
//!
//! Originals land at `uploads/YYYY/MM/DD/{sha8}_{unix_ms}_{safename}{ext}`;
//! derived artifacts (rendered pages, table/picture images) live under
//! `uploads/YYYY/MM/DD/{sha}/{category}/`. Nothing is ever rewritten.

use crate::error::Result;
use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-가-힣]").unwrap());

const SAFE_NAME_MAX: usize = 100;

/// A persisted original
#[derive(Debug, Clone)]
pub struct StoredOriginal {
    /// Absolute path on disk
    pub abs: PathBuf,
    /// Path relative to the uploads root
    pub rel: String,
    /// SHA-256 of the file bytes
    pub sha256: String,
    /// Date partition (`YYYY/MM/DD`) this upload landed in
    pub date_dir: String,
}

/// Handle to the upload tree
pub struct UploadStore {
    root: PathBuf,
}

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Strip characters outside `[\w.\-가-힣]` and cap the length.
pub fn safe_name(name: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(name, "");
    let capped: String = cleaned.chars().take(SAFE_NAME_MAX).collect();
    if capped.is_empty() {
        "file".to_string()
    } else {
        capped
    }
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the original bytes into the date-partitioned tree.
    pub async fn store_original(&self, bytes: &[u8], original_name: &str) -> Result<StoredOriginal> {
        let sha256 = sha256_hex(bytes);
        let now = Utc::now();
        let date_dir = now.format("%Y/%m/%d").to_string();

        let (stem, ext) = match original_name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{}", ext.to_lowercase())),
            None => (original_name, String::new()),
        };
        let file_name = format!(
            "{}_{}_{}{}",
            &sha256[..8],
            now.timestamp_millis(),
            safe_name(stem),
            ext
        );

        let rel = format!("{}/{}", date_dir, file_name);
        let abs = self.root.join(&rel);
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&abs, bytes).await?;
        debug!("Stored original at {}", abs.display());

        Ok(StoredOriginal {
            abs,
            rel,
            sha256,
            date_dir,
        })
    }

    /// Directory for derived artifacts of one upload
    pub fn derived_dir(&self, stored: &StoredOriginal, category: &str) -> PathBuf {
        self.root
            .join(&stored.date_dir)
            .join(&stored.sha256)
            .join(category)
    }

    /// Move an extractor-produced file into the upload tree; returns the
    /// relative path and a serving URL.
    pub async fn adopt_asset(
        &self,
        src: &Path,
        stored: &StoredOriginal,
        category: &str,
    ) -> Result<(String, String)> {
        let dir = self.derived_dir(stored, category);
        tokio::fs::create_dir_all(&dir).await?;

        let name = src
            .file_name()
            .map(|n| safe_name(&n.to_string_lossy()))
            .unwrap_or_else(|| "asset".to_string());
        let dest = dir.join(&name);

        // Rename when possible; extractors may write on another filesystem.
        if tokio::fs::rename(src, &dest).await.is_err() {
            tokio::fs::copy(src, &dest).await?;
            let _ = tokio::fs::remove_file(src).await;
        }

        let rel = format!(
            "{}/{}/{}/{}",
            stored.date_dir, stored.sha256, category, name
        );
        let url = format!("/uploads/{}", rel);
        Ok((rel, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_safe_name_strips_and_caps() {
        assert_eq!(safe_name("분기 보고서(최종).pdf"), "분기보고서최종.pdf");
        assert_eq!(safe_name("a/b\\c:d"), "abcd");
        assert_eq!(safe_name("!!!"), "file");

        let long = "x".repeat(300);
        assert_eq!(safe_name(&long).chars().count(), 100);
    }

    #[test]
    fn test_sha256_hex() {
        // Known digest of the empty string
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_store_original_layout() {
        let tmp = TempDir::new().unwrap();
        let store = UploadStore::new(tmp.path());

        let stored = store
            .store_original(b"hello", "분기 보고서.PDF")
            .await
            .unwrap();

        assert!(stored.abs.exists());
        assert!(stored.rel.ends_with(".pdf"));
        assert!(stored.rel.starts_with(&stored.date_dir));
        assert_eq!(stored.sha256.len(), 64);
        assert!(stored
            .abs
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(&stored.sha256[..8]));
    }

    #[tokio::test]
    async fn test_adopt_asset_moves_file() {
        let tmp = TempDir::new().unwrap();
        let store = UploadStore::new(tmp.path().join("uploads"));
        let stored = store.store_original(b"doc", "doc.pdf").await.unwrap();

        let scratch = tmp.path().join("table-1.jpg");
        std::fs::write(&scratch, b"img").unwrap();

        let (rel, url) = store
            .adopt_asset(&scratch, &stored, "tables")
            .await
            .unwrap();

        assert!(!scratch.exists());
        assert!(store.root().join(&rel).exists());
        assert!(url.starts_with("/uploads/"));
        assert!(rel.contains("/tables/"));
    }
}
