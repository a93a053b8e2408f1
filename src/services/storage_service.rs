use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::error::{Error, Result};

const IMAGE_DIR: &str = "images";
const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Owns the bytes behind every image URL the catalog stores.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` and returns the public URL of the new object.
    async fn store(&self, file_name: &str, bytes: Bytes) -> Result<String>;
    async fn delete(&self, url: &str) -> Result<()>;
}

/// Outcome of a best-effort image purge after a committed deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub requested: usize,
    pub failed: usize,
}

/// Requests deletion of every distinct URL. Failures are logged and counted, never returned.
pub async fn purge_images(storage: &dyn ObjectStorage, urls: Vec<String>) -> CleanupReport {
    let urls: BTreeSet<String> = urls.into_iter().filter(|u| !u.trim().is_empty()).collect();
    let mut report = CleanupReport {
        requested: urls.len(),
        failed: 0,
    };
    for url in urls {
        if let Err(e) = storage.delete(&url).await {
            tracing::warn!(url = %url, error = %e, "failed to delete stored image");
            report.failed += 1;
        }
    }
    report
}

/// Checks the declared extension against the file signature and returns it normalized.
pub fn image_extension(file_name: &str, data: &[u8]) -> Result<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Error::InvalidInput(format!(
            "File type not allowed. Allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    if data.is_empty() {
        return Err(Error::InvalidInput("Empty file".into()));
    }

    let signature_ok = match ext.as_str() {
        "jpg" | "jpeg" => data.starts_with(&[0xFF, 0xD8]),
        "png" => data.starts_with(&[0x89, 0x50, 0x4E, 0x47]),
        "gif" => data.starts_with(b"GIF8"),
        "webp" => data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP",
        _ => false,
    };
    if !signature_ok {
        return Err(Error::InvalidInput(format!("Invalid {} file content", ext)));
    }
    Ok(ext)
}

/// Filesystem-backed store whose objects are served under `<base>/uploads/`.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url_prefix(&self) -> String {
        format!("{}/uploads/", self.public_base_url)
    }

    /// Maps an issued URL back to its file. `None` for foreign URLs.
    fn path_for(&self, url: &str) -> Result<Option<PathBuf>> {
        let Some(relative) = url.strip_prefix(&self.url_prefix()) else {
            return Ok(None);
        };
        let relative = Path::new(relative);
        let safe = relative.components().count() > 0
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::InvalidInput(format!("Invalid object URL: {}", url)));
        }
        Ok(Some(self.root.join(relative)))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn store(&self, file_name: &str, bytes: Bytes) -> Result<String> {
        let ext = image_extension(file_name, &bytes)?;

        let dir = self.root.join(IMAGE_DIR);
        fs::create_dir_all(&dir).await?;
        let saved = format!("{}.{}", Uuid::new_v4(), ext);
        fs::write(dir.join(&saved), &bytes).await.map_err(|e| {
            tracing::error!("Failed to write image file: {}", e);
            Error::Storage(format!("Failed to save file: {}", e))
        })?;

        Ok(format!("{}{}/{}", self.url_prefix(), IMAGE_DIR, saved))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let Some(path) = self.path_for(url)? else {
            tracing::debug!(url = %url, "skipping deletion of foreign image URL");
            return Ok(());
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete {}: {}", url, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("assessment-storage-{}", Uuid::new_v4()))
    }

    #[test]
    fn extension_must_match_signature() {
        assert_eq!(image_extension("Photo.PNG", PNG).unwrap(), "png");
        assert!(matches!(
            image_extension("photo.png", b"GIF89a"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            image_extension("notes.pdf", b"%PDF-1.4"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn only_issued_urls_map_to_paths() {
        let storage = LocalObjectStorage::new("/srv/uploads", "http://cdn.local/");
        assert_eq!(
            storage
                .path_for("http://cdn.local/uploads/images/a.png")
                .unwrap(),
            Some(PathBuf::from("/srv/uploads/images/a.png"))
        );
        assert_eq!(storage.path_for("https://elsewhere/a.png").unwrap(), None);
        assert!(storage
            .path_for("http://cdn.local/uploads/../etc/passwd")
            .is_err());
    }

    #[tokio::test]
    async fn stored_images_can_be_deleted() {
        let root = temp_root();
        let storage = LocalObjectStorage::new(&root, "http://localhost:8080");

        let url = storage
            .store("cat.png", Bytes::from_static(PNG))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:8080/uploads/images/"));
        let path = storage.path_for(&url).unwrap().unwrap();
        assert!(path.exists());

        storage.delete(&url).await.unwrap();
        assert!(!path.exists());
        // Already gone and foreign URLs are both no-ops.
        storage.delete(&url).await.unwrap();
        storage.delete("https://elsewhere/x.png").await.unwrap();

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn purge_counts_failures_without_failing() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_delete()
            .times(2)
            .returning(|url| {
                if url.ends_with("bad.png") {
                    Err(Error::Storage("unreachable".into()))
                } else {
                    Ok(())
                }
            });

        let report = purge_images(
            &storage,
            vec![
                "http://x/uploads/images/ok.png".into(),
                "http://x/uploads/images/bad.png".into(),
                "http://x/uploads/images/ok.png".into(),
            ],
        )
        .await;
        assert_eq!(report, CleanupReport { requested: 2, failed: 1 });
    }
}
