//! Image hosting collaborator.
//!
//! Clients send images inline as base64 data URIs; the store decodes them
//! to disk and hands back the URL they are served under (`/images/<name>`).
//! This stands in for an external object store: the send-path treats an
//! upload failure as fatal, while group-avatar creation falls back to the
//! default placeholder instead of aborting the group.

use std::path::PathBuf;

use base64::Engine;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// Avatar used when no image was provided or the upload failed.
pub const DEFAULT_GROUP_AVATAR: &str = "/group.png";

#[derive(Debug, Clone)]
pub struct ImageStore {
    base_path: PathBuf,
    max_size: usize,
}

impl ImageStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ApiError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ApiError::ImageStorage(format!(
                "Failed to create image directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Image store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    /// Decode a base64 payload (bare or `data:<mime>;base64,` prefixed),
    /// persist it, and return the URL path it is served under.
    pub async fn store_image(&self, payload: &str) -> Result<String, ApiError> {
        let (extension, encoded) = split_data_uri(payload);

        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| ApiError::BadRequest(format!("Invalid image encoding: {e}")))?;

        if data.is_empty() {
            return Err(ApiError::BadRequest("Empty image".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ApiError::ImageTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let name = format!("{}.{}", Uuid::new_v4(), extension);
        let path = self.base_path.join(&name);

        fs::write(&path, &data)
            .await
            .map_err(|e| ApiError::ImageStorage(format!("Failed to write image {name}: {e}")))?;

        debug!(name = %name, size = data.len(), "Stored image");
        Ok(format!("/images/{name}"))
    }

    /// Best-effort removal of a stored image by its served URL.  Used to
    /// clean up when the write that was going to reference the image
    /// fails after the upload.
    pub async fn remove_image(&self, url: &str) {
        let Some(name) = url.strip_prefix("/images/") else {
            return;
        };
        if let Err(e) = fs::remove_file(self.base_path.join(name)).await {
            warn!(name = %name, error = %e, "Failed to remove orphaned image");
        }
    }

    /// Avatar variant: any failure degrades to the default placeholder.
    pub async fn store_avatar_or_default(&self, payload: Option<&str>) -> String {
        let Some(payload) = payload else {
            return DEFAULT_GROUP_AVATAR.to_string();
        };

        match self.store_image(payload).await {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Avatar upload failed, using placeholder");
                DEFAULT_GROUP_AVATAR.to_string()
            }
        }
    }
}

/// Split an optional `data:image/<ext>;base64,` prefix off the payload,
/// returning the file extension to use and the base64 body.
fn split_data_uri(payload: &str) -> (&str, &str) {
    if let Some(rest) = payload.strip_prefix("data:") {
        if let Some((mime, body)) = rest.split_once(";base64,") {
            let extension = match mime {
                "image/png" => "png",
                "image/jpeg" | "image/jpg" => "jpg",
                "image/gif" => "gif",
                "image/webp" => "webp",
                _ => "bin",
            };
            return (extension, body);
        }
    }
    ("bin", payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (ImageStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path().to_path_buf(), 1024).await.unwrap();
        (store, dir)
    }

    fn png_payload() -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"not-really-a-png");
        format!("data:image/png;base64,{encoded}")
    }

    #[tokio::test]
    async fn store_returns_served_url() {
        let (store, _dir) = test_store().await;

        let url = store.store_image(&png_payload()).await.unwrap();
        assert!(url.starts_with("/images/"));
        assert!(url.ends_with(".png"));

        let name = url.strip_prefix("/images/").unwrap();
        assert!(store.base_path().join(name).exists());
    }

    #[tokio::test]
    async fn remove_image_deletes_the_stored_file() {
        let (store, _dir) = test_store().await;

        let url = store.store_image(&png_payload()).await.unwrap();
        let name = url.strip_prefix("/images/").unwrap().to_string();
        assert!(store.base_path().join(&name).exists());

        store.remove_image(&url).await;
        assert!(!store.base_path().join(&name).exists());

        // non-image URLs and repeated removal are silent no-ops
        store.remove_image(&url).await;
        store.remove_image("/somewhere/else.png").await;
    }

    #[tokio::test]
    async fn invalid_base64_is_a_bad_request() {
        let (store, _dir) = test_store().await;
        let err = store.store_image("data:image/png;base64,???").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn oversized_image_is_rejected() {
        let (store, _dir) = test_store().await;
        let big = base64::engine::general_purpose::STANDARD.encode(vec![0u8; 2048]);
        let err = store.store_image(&big).await.unwrap_err();
        assert!(matches!(err, ApiError::ImageTooLarge { .. }));
    }

    #[tokio::test]
    async fn avatar_failure_falls_back_to_placeholder() {
        let (store, _dir) = test_store().await;

        assert_eq!(store.store_avatar_or_default(None).await, DEFAULT_GROUP_AVATAR);
        assert_eq!(
            store.store_avatar_or_default(Some("not base64 at all!!")).await,
            DEFAULT_GROUP_AVATAR
        );

        let ok = store.store_avatar_or_default(Some(&png_payload())).await;
        assert!(ok.starts_with("/images/"));
    }
}
