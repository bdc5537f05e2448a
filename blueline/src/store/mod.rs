//! Object-storage access for pipeline artifacts.
//!
//! Storage keys are deterministic functions of (org, project, plan, sheet,
//! artifact name), which is what makes re-running a step whose memo record
//! was lost harmless: the write lands on the same key.

use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Scope of one plan inside the storage hierarchy.
#[derive(Debug, Clone)]
pub struct PlanScope {
    /// Owning organization.
    pub org_id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// The plan (document) id.
    pub plan_id: String,
}

impl PlanScope {
    /// Key of the uploaded source document.
    #[must_use]
    pub fn source_key(&self) -> String {
        format!(
            "orgs/{}/projects/{}/plans/{}/source.pdf",
            self.org_id, self.project_id, self.plan_id
        )
    }

    /// Key of a per-sheet artifact.
    #[must_use]
    pub fn sheet_artifact_key(&self, sheet_id: &str, artifact: &str) -> String {
        format!(
            "orgs/{}/projects/{}/plans/{}/sheets/{}/{}",
            self.org_id, self.project_id, self.plan_id, sheet_id, artifact
        )
    }
}

/// Key/blob collaborator interface.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Gets a blob, returning `None` when the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the store itself fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Puts a blob under the given key with a content type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the write fails.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError>;
}

/// In-memory blob store for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl InMemoryBlobStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if no blobs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Returns the content type recorded for a key, if any.
    #[must_use]
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.blobs.read().get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.read().get(key).map(|(bytes, _)| bytes.clone()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        self.blobs
            .write()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }
}

/// Typed read/write helpers over the blob store.
#[derive(Clone)]
pub struct ArtifactStore {
    blobs: Arc<dyn BlobStore>,
}

impl ArtifactStore {
    /// Creates an accessor over the given blob store.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Fetches a blob that the caller requires to exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for a missing key, which call sites
    /// convert into a fatal step failure.
    pub async fn fetch_required(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .get(key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    /// Fetches the plan's uploaded source document.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the source was never uploaded.
    pub async fn fetch_source(&self, scope: &PlanScope) -> Result<Vec<u8>, StoreError> {
        self.fetch_required(&scope.source_key()).await
    }

    /// Fetches a sheet's rendered raster image.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the render stage has not produced it.
    pub async fn fetch_sheet_image(
        &self,
        scope: &PlanScope,
        sheet_id: &str,
    ) -> Result<Vec<u8>, StoreError> {
        self.fetch_required(&scope.sheet_artifact_key(sheet_id, "image.png"))
            .await
    }

    /// Stores a sheet's rendered raster image.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] when the write fails.
    pub async fn put_sheet_image(
        &self,
        scope: &PlanScope,
        sheet_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.blobs
            .put(
                &scope.sheet_artifact_key(sheet_id, "image.png"),
                bytes,
                "image/png",
            )
            .await
    }

    /// Stores a sheet's tile pyramid archive.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] when the write fails.
    pub async fn put_tile_archive(
        &self,
        scope: &PlanScope,
        sheet_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.blobs
            .put(
                &scope.sheet_artifact_key(sheet_id, "tiles.tar"),
                bytes,
                "application/x-tar",
            )
            .await
    }
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> PlanScope {
        PlanScope {
            org_id: Uuid::nil(),
            project_id: Uuid::nil(),
            plan_id: "plan-7".to_string(),
        }
    }

    #[test]
    fn test_keys_are_deterministic() {
        let scope = scope();
        assert_eq!(
            scope.source_key(),
            format!(
                "orgs/{0}/projects/{0}/plans/plan-7/source.pdf",
                Uuid::nil()
            )
        );
        assert_eq!(
            scope.sheet_artifact_key("s1", "image.png"),
            scope.sheet_artifact_key("s1", "image.png")
        );
        assert_ne!(
            scope.sheet_artifact_key("s1", "image.png"),
            scope.sheet_artifact_key("s2", "image.png")
        );
    }

    #[tokio::test]
    async fn test_fetch_required_missing_is_not_found() {
        let store = ArtifactStore::new(Arc::new(InMemoryBlobStore::new()));
        let result = store.fetch_source(&scope()).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_sheet_image_roundtrip() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = ArtifactStore::new(blobs.clone());
        let scope = scope();

        store
            .put_sheet_image(&scope, "s1", vec![0x89, 0x50])
            .await
            .unwrap();

        let bytes = store.fetch_sheet_image(&scope, "s1").await.unwrap();
        assert_eq!(bytes, vec![0x89, 0x50]);
        assert_eq!(
            blobs.content_type(&scope.sheet_artifact_key("s1", "image.png")),
            Some("image/png".to_string())
        );
    }

    #[tokio::test]
    async fn test_overwrite_same_key_is_idempotent() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = ArtifactStore::new(blobs.clone());
        let scope = scope();

        store.put_sheet_image(&scope, "s1", vec![1]).await.unwrap();
        store.put_sheet_image(&scope, "s1", vec![1]).await.unwrap();

        assert_eq!(blobs.len(), 1);
    }
}
