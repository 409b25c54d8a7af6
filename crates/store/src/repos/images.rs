//! Image repository.

use crate::error::StoreResult;
use crate::models::{EntityImageRow, ImageRow};
use async_trait::async_trait;
use niviz_core::ImagePath;

/// Repository for images and their entity associations.
#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// Resolve-or-create the image for `path` and associate it with the entity,
    /// atomically. Fails with `AlreadyAttached` if the association exists.
    async fn attach_image(&self, entity_id: i64, path: &ImagePath)
    -> StoreResult<EntityImageRow>;

    /// Remove an association. The image row is kept even if unreferenced.
    async fn detach_image(&self, entity_id: i64, image_id: i64) -> StoreResult<()>;

    /// Get an image by ID.
    async fn get_image(&self, image_id: i64) -> StoreResult<Option<ImageRow>>;

    /// Get an image by path.
    async fn get_image_by_path(&self, path: &str) -> StoreResult<Option<ImageRow>>;

    /// List images attached to an entity.
    async fn list_entity_images(&self, entity_id: i64) -> StoreResult<Vec<ImageRow>>;

    /// List entity IDs using an image.
    async fn list_image_entities(&self, image_id: i64) -> StoreResult<Vec<i64>>;

    /// Number of entities using an image.
    async fn image_reference_count(&self, image_id: i64) -> StoreResult<u64>;

    /// Maintenance: delete images with no associations. Returns the count.
    async fn delete_orphaned_images(&self) -> StoreResult<u64>;
}
