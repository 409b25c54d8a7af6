//! Entity repository.

use crate::error::StoreResult;
use crate::models::EntityRow;
use async_trait::async_trait;

/// Repository for entities. An entity belongs to one dataset for its
/// whole lifetime; there is no re-parenting.
#[async_trait]
pub trait EntityRepo: Send + Sync {
    /// Create an entity in a dataset.
    async fn create_entity(&self, dataset_id: i64) -> StoreResult<EntityRow>;

    /// Get an entity by ID.
    async fn get_entity(&self, entity_id: i64) -> StoreResult<Option<EntityRow>>;

    /// List entities of a dataset in ID order.
    async fn list_entities(&self, dataset_id: i64) -> StoreResult<Vec<EntityRow>>;

    /// Count entities of a dataset.
    async fn count_entities(&self, dataset_id: i64) -> StoreResult<u64>;

    /// Bump `updated_at` to now.
    async fn touch_entity(&self, entity_id: i64) -> StoreResult<EntityRow>;
}
