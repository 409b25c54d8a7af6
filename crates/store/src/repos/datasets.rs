//! Dataset repository.

use crate::error::StoreResult;
use crate::models::DatasetRow;
use async_trait::async_trait;

/// Repository for datasets.
#[async_trait]
pub trait DatasetRepo: Send + Sync {
    /// Create a dataset.
    async fn create_dataset(&self, name: Option<&str>) -> StoreResult<DatasetRow>;

    /// Get a dataset by ID.
    async fn get_dataset(&self, dataset_id: i64) -> StoreResult<Option<DatasetRow>>;

    /// List all datasets.
    async fn list_datasets(&self) -> StoreResult<Vec<DatasetRow>>;

    /// Rename a dataset and bump its `updated_at`.
    async fn rename_dataset(&self, dataset_id: i64, name: Option<&str>)
    -> StoreResult<DatasetRow>;
}
