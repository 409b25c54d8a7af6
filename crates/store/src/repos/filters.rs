//! Metadata filter repository and working-set evaluation.

use crate::error::StoreResult;
use crate::models::MetadataFilterRow;
use async_trait::async_trait;
use niviz_core::{MetadataKeyName, MetadataValue};

/// Repository for filters on project/dataset pairings.
///
/// All filters on a pairing compose by AND: an entity is in the working set
/// only if it carries every inclusion pair and none of the exclusion pairs.
#[async_trait]
pub trait FilterRepo: Send + Sync {
    /// Add a filter on (key, value), creating the pair if needed.
    /// Fails with `DuplicateFilter` if an identical filter exists.
    async fn add_filter(
        &self,
        project_dataset_id: i64,
        key: &MetadataKeyName,
        value: &MetadataValue,
        is_exclusion: bool,
    ) -> StoreResult<MetadataFilterRow>;

    /// Add a filter on an existing pair.
    async fn add_filter_for(
        &self,
        project_dataset_id: i64,
        metadata_id: i64,
        is_exclusion: bool,
    ) -> StoreResult<MetadataFilterRow>;

    /// Get a filter by ID.
    async fn get_filter(&self, filter_id: i64) -> StoreResult<Option<MetadataFilterRow>>;

    /// List filters on a pairing.
    async fn list_filters(&self, project_dataset_id: i64) -> StoreResult<Vec<MetadataFilterRow>>;

    /// Entity IDs of the pairing's dataset that pass every filter, in ID order.
    /// Evaluated on every call.
    async fn working_set(&self, project_dataset_id: i64) -> StoreResult<Vec<i64>>;
}
