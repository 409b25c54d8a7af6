//! Cascade deletion.

use crate::error::StoreResult;
use crate::models::CascadeDeleteStats;
use async_trait::async_trait;
use niviz_core::ResourceRef;

/// Repository for deleting any catalog row with its dependents.
#[async_trait]
pub trait CascadeRepo: Send + Sync {
    /// Delete a row and everything that references it, in one transaction.
    ///
    /// Fails with `NotFound` if the row does not exist. Images survive the
    /// deletion of entities that use them.
    async fn delete(&self, resource: ResourceRef) -> StoreResult<CascadeDeleteStats>;
}
