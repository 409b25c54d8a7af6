//! Project repository and project/dataset pairings.

use crate::error::StoreResult;
use crate::models::{CascadeDeleteStats, ProjectDatasetRow, ProjectRow};
use async_trait::async_trait;

/// Repository for projects and the datasets attached to them.
#[async_trait]
pub trait ProjectRepo: Send + Sync {
    /// Create a project.
    async fn create_project(&self, name: &str) -> StoreResult<ProjectRow>;

    /// Get a project by ID.
    async fn get_project(&self, project_id: i64) -> StoreResult<Option<ProjectRow>>;

    /// List all projects.
    async fn list_projects(&self) -> StoreResult<Vec<ProjectRow>>;

    /// Rename a project and bump its `updated_at`.
    async fn rename_project(&self, project_id: i64, name: &str) -> StoreResult<ProjectRow>;

    /// Attach a dataset to a project.
    /// Fails with `AlreadyAttached` if the pairing exists.
    async fn attach_dataset(
        &self,
        project_id: i64,
        dataset_id: i64,
    ) -> StoreResult<ProjectDatasetRow>;

    /// Remove a pairing and its filters. The dataset is untouched.
    /// Fails with `NotFound` if the pairing does not exist.
    async fn detach_dataset(
        &self,
        project_id: i64,
        dataset_id: i64,
    ) -> StoreResult<CascadeDeleteStats>;

    /// Get a pairing by ID.
    async fn get_project_dataset(
        &self,
        project_dataset_id: i64,
    ) -> StoreResult<Option<ProjectDatasetRow>>;

    /// Get the pairing of a project and a dataset.
    async fn find_project_dataset(
        &self,
        project_id: i64,
        dataset_id: i64,
    ) -> StoreResult<Option<ProjectDatasetRow>>;

    /// List pairings of a project.
    async fn list_project_datasets(&self, project_id: i64) -> StoreResult<Vec<ProjectDatasetRow>>;

    /// List pairings of a dataset across projects.
    async fn list_dataset_projects(&self, dataset_id: i64) -> StoreResult<Vec<ProjectDatasetRow>>;
}
