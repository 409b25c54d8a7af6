//! Permission grant repository.
//!
//! A grant is the unique row for one (user, resource) pair. Absence of a
//! row means no access.

use crate::error::StoreResult;
use crate::models::{DatasetPermissionRow, ProjectPermissionRow};
use async_trait::async_trait;
use niviz_core::CapabilitySet;

/// Repository for project and dataset grants.
#[async_trait]
pub trait GrantRepo: Send + Sync {
    /// Insert a project grant. Fails with `DuplicateGrant` if one exists.
    async fn grant_project(
        &self,
        user_id: i64,
        project_id: i64,
        capabilities: CapabilitySet,
    ) -> StoreResult<ProjectPermissionRow>;

    /// Insert or replace a project grant.
    async fn set_project_grant(
        &self,
        user_id: i64,
        project_id: i64,
        capabilities: CapabilitySet,
    ) -> StoreResult<ProjectPermissionRow>;

    /// Get the grant for a user on a project.
    async fn get_project_grant(
        &self,
        user_id: i64,
        project_id: i64,
    ) -> StoreResult<Option<ProjectPermissionRow>>;

    /// List grants on a project.
    async fn list_project_grants(&self, project_id: i64) -> StoreResult<Vec<ProjectPermissionRow>>;

    /// List a user's project grants.
    async fn list_user_project_grants(
        &self,
        user_id: i64,
    ) -> StoreResult<Vec<ProjectPermissionRow>>;

    /// Remove a project grant.
    async fn revoke_project_grant(&self, user_id: i64, project_id: i64) -> StoreResult<()>;

    /// Insert a dataset grant. Fails with `DuplicateGrant` if one exists.
    async fn grant_dataset(
        &self,
        user_id: i64,
        dataset_id: i64,
        capabilities: CapabilitySet,
    ) -> StoreResult<DatasetPermissionRow>;

    /// Insert or replace a dataset grant.
    async fn set_dataset_grant(
        &self,
        user_id: i64,
        dataset_id: i64,
        capabilities: CapabilitySet,
    ) -> StoreResult<DatasetPermissionRow>;

    /// Get the grant for a user on a dataset.
    async fn get_dataset_grant(
        &self,
        user_id: i64,
        dataset_id: i64,
    ) -> StoreResult<Option<DatasetPermissionRow>>;

    /// List grants on a dataset.
    async fn list_dataset_grants(&self, dataset_id: i64) -> StoreResult<Vec<DatasetPermissionRow>>;

    /// List a user's dataset grants.
    async fn list_user_dataset_grants(
        &self,
        user_id: i64,
    ) -> StoreResult<Vec<DatasetPermissionRow>>;

    /// Remove a dataset grant.
    async fn revoke_dataset_grant(&self, user_id: i64, dataset_id: i64) -> StoreResult<()>;
}
