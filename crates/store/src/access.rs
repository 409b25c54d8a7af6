//! Permission resolution and permission-checked catalog operations.
//!
//! `AccessControl` wraps a store and answers "what may this user do on this
//! project or dataset". Resolution fails closed: a user with no grant row
//! holds the empty set. Global administrators hold every capability that
//! applies to the resource kind, regardless of grant rows.

use crate::error::{StoreError, StoreResult};
use crate::models::{
    CascadeDeleteStats, DatasetRow, EntityImageRow, EntityMetadataRow, EntityRow, GrantRow,
    MetadataFilterRow, ProjectDatasetRow, ProjectRow,
};
use crate::store::CatalogStore;
use niviz_core::config::PermissionsConfig;
use niviz_core::{
    Capability, CapabilitySet, ImagePath, MetadataKeyName, MetadataValue, ResourceKind,
    ResourceRef,
};
use std::sync::Arc;

const MODIFY: &[Capability] = &[Capability::Modify, Capability::Admin];

/// Permission-aware facade over a catalog store.
#[derive(Clone)]
pub struct AccessControl {
    store: Arc<dyn CatalogStore>,
    config: PermissionsConfig,
}

impl AccessControl {
    pub fn new(store: Arc<dyn CatalogStore>, config: PermissionsConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store, for unchecked operations.
    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Effective capabilities of `user_id` on a project or dataset.
    ///
    /// Fails with `NotFound` if the user or the resource does not exist.
    pub async fn resolve_permissions(
        &self,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
    ) -> StoreResult<CapabilitySet> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        self.ensure_resource(kind, resource_id).await?;

        if user.is_admin {
            return Ok(CapabilitySet::full(kind));
        }

        let capabilities = match kind {
            ResourceKind::Project => self
                .store
                .get_project_grant(user_id, resource_id)
                .await?
                .map(|row| row.capabilities()),
            ResourceKind::Dataset => self
                .store
                .get_dataset_grant(user_id, resource_id)
                .await?
                .map(|row| row.capabilities()),
        };

        Ok(capabilities.unwrap_or_default())
    }

    /// True if the user holds `capability` on the resource.
    pub async fn check(
        &self,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
        capability: Capability,
    ) -> StoreResult<bool> {
        let held = self.resolve_permissions(user_id, kind, resource_id).await?;
        Ok(held.contains(capability))
    }

    /// Require one capability, returning the resolved set on success.
    pub async fn require(
        &self,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
        capability: Capability,
    ) -> StoreResult<CapabilitySet> {
        self.require_any(user_id, kind, resource_id, &[capability])
            .await
    }

    /// Require at least one of `capabilities`.
    pub async fn require_any(
        &self,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
        capabilities: &[Capability],
    ) -> StoreResult<CapabilitySet> {
        let held = self.resolve_permissions(user_id, kind, resource_id).await?;
        if held.contains_any(capabilities) {
            return Ok(held);
        }

        tracing::warn!(
            user_id,
            kind = %kind,
            resource_id,
            held = %held,
            required = ?capabilities,
            "Permission denied"
        );
        Err(StoreError::PermissionDenied {
            user_id,
            kind,
            resource_id,
            required: capabilities.to_vec(),
        })
    }

    // -------------------------------------------------------------------------
    // Grants
    // -------------------------------------------------------------------------

    /// Insert a grant. Fails with `DuplicateGrant` if the user already has one.
    pub async fn grant(
        &self,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
        capabilities: CapabilitySet,
    ) -> StoreResult<GrantRow> {
        let capabilities = self.prepare(kind, capabilities)?;
        let row: GrantRow = match kind {
            ResourceKind::Project => self
                .store
                .grant_project(user_id, resource_id, capabilities)
                .await?
                .into(),
            ResourceKind::Dataset => self
                .store
                .grant_dataset(user_id, resource_id, capabilities)
                .await?
                .into(),
        };
        tracing::debug!(user_id, kind = %kind, resource_id, capabilities = %capabilities, "Grant created");
        Ok(row)
    }

    /// Insert or replace a grant.
    pub async fn set_grant(
        &self,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
        capabilities: CapabilitySet,
    ) -> StoreResult<GrantRow> {
        let capabilities = self.prepare(kind, capabilities)?;
        let row: GrantRow = match kind {
            ResourceKind::Project => self
                .store
                .set_project_grant(user_id, resource_id, capabilities)
                .await?
                .into(),
            ResourceKind::Dataset => self
                .store
                .set_dataset_grant(user_id, resource_id, capabilities)
                .await?
                .into(),
        };
        Ok(row)
    }

    pub async fn get_grant(
        &self,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
    ) -> StoreResult<Option<GrantRow>> {
        let row = match kind {
            ResourceKind::Project => self
                .store
                .get_project_grant(user_id, resource_id)
                .await?
                .map(GrantRow::from),
            ResourceKind::Dataset => self
                .store
                .get_dataset_grant(user_id, resource_id)
                .await?
                .map(GrantRow::from),
        };
        Ok(row)
    }

    pub async fn list_grants(
        &self,
        kind: ResourceKind,
        resource_id: i64,
    ) -> StoreResult<Vec<GrantRow>> {
        let rows = match kind {
            ResourceKind::Project => self
                .store
                .list_project_grants(resource_id)
                .await?
                .into_iter()
                .map(GrantRow::from)
                .collect(),
            ResourceKind::Dataset => self
                .store
                .list_dataset_grants(resource_id)
                .await?
                .into_iter()
                .map(GrantRow::from)
                .collect(),
        };
        Ok(rows)
    }

    pub async fn revoke_grant(
        &self,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
    ) -> StoreResult<()> {
        match kind {
            ResourceKind::Project => self.store.revoke_project_grant(user_id, resource_id).await,
            ResourceKind::Dataset => self.store.revoke_dataset_grant(user_id, resource_id).await,
        }
    }

    /// Upsert a grant on behalf of `actor_id`, who must hold admin on the resource.
    pub async fn set_grant_as(
        &self,
        actor_id: i64,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
        capabilities: CapabilitySet,
    ) -> StoreResult<GrantRow> {
        self.require(actor_id, kind, resource_id, Capability::Admin)
            .await?;
        self.set_grant(user_id, kind, resource_id, capabilities)
            .await
    }

    /// Revoke a grant on behalf of `actor_id`, who must hold admin on the resource.
    pub async fn revoke_grant_as(
        &self,
        actor_id: i64,
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
    ) -> StoreResult<()> {
        self.require(actor_id, kind, resource_id, Capability::Admin)
            .await?;
        self.revoke_grant(user_id, kind, resource_id).await
    }

    // -------------------------------------------------------------------------
    // Checked operations
    // -------------------------------------------------------------------------

    /// Attach a dataset to a project. Requires share or admin on the dataset
    /// and modify or admin on the project.
    pub async fn attach_dataset_as(
        &self,
        actor_id: i64,
        project_id: i64,
        dataset_id: i64,
    ) -> StoreResult<ProjectDatasetRow> {
        self.require_any(
            actor_id,
            ResourceKind::Dataset,
            dataset_id,
            &[Capability::Share, Capability::Admin],
        )
        .await?;
        self.require_any(
            actor_id,
            ResourceKind::Project,
            project_id,
            &[Capability::Modify, Capability::Admin],
        )
        .await?;
        self.store.attach_dataset(project_id, dataset_id).await
    }

    /// Detach a dataset. Requires modify or admin on the project.
    pub async fn detach_dataset_as(
        &self,
        actor_id: i64,
        project_id: i64,
        dataset_id: i64,
    ) -> StoreResult<CascadeDeleteStats> {
        self.require_any(
            actor_id,
            ResourceKind::Project,
            project_id,
            &[Capability::Modify, Capability::Admin],
        )
        .await?;
        self.store.detach_dataset(project_id, dataset_id).await
    }

    /// Create a project over `dataset_ids` and make the actor its administrator.
    ///
    /// The actor needs `create_project` on every dataset; with no datasets
    /// only a global administrator may create a project. If granting or
    /// attaching fails the new project is deleted again.
    pub async fn create_project_as(
        &self,
        actor_id: i64,
        name: &str,
        dataset_ids: &[i64],
    ) -> StoreResult<ProjectRow> {
        if dataset_ids.is_empty() {
            self.require_global_admin(actor_id, "create a project without datasets")
                .await?;
        }
        for dataset_id in dataset_ids {
            self.require(
                actor_id,
                ResourceKind::Dataset,
                *dataset_id,
                Capability::CreateProject,
            )
            .await?;
        }

        let project = self.store.create_project(name).await?;
        if let Err(err) = self.populate_project(actor_id, project.id, dataset_ids).await {
            if let Err(cleanup) = self.store.delete(ResourceRef::Project(project.id)).await {
                tracing::error!(
                    project_id = project.id,
                    error = %cleanup,
                    "Failed to remove partially created project"
                );
            }
            return Err(err);
        }

        tracing::info!(
            project_id = project.id,
            actor_id,
            datasets = dataset_ids.len(),
            "Project created"
        );
        Ok(project)
    }

    async fn populate_project(
        &self,
        actor_id: i64,
        project_id: i64,
        dataset_ids: &[i64],
    ) -> StoreResult<()> {
        self.store
            .set_project_grant(
                actor_id,
                project_id,
                CapabilitySet::full(ResourceKind::Project),
            )
            .await?;
        for dataset_id in dataset_ids {
            self.store.attach_dataset(project_id, *dataset_id).await?;
        }
        Ok(())
    }

    /// Working set of a pairing. Requires view on both the project and the dataset.
    pub async fn working_set_as(
        &self,
        actor_id: i64,
        project_dataset_id: i64,
    ) -> StoreResult<Vec<i64>> {
        let pairing = self.pairing(project_dataset_id).await?;
        self.require(
            actor_id,
            ResourceKind::Project,
            pairing.project_id,
            Capability::View,
        )
        .await?;
        self.require(
            actor_id,
            ResourceKind::Dataset,
            pairing.dataset_id,
            Capability::View,
        )
        .await?;
        self.store.working_set(project_dataset_id).await
    }

    /// Cascade-delete a row on behalf of `actor_id`.
    ///
    /// | Row | Requirement |
    /// |---|---|
    /// | project, dataset | delete or admin on it |
    /// | entity | modify or admin on its dataset |
    /// | pairing, filter | modify or admin on the pairing's project |
    /// | anything else | global administrator |
    pub async fn delete_as(
        &self,
        actor_id: i64,
        resource: ResourceRef,
    ) -> StoreResult<CascadeDeleteStats> {
        const DELETE: &[Capability] = &[Capability::Delete, Capability::Admin];

        match resource {
            ResourceRef::Project(id) => {
                self.require_any(actor_id, ResourceKind::Project, id, DELETE)
                    .await?;
            }
            ResourceRef::Dataset(id) => {
                self.require_any(actor_id, ResourceKind::Dataset, id, DELETE)
                    .await?;
            }
            ResourceRef::Entity(id) => {
                self.require_on_entity(actor_id, id, MODIFY).await?;
            }
            ResourceRef::ProjectDataset(id) => {
                self.require_on_pairing(actor_id, id, MODIFY).await?;
            }
            ResourceRef::MetadataFilter(id) => {
                let filter = self
                    .store
                    .get_filter(id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("metadata filter {id}")))?;
                self.require_on_pairing(actor_id, filter.project_dataset_id, MODIFY)
                    .await?;
            }
            ResourceRef::User(_)
            | ResourceRef::Image(_)
            | ResourceRef::MetadataKey(_)
            | ResourceRef::Metadata(_) => {
                self.require_global_admin(actor_id, &format!("delete {resource}"))
                    .await?;
            }
        }

        self.store.delete(resource).await
    }

    /// Rename a project. Requires modify or admin on it.
    pub async fn rename_project_as(
        &self,
        actor_id: i64,
        project_id: i64,
        name: &str,
    ) -> StoreResult<ProjectRow> {
        self.require_any(actor_id, ResourceKind::Project, project_id, MODIFY)
            .await?;
        self.store.rename_project(project_id, name).await
    }

    /// Create a dataset. No grant can cover a dataset that does not exist
    /// yet, so this is reserved to global administrators.
    pub async fn create_dataset_as(
        &self,
        actor_id: i64,
        name: Option<&str>,
    ) -> StoreResult<DatasetRow> {
        self.require_global_admin(actor_id, "create a dataset")
            .await?;
        self.store.create_dataset(name).await
    }

    /// Rename a dataset. Requires modify or admin on it.
    pub async fn rename_dataset_as(
        &self,
        actor_id: i64,
        dataset_id: i64,
        name: Option<&str>,
    ) -> StoreResult<DatasetRow> {
        self.require_any(actor_id, ResourceKind::Dataset, dataset_id, MODIFY)
            .await?;
        self.store.rename_dataset(dataset_id, name).await
    }

    /// Create an entity. Requires modify or admin on the dataset.
    pub async fn create_entity_as(&self, actor_id: i64, dataset_id: i64) -> StoreResult<EntityRow> {
        self.require_any(actor_id, ResourceKind::Dataset, dataset_id, MODIFY)
            .await?;
        self.store.create_entity(dataset_id).await
    }

    /// Attach an image. Requires modify or admin on the entity's dataset.
    pub async fn attach_image_as(
        &self,
        actor_id: i64,
        entity_id: i64,
        path: &ImagePath,
    ) -> StoreResult<EntityImageRow> {
        self.require_on_entity(actor_id, entity_id, MODIFY).await?;
        self.store.attach_image(entity_id, path).await
    }

    /// Detach an image. Requires modify or admin on the entity's dataset.
    pub async fn detach_image_as(
        &self,
        actor_id: i64,
        entity_id: i64,
        image_id: i64,
    ) -> StoreResult<()> {
        self.require_on_entity(actor_id, entity_id, MODIFY).await?;
        self.store.detach_image(entity_id, image_id).await
    }

    /// Tag an entity. Requires modify or admin on the entity's dataset.
    pub async fn tag_entity_as(
        &self,
        actor_id: i64,
        entity_id: i64,
        key: &MetadataKeyName,
        value: &MetadataValue,
    ) -> StoreResult<EntityMetadataRow> {
        self.require_on_entity(actor_id, entity_id, MODIFY).await?;
        self.store.tag_entity(entity_id, key, value).await
    }

    /// Remove a tag. Requires modify or admin on the entity's dataset.
    pub async fn untag_entity_as(
        &self,
        actor_id: i64,
        entity_id: i64,
        metadata_id: i64,
    ) -> StoreResult<()> {
        self.require_on_entity(actor_id, entity_id, MODIFY).await?;
        self.store.untag_entity(entity_id, metadata_id).await
    }

    /// Add a filter. Requires modify or admin on the pairing's project.
    pub async fn add_filter_as(
        &self,
        actor_id: i64,
        project_dataset_id: i64,
        key: &MetadataKeyName,
        value: &MetadataValue,
        is_exclusion: bool,
    ) -> StoreResult<MetadataFilterRow> {
        self.require_on_pairing(actor_id, project_dataset_id, MODIFY)
            .await?;
        self.store
            .add_filter(project_dataset_id, key, value, is_exclusion)
            .await
    }

    /// List a pairing's filters. Requires view on the pairing's project.
    pub async fn list_filters_as(
        &self,
        actor_id: i64,
        project_dataset_id: i64,
    ) -> StoreResult<Vec<MetadataFilterRow>> {
        self.require_on_pairing(actor_id, project_dataset_id, &[Capability::View])
            .await?;
        self.store.list_filters(project_dataset_id).await
    }

    /// Require one of `capabilities` on the dataset owning `entity_id`.
    pub async fn require_on_entity(
        &self,
        actor_id: i64,
        entity_id: i64,
        capabilities: &[Capability],
    ) -> StoreResult<EntityRow> {
        let entity = self
            .store
            .get_entity(entity_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("entity {entity_id}")))?;
        self.require_any(actor_id, ResourceKind::Dataset, entity.dataset_id, capabilities)
            .await?;
        Ok(entity)
    }

    /// Require one of `capabilities` on the project of a pairing.
    pub async fn require_on_pairing(
        &self,
        actor_id: i64,
        project_dataset_id: i64,
        capabilities: &[Capability],
    ) -> StoreResult<ProjectDatasetRow> {
        let pairing = self.pairing(project_dataset_id).await?;
        self.require_any(actor_id, ResourceKind::Project, pairing.project_id, capabilities)
            .await?;
        Ok(pairing)
    }

    /// Require the actor to be a global administrator.
    pub async fn require_global_admin(&self, actor_id: i64, action: &str) -> StoreResult<()> {
        let actor = self
            .store
            .get_user(actor_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {actor_id}")))?;
        if actor.is_admin {
            return Ok(());
        }

        tracing::warn!(user_id = actor_id, action, "Administrator required");
        Err(StoreError::AdminRequired {
            user_id: actor_id,
            action: action.to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn prepare(
        &self,
        kind: ResourceKind,
        capabilities: CapabilitySet,
    ) -> StoreResult<CapabilitySet> {
        capabilities.validate_for(kind)?;
        if self.config.enforce_hierarchy {
            Ok(capabilities.with_hierarchy())
        } else {
            Ok(capabilities)
        }
    }

    async fn ensure_resource(&self, kind: ResourceKind, resource_id: i64) -> StoreResult<()> {
        let exists = match kind {
            ResourceKind::Project => self.store.get_project(resource_id).await?.is_some(),
            ResourceKind::Dataset => self.store.get_dataset(resource_id).await?.is_some(),
        };
        if exists {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("{kind} {resource_id}")))
        }
    }

    async fn pairing(&self, project_dataset_id: i64) -> StoreResult<ProjectDatasetRow> {
        self.store
            .get_project_dataset(project_dataset_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("pairing {project_dataset_id}")))
    }
}
