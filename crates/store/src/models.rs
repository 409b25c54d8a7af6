//! Database models mapping to the catalog schema.

use niviz_core::{CapabilitySet, ResourceKind};
use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Identity
// =============================================================================

/// User account.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: String,
    pub email: String,
    pub picture: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
}

// =============================================================================
// Resource hierarchy
// =============================================================================

/// Rating project.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Dataset holding entities.
#[derive(Debug, Clone, FromRow)]
pub struct DatasetRow {
    pub id: i64,
    pub name: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Pairing of a dataset with a project.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ProjectDatasetRow {
    pub id: i64,
    pub project_id: i64,
    pub dataset_id: i64,
}

// =============================================================================
// Permission grants
// =============================================================================

/// One user's capabilities on one project.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectPermissionRow {
    pub id: i64,
    pub user_id: i64,
    pub project_id: i64,
    pub can_view: bool,
    pub can_share: bool,
    pub can_modify: bool,
    pub can_delete: bool,
    pub can_admin: bool,
}

impl ProjectPermissionRow {
    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_flags(
            self.can_view,
            self.can_share,
            self.can_modify,
            self.can_delete,
            self.can_admin,
            false,
        )
    }
}

/// One user's capabilities on one dataset.
#[derive(Debug, Clone, FromRow)]
pub struct DatasetPermissionRow {
    pub id: i64,
    pub user_id: i64,
    pub dataset_id: i64,
    pub can_create_project: bool,
    pub can_view: bool,
    pub can_share: bool,
    pub can_modify: bool,
    pub can_delete: bool,
    pub can_admin: bool,
}

impl DatasetPermissionRow {
    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_flags(
            self.can_view,
            self.can_share,
            self.can_modify,
            self.can_delete,
            self.can_admin,
            self.can_create_project,
        )
    }
}

/// Grant row on either resource kind, with flags folded into a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRow {
    pub id: i64,
    pub user_id: i64,
    pub kind: ResourceKind,
    pub resource_id: i64,
    pub capabilities: CapabilitySet,
}

impl From<ProjectPermissionRow> for GrantRow {
    fn from(row: ProjectPermissionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            kind: ResourceKind::Project,
            resource_id: row.project_id,
            capabilities: row.capabilities(),
        }
    }
}

impl From<DatasetPermissionRow> for GrantRow {
    fn from(row: DatasetPermissionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            kind: ResourceKind::Dataset,
            resource_id: row.dataset_id,
            capabilities: row.capabilities(),
        }
    }
}

// =============================================================================
// Entity graph
// =============================================================================

/// Unit of assessment, owned by one dataset.
#[derive(Debug, Clone, FromRow)]
pub struct EntityRow {
    pub id: i64,
    pub dataset_id: i64,
    pub updated_at: OffsetDateTime,
}

/// QA image, unique by path and shared between entities.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ImageRow {
    pub id: i64,
    pub path: String,
}

/// Entity/image association.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EntityImageRow {
    pub id: i64,
    pub entity_id: i64,
    pub image_id: i64,
}

// =============================================================================
// Metadata
// =============================================================================

/// Global metadata key.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MetadataKeyRow {
    pub id: i64,
    pub name: String,
}

/// Addressable (key, value) pair.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MetadataRow {
    pub id: i64,
    pub key_id: i64,
    pub value: String,
}

/// Entity/metadata association.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EntityMetadataRow {
    pub id: i64,
    pub entity_id: i64,
    pub metadata_id: i64,
}

/// Metadata attached to an entity, joined with its key name.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EntityTag {
    pub metadata_id: i64,
    pub key: String,
    pub value: String,
}

// =============================================================================
// Filtering
// =============================================================================

/// Inclusion or exclusion predicate on a project/dataset pairing.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MetadataFilterRow {
    pub id: i64,
    pub project_dataset_id: i64,
    pub metadata_id: i64,
    pub is_exclusion: bool,
}

// =============================================================================
// Cascade deletion statistics
// =============================================================================

/// Rows removed by one cascade delete, per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CascadeDeleteStats {
    pub users: u64,
    pub projects: u64,
    pub datasets: u64,
    pub project_permissions: u64,
    pub dataset_permissions: u64,
    pub project_datasets: u64,
    pub entities: u64,
    pub images: u64,
    pub entity_images: u64,
    pub metadata_keys: u64,
    pub metadata: u64,
    pub entity_metadata: u64,
    pub metadata_filters: u64,
}

impl CascadeDeleteStats {
    /// Total rows removed.
    pub fn total(&self) -> u64 {
        self.users
            + self.projects
            + self.datasets
            + self.project_permissions
            + self.dataset_permissions
            + self.project_datasets
            + self.entities
            + self.images
            + self.entity_images
            + self.metadata_keys
            + self.metadata
            + self.entity_metadata
            + self.metadata_filters
    }
}
