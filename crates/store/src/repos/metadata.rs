//! Metadata repository.
//!
//! Keys form one global, case-sensitive namespace. Each (key, value) pair is
//! its own row so filters can point at it by ID.

use crate::error::StoreResult;
use crate::models::{EntityMetadataRow, EntityTag, MetadataKeyRow, MetadataRow};
use async_trait::async_trait;
use niviz_core::{MetadataKeyName, MetadataValue};

/// Repository for metadata keys, pairs and entity tags.
#[async_trait]
pub trait MetadataRepo: Send + Sync {
    /// Get or create a key by name.
    async fn resolve_key(&self, name: &MetadataKeyName) -> StoreResult<MetadataKeyRow>;

    /// Get a key by name.
    async fn get_key_by_name(&self, name: &str) -> StoreResult<Option<MetadataKeyRow>>;

    /// List all keys.
    async fn list_keys(&self) -> StoreResult<Vec<MetadataKeyRow>>;

    /// Get or create the (key, value) pair.
    async fn resolve_metadata(
        &self,
        key: &MetadataKeyName,
        value: &MetadataValue,
    ) -> StoreResult<MetadataRow>;

    /// Look up a (key, value) pair without creating it.
    async fn find_metadata(&self, key: &str, value: &str) -> StoreResult<Option<MetadataRow>>;

    /// Get a pair by ID.
    async fn get_metadata(&self, metadata_id: i64) -> StoreResult<Option<MetadataRow>>;

    /// List the pairs recorded for a key.
    async fn list_key_values(&self, key_id: i64) -> StoreResult<Vec<MetadataRow>>;

    /// Tag an entity with (key, value), creating the key and pair as needed.
    /// Fails with `DuplicateTag` if the entity already carries the pair.
    async fn tag_entity(
        &self,
        entity_id: i64,
        key: &MetadataKeyName,
        value: &MetadataValue,
    ) -> StoreResult<EntityMetadataRow>;

    /// Tag an entity with an existing pair.
    async fn tag_entity_with(
        &self,
        entity_id: i64,
        metadata_id: i64,
    ) -> StoreResult<EntityMetadataRow>;

    /// Remove a tag.
    async fn untag_entity(&self, entity_id: i64, metadata_id: i64) -> StoreResult<()>;

    /// List the tags of an entity, ordered by key then value.
    async fn list_entity_tags(&self, entity_id: i64) -> StoreResult<Vec<EntityTag>>;

    /// List entity IDs carrying a pair.
    async fn list_tagged_entities(&self, metadata_id: i64) -> StoreResult<Vec<i64>>;
}
