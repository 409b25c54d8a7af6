//! Resource kinds and references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resources that carry per-user permission grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Project,
    Dataset,
}

impl ResourceKind {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "project" => Ok(Self::Project),
            "dataset" => Ok(Self::Dataset),
            _ => Err(crate::Error::InvalidResource(format!(
                "unknown resource kind: {s}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Dataset => "dataset",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to any deletable row in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ResourceRef {
    User(i64),
    Project(i64),
    Dataset(i64),
    /// A project/dataset pairing.
    ProjectDataset(i64),
    Entity(i64),
    Image(i64),
    MetadataKey(i64),
    Metadata(i64),
    MetadataFilter(i64),
}

impl ResourceRef {
    /// Build a reference to a permissioned resource.
    pub fn permissioned(kind: ResourceKind, id: i64) -> Self {
        match kind {
            ResourceKind::Project => Self::Project(id),
            ResourceKind::Dataset => Self::Dataset(id),
        }
    }

    /// Name of the referenced table's row type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Project(_) => "project",
            Self::Dataset(_) => "dataset",
            Self::ProjectDataset(_) => "project_dataset",
            Self::Entity(_) => "entity",
            Self::Image(_) => "image",
            Self::MetadataKey(_) => "metadata_key",
            Self::Metadata(_) => "metadata",
            Self::MetadataFilter(_) => "metadata_filter",
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            Self::User(id)
            | Self::Project(id)
            | Self::Dataset(id)
            | Self::ProjectDataset(id)
            | Self::Entity(id)
            | Self::Image(id)
            | Self::MetadataKey(id)
            | Self::Metadata(id)
            | Self::MetadataFilter(id) => id,
        }
    }

    /// Parse `<type>:<id>`, e.g. `dataset:12`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (kind, id) = s.split_once(':').ok_or_else(|| {
            crate::Error::InvalidResource(format!("expected <type>:<id>, got {s}"))
        })?;
        let id: i64 = id
            .parse()
            .map_err(|_| crate::Error::InvalidResource(format!("invalid id: {id}")))?;
        match kind {
            "user" => Ok(Self::User(id)),
            "project" => Ok(Self::Project(id)),
            "dataset" => Ok(Self::Dataset(id)),
            "project_dataset" => Ok(Self::ProjectDataset(id)),
            "entity" => Ok(Self::Entity(id)),
            "image" => Ok(Self::Image(id)),
            "metadata_key" => Ok(Self::MetadataKey(id)),
            "metadata" => Ok(Self::Metadata(id)),
            "metadata_filter" => Ok(Self::MetadataFilter(id)),
            _ => Err(crate::Error::InvalidResource(format!(
                "unknown resource type: {kind}"
            ))),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_ref_parse_display() {
        let r = ResourceRef::parse("project_dataset:42").unwrap();
        assert_eq!(r, ResourceRef::ProjectDataset(42));
        assert_eq!(r.to_string(), "project_dataset:42");
    }

    #[test]
    fn test_resource_ref_parse_errors() {
        assert!(ResourceRef::parse("dataset").is_err());
        assert!(ResourceRef::parse("dataset:abc").is_err());
        assert!(ResourceRef::parse("rating:1").is_err());
    }

    #[test]
    fn test_permissioned() {
        assert_eq!(
            ResourceRef::permissioned(ResourceKind::Dataset, 3),
            ResourceRef::Dataset(3)
        );
        assert_eq!(ResourceKind::parse("project").unwrap(), ResourceKind::Project);
    }
}
