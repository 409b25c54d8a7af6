//! Core domain types for the Niviz rating catalog.
//!
//! This crate defines the vocabulary shared by the store and its callers:
//! - Capabilities and capability sets for permission grants
//! - Resource kinds and references used for permission checks and deletes
//! - Validated user fields, image paths and metadata key/value pairs
//! - Configuration types for the store and the permission policy

pub mod capability;
pub mod config;
pub mod error;
pub mod image;
pub mod metadata;
pub mod resource;
pub mod user;

pub use capability::{Capability, CapabilitySet};
pub use error::{Error, Result};
pub use image::ImagePath;
pub use metadata::{MetadataKeyName, MetadataValue};
pub use resource::{ResourceKind, ResourceRef};
pub use user::NewUser;

/// Maximum length of user name, username and email fields.
pub const USER_FIELD_MAX: usize = 64;

/// Maximum length of a user picture reference.
pub const PICTURE_MAX: usize = 2048;

/// Maximum length of an image path in bytes.
///
/// Paths carry a unique btree index, and PostgreSQL rejects index entries
/// larger than about 2700 bytes.
pub const PATH_MAX: usize = 2048;

/// Maximum length of a metadata key name or value.
pub const METADATA_FIELD_MAX: usize = 64;
