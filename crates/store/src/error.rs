//! Store error types.

use niviz_core::{Capability, ResourceKind};
use thiserror::Error;

/// Catalog store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate grant: user {user_id} already has a grant on {kind} {resource_id}")]
    DuplicateGrant {
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
    },

    #[error("already attached: {0}")]
    AlreadyAttached(String),

    #[error("duplicate tag: entity {entity_id} already tagged with metadata {metadata_id}")]
    DuplicateTag { entity_id: i64, metadata_id: i64 },

    #[error("duplicate filter: {0}")]
    DuplicateFilter(String),

    #[error("permission denied: user {user_id} lacks {} on {kind} {resource_id}", format_required(.required))]
    PermissionDenied {
        user_id: i64,
        kind: ResourceKind,
        resource_id: i64,
        required: Vec<Capability>,
    },

    #[error("permission denied: user {user_id} must be an administrator to {action}")]
    AdminRequired { user_id: i64, action: String },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error(transparent)]
    Invalid(#[from] niviz_core::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn format_required(required: &[Capability]) -> String {
    let names: Vec<&str> = required.iter().map(|cap| cap.as_str()).collect();
    names.join(" or ")
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// True if the error is a unique or primary key constraint failure.
///
/// SQLite reports "UNIQUE constraint failed: ..." and PostgreSQL uses
/// SQLSTATE 23505.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                || db_err.code().as_deref() == Some("23505")
                || db_err.message().contains("UNIQUE constraint")
        }
        _ => false,
    }
}

/// True if the error is a foreign key constraint failure.
///
/// SQLite reports "FOREIGN KEY constraint failed" and PostgreSQL uses
/// SQLSTATE 23503.
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_foreign_key_violation()
                || db_err.code().as_deref() == Some("23503")
                || db_err.message().contains("FOREIGN KEY constraint")
        }
        _ => false,
    }
}

/// Map a foreign key failure to `ConstraintViolation`, leaving other errors as-is.
pub(crate) fn classify_fk(err: sqlx::Error, context: impl FnOnce() -> String) -> StoreError {
    if is_foreign_key_violation(&err) {
        StoreError::ConstraintViolation(context())
    } else {
        StoreError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_format() {
        let err = StoreError::PermissionDenied {
            user_id: 7,
            kind: ResourceKind::Dataset,
            resource_id: 3,
            required: vec![Capability::Share, Capability::Admin],
        };
        assert_eq!(
            err.to_string(),
            "permission denied: user 7 lacks share or admin on dataset 3"
        );
    }

    #[test]
    fn test_duplicate_grant_format() {
        let err = StoreError::DuplicateGrant {
            user_id: 1,
            kind: ResourceKind::Project,
            resource_id: 2,
        };
        assert!(err.to_string().contains("project 2"));
    }

    #[test]
    fn test_non_database_errors_are_not_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_foreign_key_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: StoreError = niviz_core::Error::InvalidName("empty".to_string()).into();
        assert_eq!(err.to_string(), "invalid name: empty");
    }
}
