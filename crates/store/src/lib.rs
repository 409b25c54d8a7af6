//! Catalog store abstraction and implementations for Niviz.
//!
//! This crate provides the persistence layer of the rating catalog:
//! - Users, projects, datasets and project/dataset pairings
//! - Per-user permission grants and the access-control policy built on them
//! - Entities, their images and their metadata tags
//! - Metadata filters and working-set evaluation
//! - Transactional cascade deletion

pub mod access;
pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use access::AccessControl;
pub use error::{StoreError, StoreResult};
pub use postgres::PostgresStore;
pub use store::{CatalogStore, SqliteStore};

use niviz_core::config::DatabaseConfig;
use std::sync::Arc;

/// Create a catalog store from configuration.
pub async fn from_config(config: &DatabaseConfig) -> StoreResult<Arc<dyn CatalogStore>> {
    match config {
        DatabaseConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn CatalogStore>)
        }
        DatabaseConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(StoreError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn CatalogStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("catalog.db");
        let config = DatabaseConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());

        // Migrations are idempotent.
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_path_with_url_characters() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("qa?#1").join("catalog#2?.db");

        let store = SqliteStore::new(&db_path, None).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_from_config_postgres_requires_target() {
        let config = DatabaseConfig::Postgres {
            url: None,
            host: None,
            port: Some(5432),
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 1,
            statement_timeout_ms: None,
        };

        let err = from_config(&config).await.err().unwrap();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
