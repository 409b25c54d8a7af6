//! Catalog store test utilities.

#![allow(dead_code)]

use niviz_core::{ImagePath, MetadataKeyName, MetadataValue, NewUser};
use niviz_store::models::{DatasetRow, EntityRow, ProjectDatasetRow, ProjectRow, UserRow};
use niviz_store::{CatalogStore, PostgresStore, SqliteStore, StoreError, StoreResult};
use sqlx::{Pool, Postgres as SqlxPostgres, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// A SQLite test store in a temporary directory, removed on drop.
pub struct TestStore {
    pub store: Arc<dyn CatalogStore>,
    sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestStore {
    pub async fn new() -> StoreResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("catalog.db");
        let store = Arc::new(SqliteStore::new(&db_path, None).await?);

        Ok(Self {
            store: store.clone(),
            sqlite_store: store,
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    /// SQLite pool for raw queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }
}

/// PostgreSQL test store backed by a testcontainer.
pub struct PostgresTestStore {
    pub store: Arc<dyn CatalogStore>,
    postgres_store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestStore {
    pub async fn new() -> StoreResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                StoreError::Internal(format!("Failed to start PostgreSQL container: {e}"))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let store = Arc::new(PostgresStore::new(&url, 5, None).await?);

        Ok(Self {
            store: store.clone(),
            postgres_store: store,
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    pub fn pool(&self) -> &Pool<SqlxPostgres> {
        self.postgres_store.pool()
    }
}

/// Run a test against both SQLite and PostgreSQL backends.
///
/// PostgreSQL is skipped when `SKIP_POSTGRES_TESTS` is set or the container
/// cannot be started.
pub async fn run_store_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn CatalogStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestStore::new()
        .await
        .expect("Failed to create SQLite test store");
    test_fn.clone()(sqlite.store()).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_err() {
        match PostgresTestStore::new().await {
            Ok(postgres) => {
                test_fn(postgres.store()).await;
            }
            Err(err) => {
                eprintln!("Skipping PostgreSQL catalog tests: {err}");
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Fixtures
// -----------------------------------------------------------------------------

pub async fn user(store: &Arc<dyn CatalogStore>, username: &str) -> UserRow {
    store
        .create_user(&NewUser::new(username, format!("{username}@example.org")).active())
        .await
        .expect("create user")
}

pub async fn admin(store: &Arc<dyn CatalogStore>, username: &str) -> UserRow {
    store
        .create_user(
            &NewUser::new(username, format!("{username}@example.org"))
                .active()
                .admin(),
        )
        .await
        .expect("create admin")
}

pub async fn project(store: &Arc<dyn CatalogStore>, name: &str) -> ProjectRow {
    store.create_project(name).await.expect("create project")
}

pub async fn dataset(store: &Arc<dyn CatalogStore>, name: &str) -> DatasetRow {
    store
        .create_dataset(Some(name))
        .await
        .expect("create dataset")
}

pub async fn pairing(
    store: &Arc<dyn CatalogStore>,
    project_id: i64,
    dataset_id: i64,
) -> ProjectDatasetRow {
    store
        .attach_dataset(project_id, dataset_id)
        .await
        .expect("attach dataset")
}

pub async fn entity(store: &Arc<dyn CatalogStore>, dataset_id: i64) -> EntityRow {
    store.create_entity(dataset_id).await.expect("create entity")
}

pub fn key(name: &str) -> MetadataKeyName {
    MetadataKeyName::new(name).expect("valid key")
}

pub fn value(value: &str) -> MetadataValue {
    MetadataValue::new(value).expect("valid value")
}

pub fn path(path: &str) -> ImagePath {
    ImagePath::new(path).expect("valid path")
}

pub async fn tag(store: &Arc<dyn CatalogStore>, entity_id: i64, k: &str, v: &str) -> i64 {
    store
        .tag_entity(entity_id, &key(k), &value(v))
        .await
        .expect("tag entity")
        .metadata_id
}
