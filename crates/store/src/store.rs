//! Catalog store trait and the SQLite implementation.

use crate::error::{StoreError, StoreResult};
use crate::repos::{
    CascadeRepo, DatasetRepo, EntityRepo, FilterRepo, GrantRepo, ImageRepo, MetadataRepo,
    ProjectRepo, UserRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

/// Combined catalog store trait.
#[async_trait]
pub trait CatalogStore:
    UserRepo
    + ProjectRepo
    + DatasetRepo
    + GrantRepo
    + EntityRepo
    + ImageRepo
    + MetadataRepo
    + FilterRepo
    + CascadeRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> StoreResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> StoreResult<()>;
}

/// SQLite-based catalog store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite catalog and run migrations.
    pub async fn new(path: impl AsRef<Path>, query_timeout_secs: Option<u64>) -> StoreResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(60);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection: SQLite serializes writers anyway, and a single
        // connection keeps uniqueness checks and cascades free of lock errors.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(
            path = %path.display(),
            query_timeout_secs = query_timeout_secs,
            "SQLite catalog opened (query timeout is advisory only)"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn migrate(&self) -> StoreResult<()> {
        // Older catalogs may hold duplicate (key_id, value) rows, which would
        // make the unique index below fail to build.
        let metadata_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='metadata')",
        )
        .fetch_one(&self.pool)
        .await?;

        if metadata_exists {
            let duplicates: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM (SELECT key_id, value FROM metadata GROUP BY key_id, value HAVING COUNT(*) > 1)",
            )
            .fetch_one(&self.pool)
            .await?;
            if duplicates > 0 {
                return Err(StoreError::Internal(format!(
                    "metadata table holds {duplicates} duplicated (key, value) pair(s); \
                     merge them before upgrading the schema"
                )));
            }
        }

        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::error::{classify_fk, is_unique_violation};
    use crate::models::*;
    use niviz_core::{
        CapabilitySet, ImagePath, MetadataKeyName, MetadataValue, NewUser, ResourceKind,
        ResourceRef,
    };
    use sqlx::SqliteConnection;
    use time::OffsetDateTime;

    // -------------------------------------------------------------------------
    // Shared helpers (run inside a caller's transaction)
    // -------------------------------------------------------------------------

    async fn row_exists(
        conn: &mut SqliteConnection,
        table: &'static str,
        id: i64,
    ) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)"))
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(exists)
    }

    async fn require_row(
        conn: &mut SqliteConnection,
        table: &'static str,
        label: &str,
        id: i64,
    ) -> StoreResult<()> {
        if row_exists(conn, table, id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("{label} {id}")))
        }
    }

    async fn touch_entity_in(conn: &mut SqliteConnection, entity_id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE entities SET updated_at = ? WHERE id = ?")
            .bind(OffsetDateTime::now_utc())
            .bind(entity_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn resolve_key_in(
        conn: &mut SqliteConnection,
        name: &MetadataKeyName,
    ) -> StoreResult<MetadataKeyRow> {
        sqlx::query("INSERT INTO metadata_keys (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name.as_str())
            .execute(&mut *conn)
            .await?;
        let row =
            sqlx::query_as::<_, MetadataKeyRow>("SELECT * FROM metadata_keys WHERE name = ?")
                .bind(name.as_str())
                .fetch_one(&mut *conn)
                .await?;
        Ok(row)
    }

    async fn resolve_metadata_in(
        conn: &mut SqliteConnection,
        key: &MetadataKeyName,
        value: &MetadataValue,
    ) -> StoreResult<MetadataRow> {
        let key_row = resolve_key_in(conn, key).await?;
        sqlx::query(
            "INSERT INTO metadata (key_id, value) VALUES (?, ?) ON CONFLICT(key_id, value) DO NOTHING",
        )
        .bind(key_row.id)
        .bind(value.as_str())
        .execute(&mut *conn)
        .await?;
        let row = sqlx::query_as::<_, MetadataRow>(
            "SELECT * FROM metadata WHERE key_id = ? AND value = ?",
        )
        .bind(key_row.id)
        .bind(value.as_str())
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    async fn insert_tag_in(
        conn: &mut SqliteConnection,
        entity_id: i64,
        metadata_id: i64,
    ) -> StoreResult<EntityMetadataRow> {
        let result = sqlx::query_as::<_, EntityMetadataRow>(
            "INSERT INTO entity_metadata (entity_id, metadata_id) VALUES (?, ?) RETURNING *",
        )
        .bind(entity_id)
        .bind(metadata_id)
        .fetch_one(&mut *conn)
        .await;

        match result {
            Ok(row) => {
                touch_entity_in(conn, entity_id).await?;
                Ok(row)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateTag {
                entity_id,
                metadata_id,
            }),
            Err(e) => Err(classify_fk(e, || {
                format!("entity {entity_id} or metadata {metadata_id} no longer exists")
            })),
        }
    }

    async fn insert_filter_in(
        conn: &mut SqliteConnection,
        project_dataset_id: i64,
        metadata_id: i64,
        is_exclusion: bool,
    ) -> StoreResult<MetadataFilterRow> {
        let result = sqlx::query_as::<_, MetadataFilterRow>(
            "INSERT INTO metadata_filters (project_dataset_id, metadata_id, is_exclusion) VALUES (?, ?, ?) RETURNING *",
        )
        .bind(project_dataset_id)
        .bind(metadata_id)
        .bind(is_exclusion)
        .fetch_one(&mut *conn)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateFilter(format!(
                "pairing {project_dataset_id} already has {} filter on metadata {metadata_id}",
                if is_exclusion { "an exclusion" } else { "an inclusion" }
            ))),
            Err(e) => Err(classify_fk(e, || {
                format!(
                    "pairing {project_dataset_id} or metadata {metadata_id} no longer exists"
                )
            })),
        }
    }

    /// Remove filters and pairings matching `column = id` on project_datasets.
    async fn delete_pairings_in(
        conn: &mut SqliteConnection,
        column: &'static str,
        id: i64,
        stats: &mut CascadeDeleteStats,
    ) -> StoreResult<()> {
        stats.metadata_filters += sqlx::query(&format!(
            "DELETE FROM metadata_filters WHERE project_dataset_id IN \
             (SELECT id FROM project_datasets WHERE {column} = ?)"
        ))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        stats.project_datasets += sqlx::query(&format!(
            "DELETE FROM project_datasets WHERE {column} = ?"
        ))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        Ok(())
    }

    /// Remove entities matching `column = id` together with their joins.
    async fn delete_entities_in(
        conn: &mut SqliteConnection,
        column: &'static str,
        id: i64,
        stats: &mut CascadeDeleteStats,
    ) -> StoreResult<()> {
        stats.entity_images += sqlx::query(&format!(
            "DELETE FROM entity_images WHERE entity_id IN (SELECT id FROM entities WHERE {column} = ?)"
        ))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        stats.entity_metadata += sqlx::query(&format!(
            "DELETE FROM entity_metadata WHERE entity_id IN (SELECT id FROM entities WHERE {column} = ?)"
        ))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        stats.entities += sqlx::query(&format!("DELETE FROM entities WHERE {column} = ?"))
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        Ok(())
    }

    /// Remove metadata rows matching `column = id` with their tags and filters.
    async fn delete_metadata_in(
        conn: &mut SqliteConnection,
        column: &'static str,
        id: i64,
        stats: &mut CascadeDeleteStats,
    ) -> StoreResult<()> {
        stats.metadata_filters += sqlx::query(&format!(
            "DELETE FROM metadata_filters WHERE metadata_id IN (SELECT id FROM metadata WHERE {column} = ?)"
        ))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        stats.entity_metadata += sqlx::query(&format!(
            "DELETE FROM entity_metadata WHERE metadata_id IN (SELECT id FROM metadata WHERE {column} = ?)"
        ))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        stats.metadata += sqlx::query(&format!("DELETE FROM metadata WHERE {column} = ?"))
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        Ok(())
    }

    async fn delete_by_id(
        conn: &mut SqliteConnection,
        table: &'static str,
        id: i64,
    ) -> StoreResult<u64> {
        let deleted = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    #[async_trait]
    impl UserRepo for SqliteStore {
        async fn create_user(&self, user: &NewUser) -> StoreResult<UserRow> {
            user.validate()?;
            let row = sqlx::query_as::<_, UserRow>(
                r#"
                INSERT INTO users (first_name, last_name, username, email, picture, is_active, is_admin)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.picture)
            .bind(user.is_active)
            .bind(user.is_admin)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_user(&self, user_id: i64) -> StoreResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>(
                "SELECT * FROM users WHERE username = ? ORDER BY id LIMIT 1",
            )
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_users(&self) -> StoreResult<Vec<UserRow>> {
            let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn set_user_flags(
            &self,
            user_id: i64,
            is_active: bool,
            is_admin: bool,
        ) -> StoreResult<UserRow> {
            sqlx::query_as::<_, UserRow>(
                "UPDATE users SET is_active = ?, is_admin = ? WHERE id = ? RETURNING *",
            )
            .bind(is_active)
            .bind(is_admin)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
        }
    }

    // -------------------------------------------------------------------------
    // Projects and pairings
    // -------------------------------------------------------------------------

    #[async_trait]
    impl ProjectRepo for SqliteStore {
        async fn create_project(&self, name: &str) -> StoreResult<ProjectRow> {
            niviz_core::user::validate_resource_name(name)?;
            let now = OffsetDateTime::now_utc();
            let row = sqlx::query_as::<_, ProjectRow>(
                "INSERT INTO projects (name, created_at, updated_at) VALUES (?, ?, ?) RETURNING *",
            )
            .bind(name)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_project(&self, project_id: i64) -> StoreResult<Option<ProjectRow>> {
            let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_projects(&self) -> StoreResult<Vec<ProjectRow>> {
            let rows = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn rename_project(&self, project_id: i64, name: &str) -> StoreResult<ProjectRow> {
            niviz_core::user::validate_resource_name(name)?;
            sqlx::query_as::<_, ProjectRow>(
                "UPDATE projects SET name = ?, updated_at = ? WHERE id = ? RETURNING *",
            )
            .bind(name)
            .bind(OffsetDateTime::now_utc())
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))
        }

        async fn attach_dataset(
            &self,
            project_id: i64,
            dataset_id: i64,
        ) -> StoreResult<ProjectDatasetRow> {
            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "projects", "project", project_id).await?;
            require_row(&mut tx, "datasets", "dataset", dataset_id).await?;

            let result = sqlx::query_as::<_, ProjectDatasetRow>(
                "INSERT INTO project_datasets (project_id, dataset_id) VALUES (?, ?) RETURNING *",
            )
            .bind(project_id)
            .bind(dataset_id)
            .fetch_one(&mut *tx)
            .await;

            let row = match result {
                Ok(row) => row,
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::AlreadyAttached(format!(
                        "dataset {dataset_id} is already attached to project {project_id}"
                    )));
                }
                Err(e) => {
                    return Err(classify_fk(e, || {
                        format!("project {project_id} or dataset {dataset_id} no longer exists")
                    }));
                }
            };

            tx.commit().await?;
            tracing::debug!(project_id, dataset_id, pairing_id = row.id, "Dataset attached");
            Ok(row)
        }

        async fn detach_dataset(
            &self,
            project_id: i64,
            dataset_id: i64,
        ) -> StoreResult<CascadeDeleteStats> {
            let mut tx = self.pool.begin().await?;
            let pairing_id: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM project_datasets WHERE project_id = ? AND dataset_id = ?",
            )
            .bind(project_id)
            .bind(dataset_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(pairing_id) = pairing_id else {
                return Err(StoreError::NotFound(format!(
                    "dataset {dataset_id} is not attached to project {project_id}"
                )));
            };

            let mut stats = CascadeDeleteStats::default();
            stats.metadata_filters +=
                sqlx::query("DELETE FROM metadata_filters WHERE project_dataset_id = ?")
                    .bind(pairing_id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            stats.project_datasets += delete_by_id(&mut tx, "project_datasets", pairing_id).await?;

            tx.commit().await?;
            tracing::debug!(project_id, dataset_id, ?stats, "Dataset detached");
            Ok(stats)
        }

        async fn get_project_dataset(
            &self,
            project_dataset_id: i64,
        ) -> StoreResult<Option<ProjectDatasetRow>> {
            let row = sqlx::query_as::<_, ProjectDatasetRow>(
                "SELECT * FROM project_datasets WHERE id = ?",
            )
            .bind(project_dataset_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn find_project_dataset(
            &self,
            project_id: i64,
            dataset_id: i64,
        ) -> StoreResult<Option<ProjectDatasetRow>> {
            let row = sqlx::query_as::<_, ProjectDatasetRow>(
                "SELECT * FROM project_datasets WHERE project_id = ? AND dataset_id = ?",
            )
            .bind(project_id)
            .bind(dataset_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_project_datasets(
            &self,
            project_id: i64,
        ) -> StoreResult<Vec<ProjectDatasetRow>> {
            let rows = sqlx::query_as::<_, ProjectDatasetRow>(
                "SELECT * FROM project_datasets WHERE project_id = ? ORDER BY id",
            )
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_dataset_projects(
            &self,
            dataset_id: i64,
        ) -> StoreResult<Vec<ProjectDatasetRow>> {
            let rows = sqlx::query_as::<_, ProjectDatasetRow>(
                "SELECT * FROM project_datasets WHERE dataset_id = ? ORDER BY id",
            )
            .bind(dataset_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    // -------------------------------------------------------------------------
    // Datasets
    // -------------------------------------------------------------------------

    #[async_trait]
    impl DatasetRepo for SqliteStore {
        async fn create_dataset(&self, name: Option<&str>) -> StoreResult<DatasetRow> {
            if let Some(name) = name {
                niviz_core::user::validate_resource_name(name)?;
            }
            let now = OffsetDateTime::now_utc();
            let row = sqlx::query_as::<_, DatasetRow>(
                "INSERT INTO datasets (name, created_at, updated_at) VALUES (?, ?, ?) RETURNING *",
            )
            .bind(name)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_dataset(&self, dataset_id: i64) -> StoreResult<Option<DatasetRow>> {
            let row = sqlx::query_as::<_, DatasetRow>("SELECT * FROM datasets WHERE id = ?")
                .bind(dataset_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_datasets(&self) -> StoreResult<Vec<DatasetRow>> {
            let rows = sqlx::query_as::<_, DatasetRow>("SELECT * FROM datasets ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn rename_dataset(
            &self,
            dataset_id: i64,
            name: Option<&str>,
        ) -> StoreResult<DatasetRow> {
            if let Some(name) = name {
                niviz_core::user::validate_resource_name(name)?;
            }
            sqlx::query_as::<_, DatasetRow>(
                "UPDATE datasets SET name = ?, updated_at = ? WHERE id = ? RETURNING *",
            )
            .bind(name)
            .bind(OffsetDateTime::now_utc())
            .bind(dataset_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("dataset {dataset_id}")))
        }
    }

    // -------------------------------------------------------------------------
    // Grants
    // -------------------------------------------------------------------------

    #[async_trait]
    impl GrantRepo for SqliteStore {
        async fn grant_project(
            &self,
            user_id: i64,
            project_id: i64,
            capabilities: CapabilitySet,
        ) -> StoreResult<ProjectPermissionRow> {
            use niviz_core::Capability::*;
            capabilities.validate_for(ResourceKind::Project)?;

            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "users", "user", user_id).await?;
            require_row(&mut tx, "projects", "project", project_id).await?;

            let result = sqlx::query_as::<_, ProjectPermissionRow>(
                r#"
                INSERT INTO permissions_projectuser
                    (user_id, project_id, can_view, can_share, can_modify, can_delete, can_admin)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(project_id)
            .bind(capabilities.contains(View))
            .bind(capabilities.contains(Share))
            .bind(capabilities.contains(Modify))
            .bind(capabilities.contains(Delete))
            .bind(capabilities.contains(Admin))
            .fetch_one(&mut *tx)
            .await;

            let row = match result {
                Ok(row) => row,
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::DuplicateGrant {
                        user_id,
                        kind: ResourceKind::Project,
                        resource_id: project_id,
                    });
                }
                Err(e) => {
                    return Err(classify_fk(e, || {
                        format!("user {user_id} or project {project_id} no longer exists")
                    }));
                }
            };

            tx.commit().await?;
            Ok(row)
        }

        async fn set_project_grant(
            &self,
            user_id: i64,
            project_id: i64,
            capabilities: CapabilitySet,
        ) -> StoreResult<ProjectPermissionRow> {
            use niviz_core::Capability::*;
            capabilities.validate_for(ResourceKind::Project)?;

            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "users", "user", user_id).await?;
            require_row(&mut tx, "projects", "project", project_id).await?;

            let row = sqlx::query_as::<_, ProjectPermissionRow>(
                r#"
                INSERT INTO permissions_projectuser
                    (user_id, project_id, can_view, can_share, can_modify, can_delete, can_admin)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(user_id, project_id) DO UPDATE SET
                    can_view = excluded.can_view,
                    can_share = excluded.can_share,
                    can_modify = excluded.can_modify,
                    can_delete = excluded.can_delete,
                    can_admin = excluded.can_admin
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(project_id)
            .bind(capabilities.contains(View))
            .bind(capabilities.contains(Share))
            .bind(capabilities.contains(Modify))
            .bind(capabilities.contains(Delete))
            .bind(capabilities.contains(Admin))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                classify_fk(e, || {
                    format!("user {user_id} or project {project_id} no longer exists")
                })
            })?;

            tx.commit().await?;
            Ok(row)
        }

        async fn get_project_grant(
            &self,
            user_id: i64,
            project_id: i64,
        ) -> StoreResult<Option<ProjectPermissionRow>> {
            let row = sqlx::query_as::<_, ProjectPermissionRow>(
                "SELECT * FROM permissions_projectuser WHERE user_id = ? AND project_id = ?",
            )
            .bind(user_id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_project_grants(
            &self,
            project_id: i64,
        ) -> StoreResult<Vec<ProjectPermissionRow>> {
            let rows = sqlx::query_as::<_, ProjectPermissionRow>(
                "SELECT * FROM permissions_projectuser WHERE project_id = ? ORDER BY user_id",
            )
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_user_project_grants(
            &self,
            user_id: i64,
        ) -> StoreResult<Vec<ProjectPermissionRow>> {
            let rows = sqlx::query_as::<_, ProjectPermissionRow>(
                "SELECT * FROM permissions_projectuser WHERE user_id = ? ORDER BY project_id",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn revoke_project_grant(&self, user_id: i64, project_id: i64) -> StoreResult<()> {
            let result = sqlx::query(
                "DELETE FROM permissions_projectuser WHERE user_id = ? AND project_id = ?",
            )
            .bind(user_id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!(
                    "grant for user {user_id} on project {project_id}"
                )));
            }
            Ok(())
        }

        async fn grant_dataset(
            &self,
            user_id: i64,
            dataset_id: i64,
            capabilities: CapabilitySet,
        ) -> StoreResult<DatasetPermissionRow> {
            use niviz_core::Capability::*;

            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "users", "user", user_id).await?;
            require_row(&mut tx, "datasets", "dataset", dataset_id).await?;

            let result = sqlx::query_as::<_, DatasetPermissionRow>(
                r#"
                INSERT INTO permissions_datasetuser
                    (user_id, dataset_id, can_create_project, can_view, can_share, can_modify, can_delete, can_admin)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(dataset_id)
            .bind(capabilities.contains(CreateProject))
            .bind(capabilities.contains(View))
            .bind(capabilities.contains(Share))
            .bind(capabilities.contains(Modify))
            .bind(capabilities.contains(Delete))
            .bind(capabilities.contains(Admin))
            .fetch_one(&mut *tx)
            .await;

            let row = match result {
                Ok(row) => row,
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::DuplicateGrant {
                        user_id,
                        kind: ResourceKind::Dataset,
                        resource_id: dataset_id,
                    });
                }
                Err(e) => {
                    return Err(classify_fk(e, || {
                        format!("user {user_id} or dataset {dataset_id} no longer exists")
                    }));
                }
            };

            tx.commit().await?;
            Ok(row)
        }

        async fn set_dataset_grant(
            &self,
            user_id: i64,
            dataset_id: i64,
            capabilities: CapabilitySet,
        ) -> StoreResult<DatasetPermissionRow> {
            use niviz_core::Capability::*;

            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "users", "user", user_id).await?;
            require_row(&mut tx, "datasets", "dataset", dataset_id).await?;

            let row = sqlx::query_as::<_, DatasetPermissionRow>(
                r#"
                INSERT INTO permissions_datasetuser
                    (user_id, dataset_id, can_create_project, can_view, can_share, can_modify, can_delete, can_admin)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(user_id, dataset_id) DO UPDATE SET
                    can_create_project = excluded.can_create_project,
                    can_view = excluded.can_view,
                    can_share = excluded.can_share,
                    can_modify = excluded.can_modify,
                    can_delete = excluded.can_delete,
                    can_admin = excluded.can_admin
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(dataset_id)
            .bind(capabilities.contains(CreateProject))
            .bind(capabilities.contains(View))
            .bind(capabilities.contains(Share))
            .bind(capabilities.contains(Modify))
            .bind(capabilities.contains(Delete))
            .bind(capabilities.contains(Admin))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                classify_fk(e, || {
                    format!("user {user_id} or dataset {dataset_id} no longer exists")
                })
            })?;

            tx.commit().await?;
            Ok(row)
        }

        async fn get_dataset_grant(
            &self,
            user_id: i64,
            dataset_id: i64,
        ) -> StoreResult<Option<DatasetPermissionRow>> {
            let row = sqlx::query_as::<_, DatasetPermissionRow>(
                "SELECT * FROM permissions_datasetuser WHERE user_id = ? AND dataset_id = ?",
            )
            .bind(user_id)
            .bind(dataset_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_dataset_grants(
            &self,
            dataset_id: i64,
        ) -> StoreResult<Vec<DatasetPermissionRow>> {
            let rows = sqlx::query_as::<_, DatasetPermissionRow>(
                "SELECT * FROM permissions_datasetuser WHERE dataset_id = ? ORDER BY user_id",
            )
            .bind(dataset_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_user_dataset_grants(
            &self,
            user_id: i64,
        ) -> StoreResult<Vec<DatasetPermissionRow>> {
            let rows = sqlx::query_as::<_, DatasetPermissionRow>(
                "SELECT * FROM permissions_datasetuser WHERE user_id = ? ORDER BY dataset_id",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn revoke_dataset_grant(&self, user_id: i64, dataset_id: i64) -> StoreResult<()> {
            let result = sqlx::query(
                "DELETE FROM permissions_datasetuser WHERE user_id = ? AND dataset_id = ?",
            )
            .bind(user_id)
            .bind(dataset_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!(
                    "grant for user {user_id} on dataset {dataset_id}"
                )));
            }
            Ok(())
        }
    }

    // -------------------------------------------------------------------------
    // Entities
    // -------------------------------------------------------------------------

    #[async_trait]
    impl EntityRepo for SqliteStore {
        async fn create_entity(&self, dataset_id: i64) -> StoreResult<EntityRow> {
            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "datasets", "dataset", dataset_id).await?;

            let row = sqlx::query_as::<_, EntityRow>(
                "INSERT INTO entities (dataset_id, updated_at) VALUES (?, ?) RETURNING *",
            )
            .bind(dataset_id)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| classify_fk(e, || format!("dataset {dataset_id} no longer exists")))?;

            tx.commit().await?;
            Ok(row)
        }

        async fn get_entity(&self, entity_id: i64) -> StoreResult<Option<EntityRow>> {
            let row = sqlx::query_as::<_, EntityRow>("SELECT * FROM entities WHERE id = ?")
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_entities(&self, dataset_id: i64) -> StoreResult<Vec<EntityRow>> {
            let rows = sqlx::query_as::<_, EntityRow>(
                "SELECT * FROM entities WHERE dataset_id = ? ORDER BY id",
            )
            .bind(dataset_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_entities(&self, dataset_id: i64) -> StoreResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE dataset_id = ?")
                    .bind(dataset_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }

        async fn touch_entity(&self, entity_id: i64) -> StoreResult<EntityRow> {
            sqlx::query_as::<_, EntityRow>(
                "UPDATE entities SET updated_at = ? WHERE id = ? RETURNING *",
            )
            .bind(OffsetDateTime::now_utc())
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("entity {entity_id}")))
        }
    }

    // -------------------------------------------------------------------------
    // Images
    // -------------------------------------------------------------------------

    #[async_trait]
    impl ImageRepo for SqliteStore {
        async fn attach_image(
            &self,
            entity_id: i64,
            path: &ImagePath,
        ) -> StoreResult<EntityImageRow> {
            // Image and join row commit together; a failed join rolls back a
            // freshly created image so no orphan is left behind.
            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "entities", "entity", entity_id).await?;

            sqlx::query("INSERT INTO images (path) VALUES (?) ON CONFLICT(path) DO NOTHING")
                .bind(path.as_str())
                .execute(&mut *tx)
                .await?;
            let image_id: i64 = sqlx::query_scalar("SELECT id FROM images WHERE path = ?")
                .bind(path.as_str())
                .fetch_one(&mut *tx)
                .await?;

            let result = sqlx::query_as::<_, EntityImageRow>(
                "INSERT INTO entity_images (entity_id, image_id) VALUES (?, ?) RETURNING *",
            )
            .bind(entity_id)
            .bind(image_id)
            .fetch_one(&mut *tx)
            .await;

            let row = match result {
                Ok(row) => row,
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::AlreadyAttached(format!(
                        "image {path} is already attached to entity {entity_id}"
                    )));
                }
                Err(e) => {
                    return Err(classify_fk(e, || {
                        format!("entity {entity_id} no longer exists")
                    }));
                }
            };

            touch_entity_in(&mut tx, entity_id).await?;
            tx.commit().await?;
            tracing::debug!(entity_id, image_id, path = %path, "Image attached");
            Ok(row)
        }

        async fn detach_image(&self, entity_id: i64, image_id: i64) -> StoreResult<()> {
            let mut tx = self.pool.begin().await?;
            let result =
                sqlx::query("DELETE FROM entity_images WHERE entity_id = ? AND image_id = ?")
                    .bind(entity_id)
                    .bind(image_id)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!(
                    "image {image_id} is not attached to entity {entity_id}"
                )));
            }
            touch_entity_in(&mut tx, entity_id).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn get_image(&self, image_id: i64) -> StoreResult<Option<ImageRow>> {
            let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE id = ?")
                .bind(image_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_image_by_path(&self, path: &str) -> StoreResult<Option<ImageRow>> {
            let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_entity_images(&self, entity_id: i64) -> StoreResult<Vec<ImageRow>> {
            let rows = sqlx::query_as::<_, ImageRow>(
                r#"
                SELECT i.id, i.path FROM images i
                JOIN entity_images ei ON ei.image_id = i.id
                WHERE ei.entity_id = ?
                ORDER BY i.id
                "#,
            )
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_image_entities(&self, image_id: i64) -> StoreResult<Vec<i64>> {
            let ids: Vec<i64> = sqlx::query_scalar(
                "SELECT entity_id FROM entity_images WHERE image_id = ? ORDER BY entity_id",
            )
            .bind(image_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(ids)
        }

        async fn image_reference_count(&self, image_id: i64) -> StoreResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM entity_images WHERE image_id = ?")
                    .bind(image_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }

        async fn delete_orphaned_images(&self) -> StoreResult<u64> {
            let deleted = sqlx::query(
                "DELETE FROM images WHERE NOT EXISTS \
                 (SELECT 1 FROM entity_images ei WHERE ei.image_id = images.id)",
            )
            .execute(&self.pool)
            .await?
            .rows_affected();
            if deleted > 0 {
                tracing::info!(deleted, "Orphaned images removed");
            }
            Ok(deleted)
        }
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    #[async_trait]
    impl MetadataRepo for SqliteStore {
        async fn resolve_key(&self, name: &MetadataKeyName) -> StoreResult<MetadataKeyRow> {
            let mut tx = self.pool.begin().await?;
            let row = resolve_key_in(&mut tx, name).await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn get_key_by_name(&self, name: &str) -> StoreResult<Option<MetadataKeyRow>> {
            let row =
                sqlx::query_as::<_, MetadataKeyRow>("SELECT * FROM metadata_keys WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn list_keys(&self) -> StoreResult<Vec<MetadataKeyRow>> {
            let rows =
                sqlx::query_as::<_, MetadataKeyRow>("SELECT * FROM metadata_keys ORDER BY name")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }

        async fn resolve_metadata(
            &self,
            key: &MetadataKeyName,
            value: &MetadataValue,
        ) -> StoreResult<MetadataRow> {
            let mut tx = self.pool.begin().await?;
            let row = resolve_metadata_in(&mut tx, key, value).await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn find_metadata(&self, key: &str, value: &str) -> StoreResult<Option<MetadataRow>> {
            let row = sqlx::query_as::<_, MetadataRow>(
                r#"
                SELECT m.id, m.key_id, m.value FROM metadata m
                JOIN metadata_keys k ON k.id = m.key_id
                WHERE k.name = ? AND m.value = ?
                "#,
            )
            .bind(key)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_metadata(&self, metadata_id: i64) -> StoreResult<Option<MetadataRow>> {
            let row = sqlx::query_as::<_, MetadataRow>("SELECT * FROM metadata WHERE id = ?")
                .bind(metadata_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_key_values(&self, key_id: i64) -> StoreResult<Vec<MetadataRow>> {
            let rows = sqlx::query_as::<_, MetadataRow>(
                "SELECT * FROM metadata WHERE key_id = ? ORDER BY value",
            )
            .bind(key_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn tag_entity(
            &self,
            entity_id: i64,
            key: &MetadataKeyName,
            value: &MetadataValue,
        ) -> StoreResult<EntityMetadataRow> {
            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "entities", "entity", entity_id).await?;
            let metadata = resolve_metadata_in(&mut tx, key, value).await?;
            let row = insert_tag_in(&mut tx, entity_id, metadata.id).await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn tag_entity_with(
            &self,
            entity_id: i64,
            metadata_id: i64,
        ) -> StoreResult<EntityMetadataRow> {
            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "entities", "entity", entity_id).await?;
            require_row(&mut tx, "metadata", "metadata", metadata_id).await?;
            let row = insert_tag_in(&mut tx, entity_id, metadata_id).await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn untag_entity(&self, entity_id: i64, metadata_id: i64) -> StoreResult<()> {
            let mut tx = self.pool.begin().await?;
            let result =
                sqlx::query("DELETE FROM entity_metadata WHERE entity_id = ? AND metadata_id = ?")
                    .bind(entity_id)
                    .bind(metadata_id)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!(
                    "entity {entity_id} is not tagged with metadata {metadata_id}"
                )));
            }
            touch_entity_in(&mut tx, entity_id).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn list_entity_tags(&self, entity_id: i64) -> StoreResult<Vec<EntityTag>> {
            let rows = sqlx::query_as::<_, EntityTag>(
                r#"
                SELECT m.id AS metadata_id, k.name AS "key", m.value AS value
                FROM entity_metadata em
                JOIN metadata m ON m.id = em.metadata_id
                JOIN metadata_keys k ON k.id = m.key_id
                WHERE em.entity_id = ?
                ORDER BY k.name, m.value
                "#,
            )
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_tagged_entities(&self, metadata_id: i64) -> StoreResult<Vec<i64>> {
            let ids: Vec<i64> = sqlx::query_scalar(
                "SELECT entity_id FROM entity_metadata WHERE metadata_id = ? ORDER BY entity_id",
            )
            .bind(metadata_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(ids)
        }
    }

    // -------------------------------------------------------------------------
    // Filters
    // -------------------------------------------------------------------------

    #[async_trait]
    impl FilterRepo for SqliteStore {
        async fn add_filter(
            &self,
            project_dataset_id: i64,
            key: &MetadataKeyName,
            value: &MetadataValue,
            is_exclusion: bool,
        ) -> StoreResult<MetadataFilterRow> {
            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "project_datasets", "pairing", project_dataset_id).await?;
            let metadata = resolve_metadata_in(&mut tx, key, value).await?;
            let row = insert_filter_in(&mut tx, project_dataset_id, metadata.id, is_exclusion)
                .await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn add_filter_for(
            &self,
            project_dataset_id: i64,
            metadata_id: i64,
            is_exclusion: bool,
        ) -> StoreResult<MetadataFilterRow> {
            let mut tx = self.pool.begin().await?;
            require_row(&mut tx, "project_datasets", "pairing", project_dataset_id).await?;
            require_row(&mut tx, "metadata", "metadata", metadata_id).await?;
            let row =
                insert_filter_in(&mut tx, project_dataset_id, metadata_id, is_exclusion).await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn get_filter(&self, filter_id: i64) -> StoreResult<Option<MetadataFilterRow>> {
            let row = sqlx::query_as::<_, MetadataFilterRow>(
                "SELECT * FROM metadata_filters WHERE id = ?",
            )
            .bind(filter_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_filters(
            &self,
            project_dataset_id: i64,
        ) -> StoreResult<Vec<MetadataFilterRow>> {
            let rows = sqlx::query_as::<_, MetadataFilterRow>(
                "SELECT * FROM metadata_filters WHERE project_dataset_id = ? ORDER BY id",
            )
            .bind(project_dataset_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn working_set(&self, project_dataset_id: i64) -> StoreResult<Vec<i64>> {
            let mut tx = self.pool.begin().await?;
            let dataset_id: Option<i64> =
                sqlx::query_scalar("SELECT dataset_id FROM project_datasets WHERE id = ?")
                    .bind(project_dataset_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some(dataset_id) = dataset_id else {
                return Err(StoreError::NotFound(format!("pairing {project_dataset_id}")));
            };

            // A filter rejects an entity when tag presence equals is_exclusion:
            // untagged fails an inclusion, tagged fails an exclusion.
            let ids: Vec<i64> = sqlx::query_scalar(
                r#"
                SELECT e.id FROM entities e
                WHERE e.dataset_id = ?
                  AND NOT EXISTS (
                    SELECT 1 FROM metadata_filters f
                    WHERE f.project_dataset_id = ?
                      AND f.is_exclusion = EXISTS (
                        SELECT 1 FROM entity_metadata em
                        WHERE em.entity_id = e.id AND em.metadata_id = f.metadata_id
                      )
                  )
                ORDER BY e.id
                "#,
            )
            .bind(dataset_id)
            .bind(project_dataset_id)
            .fetch_all(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(ids)
        }
    }

    // -------------------------------------------------------------------------
    // Cascade deletes
    // -------------------------------------------------------------------------

    #[async_trait]
    impl CascadeRepo for SqliteStore {
        async fn delete(&self, resource: ResourceRef) -> StoreResult<CascadeDeleteStats> {
            let mut tx = self.pool.begin().await?;
            let mut stats = CascadeDeleteStats::default();

            match resource {
                ResourceRef::User(id) => {
                    require_row(&mut tx, "users", "user", id).await?;
                    stats.project_permissions +=
                        sqlx::query("DELETE FROM permissions_projectuser WHERE user_id = ?")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?
                            .rows_affected();
                    stats.dataset_permissions +=
                        sqlx::query("DELETE FROM permissions_datasetuser WHERE user_id = ?")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?
                            .rows_affected();
                    stats.users += delete_by_id(&mut tx, "users", id).await?;
                }
                ResourceRef::Project(id) => {
                    require_row(&mut tx, "projects", "project", id).await?;
                    delete_pairings_in(&mut tx, "project_id", id, &mut stats).await?;
                    stats.project_permissions +=
                        sqlx::query("DELETE FROM permissions_projectuser WHERE project_id = ?")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?
                            .rows_affected();
                    stats.projects += delete_by_id(&mut tx, "projects", id).await?;
                }
                ResourceRef::Dataset(id) => {
                    require_row(&mut tx, "datasets", "dataset", id).await?;
                    delete_pairings_in(&mut tx, "dataset_id", id, &mut stats).await?;
                    delete_entities_in(&mut tx, "dataset_id", id, &mut stats).await?;
                    stats.dataset_permissions +=
                        sqlx::query("DELETE FROM permissions_datasetuser WHERE dataset_id = ?")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?
                            .rows_affected();
                    stats.datasets += delete_by_id(&mut tx, "datasets", id).await?;
                }
                ResourceRef::ProjectDataset(id) => {
                    require_row(&mut tx, "project_datasets", "pairing", id).await?;
                    stats.metadata_filters +=
                        sqlx::query("DELETE FROM metadata_filters WHERE project_dataset_id = ?")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?
                            .rows_affected();
                    stats.project_datasets += delete_by_id(&mut tx, "project_datasets", id).await?;
                }
                ResourceRef::Entity(id) => {
                    require_row(&mut tx, "entities", "entity", id).await?;
                    delete_entities_in(&mut tx, "id", id, &mut stats).await?;
                }
                ResourceRef::Image(id) => {
                    require_row(&mut tx, "images", "image", id).await?;
                    stats.entity_images +=
                        sqlx::query("DELETE FROM entity_images WHERE image_id = ?")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?
                            .rows_affected();
                    stats.images += delete_by_id(&mut tx, "images", id).await?;
                }
                ResourceRef::MetadataKey(id) => {
                    require_row(&mut tx, "metadata_keys", "metadata key", id).await?;
                    delete_metadata_in(&mut tx, "key_id", id, &mut stats).await?;
                    stats.metadata_keys += delete_by_id(&mut tx, "metadata_keys", id).await?;
                }
                ResourceRef::Metadata(id) => {
                    require_row(&mut tx, "metadata", "metadata", id).await?;
                    delete_metadata_in(&mut tx, "id", id, &mut stats).await?;
                }
                ResourceRef::MetadataFilter(id) => {
                    require_row(&mut tx, "metadata_filters", "metadata filter", id).await?;
                    stats.metadata_filters += delete_by_id(&mut tx, "metadata_filters", id).await?;
                }
            }

            tx.commit().await?;
            tracing::debug!(%resource, total = stats.total(), ?stats, "Cascade delete committed");
            Ok(stats)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Identity
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT,
    last_name TEXT,
    username TEXT NOT NULL,
    email TEXT NOT NULL,
    picture TEXT,
    is_active INTEGER NOT NULL DEFAULT 0,
    is_admin INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

-- Resource hierarchy
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS datasets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS permissions_projectuser (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    can_view INTEGER NOT NULL DEFAULT 1,
    can_share INTEGER NOT NULL DEFAULT 0,
    can_modify INTEGER NOT NULL DEFAULT 0,
    can_delete INTEGER NOT NULL DEFAULT 0,
    can_admin INTEGER NOT NULL DEFAULT 0,
    CONSTRAINT unique_project_user UNIQUE (user_id, project_id)
);
CREATE INDEX IF NOT EXISTS idx_permissions_projectuser_project ON permissions_projectuser(project_id);

CREATE TABLE IF NOT EXISTS permissions_datasetuser (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
    can_create_project INTEGER NOT NULL DEFAULT 0,
    can_view INTEGER NOT NULL DEFAULT 1,
    can_share INTEGER NOT NULL DEFAULT 0,
    can_modify INTEGER NOT NULL DEFAULT 0,
    can_delete INTEGER NOT NULL DEFAULT 0,
    can_admin INTEGER NOT NULL DEFAULT 0,
    CONSTRAINT unique_dataset_user UNIQUE (user_id, dataset_id)
);
CREATE INDEX IF NOT EXISTS idx_permissions_datasetuser_dataset ON permissions_datasetuser(dataset_id);

CREATE TABLE IF NOT EXISTS project_datasets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
    CONSTRAINT unique_project_dataset UNIQUE (project_id, dataset_id)
);
CREATE INDEX IF NOT EXISTS idx_project_datasets_dataset ON project_datasets(dataset_id);

-- Entity graph
CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entities_dataset ON entities(dataset_id);

CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    CONSTRAINT unique_image_path UNIQUE (path)
);

CREATE TABLE IF NOT EXISTS entity_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    CONSTRAINT unique_entity_image UNIQUE (entity_id, image_id)
);
CREATE INDEX IF NOT EXISTS idx_entity_images_image ON entity_images(image_id);

-- Metadata
CREATE TABLE IF NOT EXISTS metadata_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    CONSTRAINT unique_key_names UNIQUE (name)
);

CREATE TABLE IF NOT EXISTS metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key_id INTEGER NOT NULL REFERENCES metadata_keys(id) ON DELETE CASCADE,
    value TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS unique_metadata_pair ON metadata(key_id, value);

CREATE TABLE IF NOT EXISTS entity_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    metadata_id INTEGER NOT NULL REFERENCES metadata(id) ON DELETE CASCADE,
    CONSTRAINT unique_entity_metadata UNIQUE (entity_id, metadata_id)
);
CREATE INDEX IF NOT EXISTS idx_entity_metadata_metadata ON entity_metadata(metadata_id);

-- Filtering
CREATE TABLE IF NOT EXISTS metadata_filters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_dataset_id INTEGER NOT NULL REFERENCES project_datasets(id) ON DELETE CASCADE,
    metadata_id INTEGER NOT NULL REFERENCES metadata(id) ON DELETE CASCADE,
    is_exclusion INTEGER NOT NULL DEFAULT 0,
    CONSTRAINT unique_metadata_filter UNIQUE (project_dataset_id, metadata_id, is_exclusion)
);
CREATE INDEX IF NOT EXISTS idx_metadata_filters_metadata ON metadata_filters(metadata_id);
"#;
