//! PostgreSQL-based catalog store implementation.

use crate::error::{StoreError, StoreResult, classify_fk, is_unique_violation};
use crate::models::*;
use crate::repos::{
    CascadeRepo, DatasetRepo, EntityRepo, FilterRepo, GrantRepo, ImageRepo, MetadataRepo,
    ProjectRepo, UserRepo,
};
use crate::store::CatalogStore;
use async_trait::async_trait;
use niviz_core::config::PgSslMode;
use niviz_core::{
    CapabilitySet, ImagePath, MetadataKeyName, MetadataValue, NewUser, ResourceKind, ResourceRef,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{PgConnection, Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based catalog store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> StoreResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters,
    /// so the password can come from the environment instead of a URL.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> StoreResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Alias for `from_url`.
    pub async fn new(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> StoreResult<Self> {
        Self::from_url(url, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> StoreResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn migrate(&self) -> StoreResult<()> {
        let metadata_exists: bool =
            sqlx::query_scalar("SELECT to_regclass('metadata') IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        if metadata_exists {
            let duplicates: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM (SELECT key_id, value FROM metadata GROUP BY key_id, value HAVING COUNT(*) > 1) d",
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

        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Shared helpers (run inside a caller's transaction)
// -------------------------------------------------------------------------

async fn row_exists(
    conn: &mut PgConnection,
    table: &'static str,
    id: i64,
) -> StoreResult<bool> {
    let exists: bool =
        sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = $1)"))
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(exists)
}

async fn require_row(
    conn: &mut PgConnection,
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

async fn touch_entity_in(conn: &mut PgConnection, entity_id: i64) -> StoreResult<()> {
    sqlx::query("UPDATE entities SET updated_at = $1 WHERE id = $2")
        .bind(OffsetDateTime::now_utc())
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn resolve_key_in(
    conn: &mut PgConnection,
    name: &MetadataKeyName,
) -> StoreResult<MetadataKeyRow> {
    sqlx::query("INSERT INTO metadata_keys (name) VALUES ($1) ON CONFLICT(name) DO NOTHING")
        .bind(name.as_str())
        .execute(&mut *conn)
        .await?;
    let row =
        sqlx::query_as::<_, MetadataKeyRow>("SELECT * FROM metadata_keys WHERE name = $1")
            .bind(name.as_str())
            .fetch_one(&mut *conn)
            .await?;
    Ok(row)
}

async fn resolve_metadata_in(
    conn: &mut PgConnection,
    key: &MetadataKeyName,
    value: &MetadataValue,
) -> StoreResult<MetadataRow> {
    let key_row = resolve_key_in(conn, key).await?;
    sqlx::query(
        "INSERT INTO metadata (key_id, value) VALUES ($1, $2) ON CONFLICT(key_id, value) DO NOTHING",
    )
    .bind(key_row.id)
    .bind(value.as_str())
    .execute(&mut *conn)
    .await?;
    let row = sqlx::query_as::<_, MetadataRow>(
        "SELECT * FROM metadata WHERE key_id = $1 AND value = $2",
    )
    .bind(key_row.id)
    .bind(value.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

async fn insert_tag_in(
    conn: &mut PgConnection,
    entity_id: i64,
    metadata_id: i64,
) -> StoreResult<EntityMetadataRow> {
    let result = sqlx::query_as::<_, EntityMetadataRow>(
        "INSERT INTO entity_metadata (entity_id, metadata_id) VALUES ($1, $2) RETURNING *",
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
    conn: &mut PgConnection,
    project_dataset_id: i64,
    metadata_id: i64,
    is_exclusion: bool,
) -> StoreResult<MetadataFilterRow> {
    let result = sqlx::query_as::<_, MetadataFilterRow>(
        "INSERT INTO metadata_filters (project_dataset_id, metadata_id, is_exclusion) VALUES ($1, $2, $3) RETURNING *",
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
    conn: &mut PgConnection,
    column: &'static str,
    id: i64,
    stats: &mut CascadeDeleteStats,
) -> StoreResult<()> {
    stats.metadata_filters += sqlx::query(&format!(
        "DELETE FROM metadata_filters WHERE project_dataset_id IN \
         (SELECT id FROM project_datasets WHERE {column} = $1)"
    ))
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    stats.project_datasets += sqlx::query(&format!(
        "DELETE FROM project_datasets WHERE {column} = $1"
    ))
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(())
}

/// Remove entities matching `column = id` together with their joins.
async fn delete_entities_in(
    conn: &mut PgConnection,
    column: &'static str,
    id: i64,
    stats: &mut CascadeDeleteStats,
) -> StoreResult<()> {
    stats.entity_images += sqlx::query(&format!(
        "DELETE FROM entity_images WHERE entity_id IN (SELECT id FROM entities WHERE {column} = $1)"
    ))
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    stats.entity_metadata += sqlx::query(&format!(
        "DELETE FROM entity_metadata WHERE entity_id IN (SELECT id FROM entities WHERE {column} = $1)"
    ))
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    stats.entities += sqlx::query(&format!("DELETE FROM entities WHERE {column} = $1"))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(())
}

/// Remove metadata rows matching `column = id` with their tags and filters.
async fn delete_metadata_in(
    conn: &mut PgConnection,
    column: &'static str,
    id: i64,
    stats: &mut CascadeDeleteStats,
) -> StoreResult<()> {
    stats.metadata_filters += sqlx::query(&format!(
        "DELETE FROM metadata_filters WHERE metadata_id IN (SELECT id FROM metadata WHERE {column} = $1)"
    ))
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    stats.entity_metadata += sqlx::query(&format!(
        "DELETE FROM entity_metadata WHERE metadata_id IN (SELECT id FROM metadata WHERE {column} = $1)"
    ))
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    stats.metadata += sqlx::query(&format!("DELETE FROM metadata WHERE {column} = $1"))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(())
}

async fn delete_by_id(
    conn: &mut PgConnection,
    table: &'static str,
    id: i64,
) -> StoreResult<u64> {
    let deleted = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
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
impl UserRepo for PostgresStore {
    async fn create_user(&self, user: &NewUser) -> StoreResult<UserRow> {
        user.validate()?;
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (first_name, last_name, username, email, picture, is_active, is_admin)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE username = $1 ORDER BY id LIMIT 1",
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
            "UPDATE users SET is_active = $1, is_admin = $2 WHERE id = $3 RETURNING *",
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
impl ProjectRepo for PostgresStore {
    async fn create_project(&self, name: &str) -> StoreResult<ProjectRow> {
        niviz_core::user::validate_resource_name(name)?;
        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, ProjectRow>(
            "INSERT INTO projects (name, created_at, updated_at) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_project(&self, project_id: i64) -> StoreResult<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1")
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
            "UPDATE projects SET name = $1, updated_at = $2 WHERE id = $3 RETURNING *",
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
            "INSERT INTO project_datasets (project_id, dataset_id) VALUES ($1, $2) RETURNING *",
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
            "SELECT id FROM project_datasets WHERE project_id = $1 AND dataset_id = $2",
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
            sqlx::query("DELETE FROM metadata_filters WHERE project_dataset_id = $1")
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
            "SELECT * FROM project_datasets WHERE id = $1",
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
            "SELECT * FROM project_datasets WHERE project_id = $1 AND dataset_id = $2",
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
            "SELECT * FROM project_datasets WHERE project_id = $1 ORDER BY id",
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
            "SELECT * FROM project_datasets WHERE dataset_id = $1 ORDER BY id",
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
impl DatasetRepo for PostgresStore {
    async fn create_dataset(&self, name: Option<&str>) -> StoreResult<DatasetRow> {
        if let Some(name) = name {
            niviz_core::user::validate_resource_name(name)?;
        }
        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, DatasetRow>(
            "INSERT INTO datasets (name, created_at, updated_at) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_dataset(&self, dataset_id: i64) -> StoreResult<Option<DatasetRow>> {
        let row = sqlx::query_as::<_, DatasetRow>("SELECT * FROM datasets WHERE id = $1")
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
            "UPDATE datasets SET name = $1, updated_at = $2 WHERE id = $3 RETURNING *",
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
impl GrantRepo for PostgresStore {
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
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
            "SELECT * FROM permissions_projectuser WHERE user_id = $1 AND project_id = $2",
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
            "SELECT * FROM permissions_projectuser WHERE project_id = $1 ORDER BY user_id",
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
            "SELECT * FROM permissions_projectuser WHERE user_id = $1 ORDER BY project_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn revoke_project_grant(&self, user_id: i64, project_id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM permissions_projectuser WHERE user_id = $1 AND project_id = $2",
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            "SELECT * FROM permissions_datasetuser WHERE user_id = $1 AND dataset_id = $2",
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
            "SELECT * FROM permissions_datasetuser WHERE dataset_id = $1 ORDER BY user_id",
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
            "SELECT * FROM permissions_datasetuser WHERE user_id = $1 ORDER BY dataset_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn revoke_dataset_grant(&self, user_id: i64, dataset_id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM permissions_datasetuser WHERE user_id = $1 AND dataset_id = $2",
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
impl EntityRepo for PostgresStore {
    async fn create_entity(&self, dataset_id: i64) -> StoreResult<EntityRow> {
        let mut tx = self.pool.begin().await?;
        require_row(&mut tx, "datasets", "dataset", dataset_id).await?;

        let row = sqlx::query_as::<_, EntityRow>(
            "INSERT INTO entities (dataset_id, updated_at) VALUES ($1, $2) RETURNING *",
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
        let row = sqlx::query_as::<_, EntityRow>("SELECT * FROM entities WHERE id = $1")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_entities(&self, dataset_id: i64) -> StoreResult<Vec<EntityRow>> {
        let rows = sqlx::query_as::<_, EntityRow>(
            "SELECT * FROM entities WHERE dataset_id = $1 ORDER BY id",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_entities(&self, dataset_id: i64) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE dataset_id = $1")
                .bind(dataset_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn touch_entity(&self, entity_id: i64) -> StoreResult<EntityRow> {
        sqlx::query_as::<_, EntityRow>(
            "UPDATE entities SET updated_at = $1 WHERE id = $2 RETURNING *",
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
impl ImageRepo for PostgresStore {
    async fn attach_image(
        &self,
        entity_id: i64,
        path: &ImagePath,
    ) -> StoreResult<EntityImageRow> {
        let mut tx = self.pool.begin().await?;
        require_row(&mut tx, "entities", "entity", entity_id).await?;

        sqlx::query("INSERT INTO images (path) VALUES ($1) ON CONFLICT(path) DO NOTHING")
            .bind(path.as_str())
            .execute(&mut *tx)
            .await?;
        let image_id: i64 = sqlx::query_scalar("SELECT id FROM images WHERE path = $1")
            .bind(path.as_str())
            .fetch_one(&mut *tx)
            .await?;

        let result = sqlx::query_as::<_, EntityImageRow>(
            "INSERT INTO entity_images (entity_id, image_id) VALUES ($1, $2) RETURNING *",
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
            sqlx::query("DELETE FROM entity_images WHERE entity_id = $1 AND image_id = $2")
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
        let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE id = $1")
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_image_by_path(&self, path: &str) -> StoreResult<Option<ImageRow>> {
        let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE path = $1")
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
            WHERE ei.entity_id = $1
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
            "SELECT entity_id FROM entity_images WHERE image_id = $1 ORDER BY entity_id",
        )
        .bind(image_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn image_reference_count(&self, image_id: i64) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entity_images WHERE image_id = $1")
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
impl MetadataRepo for PostgresStore {
    async fn resolve_key(&self, name: &MetadataKeyName) -> StoreResult<MetadataKeyRow> {
        let mut tx = self.pool.begin().await?;
        let row = resolve_key_in(&mut tx, name).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn get_key_by_name(&self, name: &str) -> StoreResult<Option<MetadataKeyRow>> {
        let row =
            sqlx::query_as::<_, MetadataKeyRow>("SELECT * FROM metadata_keys WHERE name = $1")
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
            WHERE k.name = $1 AND m.value = $2
            "#,
        )
        .bind(key)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_metadata(&self, metadata_id: i64) -> StoreResult<Option<MetadataRow>> {
        let row = sqlx::query_as::<_, MetadataRow>("SELECT * FROM metadata WHERE id = $1")
            .bind(metadata_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_key_values(&self, key_id: i64) -> StoreResult<Vec<MetadataRow>> {
        let rows = sqlx::query_as::<_, MetadataRow>(
            "SELECT * FROM metadata WHERE key_id = $1 ORDER BY value",
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
            sqlx::query("DELETE FROM entity_metadata WHERE entity_id = $1 AND metadata_id = $2")
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
            WHERE em.entity_id = $1
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
            "SELECT entity_id FROM entity_metadata WHERE metadata_id = $1 ORDER BY entity_id",
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
impl FilterRepo for PostgresStore {
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
            "SELECT * FROM metadata_filters WHERE id = $1",
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
            "SELECT * FROM metadata_filters WHERE project_dataset_id = $1 ORDER BY id",
        )
        .bind(project_dataset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn working_set(&self, project_dataset_id: i64) -> StoreResult<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let dataset_id: Option<i64> =
            sqlx::query_scalar("SELECT dataset_id FROM project_datasets WHERE id = $1")
                .bind(project_dataset_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(dataset_id) = dataset_id else {
            return Err(StoreError::NotFound(format!("pairing {project_dataset_id}")));
        };

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT e.id FROM entities e
            WHERE e.dataset_id = $1
              AND NOT EXISTS (
                SELECT 1 FROM metadata_filters f
                WHERE f.project_dataset_id = $2
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
impl CascadeRepo for PostgresStore {
    async fn delete(&self, resource: ResourceRef) -> StoreResult<CascadeDeleteStats> {
        let mut tx = self.pool.begin().await?;
        let mut stats = CascadeDeleteStats::default();

        match resource {
            ResourceRef::User(id) => {
                require_row(&mut tx, "users", "user", id).await?;
                stats.project_permissions +=
                    sqlx::query("DELETE FROM permissions_projectuser WHERE user_id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                stats.dataset_permissions +=
                    sqlx::query("DELETE FROM permissions_datasetuser WHERE user_id = $1")
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
                    sqlx::query("DELETE FROM permissions_projectuser WHERE project_id = $1")
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
                    sqlx::query("DELETE FROM permissions_datasetuser WHERE dataset_id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                stats.datasets += delete_by_id(&mut tx, "datasets", id).await?;
            }
            ResourceRef::ProjectDataset(id) => {
                require_row(&mut tx, "project_datasets", "pairing", id).await?;
                stats.metadata_filters +=
                    sqlx::query("DELETE FROM metadata_filters WHERE project_dataset_id = $1")
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
                    sqlx::query("DELETE FROM entity_images WHERE image_id = $1")
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_schema_statements_skips_empty_and_comment_only() {
        let schema = r#"
            -- comment only

            CREATE TABLE foo (id int);
            ;
            -- another comment
            CREATE TABLE bar (id int);
        "#;

        let statements = postgres_schema_statements(schema);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE foo"));
        assert!(statements[1].contains("CREATE TABLE bar"));
    }

    #[test]
    fn embedded_schema_creates_every_table() {
        let statements = postgres_schema_statements(POSTGRES_SCHEMA);
        for table in [
            "users",
            "projects",
            "datasets",
            "permissions_projectuser",
            "permissions_datasetuser",
            "project_datasets",
            "entities",
            "images",
            "entity_images",
            "metadata_keys",
            "metadata",
            "entity_metadata",
            "metadata_filters",
        ] {
            let create = format!("CREATE TABLE IF NOT EXISTS {table} (");
            assert!(
                statements.iter().any(|s| s.contains(&create)),
                "missing table {table}"
            );
        }
    }
}
