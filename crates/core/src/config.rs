//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Catalog database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatabaseConfig {
    /// SQLite database (single-node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds. Advisory only: SQLite cannot cancel
        /// a running statement.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// Prefer NIVIZ_DATABASE__PASSWORD over storing it in a file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(60)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/niviz.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl DatabaseConfig {
    /// Validate database configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            DatabaseConfig::Sqlite { .. } => Ok(()),
            DatabaseConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Permission policy configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionsConfig {
    /// Close every written grant under admin ⊇ delete ⊇ modify ⊇ share ⊇ view
    /// (default: false, flags stay independent).
    #[serde(default)]
    pub enforce_hierarchy: bool,
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Catalog database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Permission policy.
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

impl AppConfig {
    /// Configuration backed by a SQLite file at `path`.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: path.into(),
                query_timeout_secs: default_sqlite_query_timeout_secs(),
            },
            permissions: PermissionsConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.database.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sqlite() {
        let config = AppConfig::default();
        assert!(matches!(config.database, DatabaseConfig::Sqlite { .. }));
        assert!(!config.permissions.enforce_hierarchy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_requires_url_or_host_and_database() {
        let json = r#"{"type":"postgres","host":"db.internal"}"#;
        let config: DatabaseConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{"type":"postgres","host":"db.internal","database":"niviz"}"#;
        let config: DatabaseConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());

        let json = r#"{"type":"postgres","url":"postgres://localhost/niviz"}"#;
        let config: DatabaseConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_defaults() {
        let json = r#"{"type":"postgres","url":"postgres://localhost/niviz"}"#;
        let config: DatabaseConfig = serde_json::from_str(json).unwrap();
        match config {
            DatabaseConfig::Postgres {
                port,
                max_connections,
                statement_timeout_ms,
                ..
            } => {
                assert_eq!(port, Some(5432));
                assert_eq!(max_connections, 10);
                assert_eq!(statement_timeout_ms, Some(30_000));
            }
            _ => panic!("expected postgres config"),
        }
    }

    #[test]
    fn test_permissions_section_optional() {
        let json = r#"{"database":{"type":"sqlite","path":"/tmp/niviz.db"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert!(!config.permissions.enforce_hierarchy);

        let json = r#"{"permissions":{"enforce_hierarchy":true}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert!(config.permissions.enforce_hierarchy);
    }
}
