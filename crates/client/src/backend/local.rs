// Embedded backend: a local SQLite database.
//
// Environments live in one table keyed by storage key; settings are a
// single serialized value in a separate key/value table. Each operation
// opens its own connection, runs exactly one transaction, and drops the
// connection on every exit path.

use std::path::{Path, PathBuf};

use mocksmith_common::storage_key::storage_file_name;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use crate::error::PersistenceError;

/// Fixed key of the settings value in the `kv` table.
pub const SETTINGS_KEY: &str = "settings";

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE environments (
    storage_key     TEXT PRIMARY KEY,
    document        TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE kv (
    key             TEXT PRIMARY KEY,
    value           TEXT NOT NULL
);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

#[derive(Debug, Clone)]
pub struct LocalBackend {
    path: PathBuf,
}

impl LocalBackend {
    /// Create or upgrade the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let backend = Self { path };
        backend
            .with_connection(|conn| {
                ensure_migration_table(conn)?;
                apply_pending_migrations(conn)
            })
            .await?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_settings(&self) -> Result<Option<Value>, PersistenceError> {
        let raw = self
            .with_connection(|conn| {
                let tx = conn.transaction()?;
                let raw = tx
                    .query_row("SELECT value FROM kv WHERE key = ?1", [SETTINGS_KEY], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                tx.commit()?;
                Ok(raw)
            })
            .await?;
        raw.map(|raw| serde_json::from_str(&raw)).transpose().map_err(Into::into)
    }

    /// `pretty` has no effect on the stored value.
    pub async fn write_settings(&self, settings: &Value, _pretty: bool) -> Result<(), PersistenceError> {
        let serialized = serde_json::to_string(settings)?;
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![SETTINGS_KEY, serialized],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn read_environment(&self, id: &str) -> Result<Option<Value>, PersistenceError> {
        let key = storage_file_name(id);
        let raw = self
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let raw = tx
                    .query_row(
                        "SELECT document FROM environments WHERE storage_key = ?1",
                        [&key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                tx.commit()?;
                Ok(raw)
            })
            .await?;
        raw.map(|raw| serde_json::from_str(&raw)).transpose().map_err(Into::into)
    }

    pub async fn write_environment(
        &self,
        id: &str,
        environment: &Value,
        _pretty: bool,
    ) -> Result<(), PersistenceError> {
        let key = storage_file_name(id);
        let serialized = serde_json::to_string(environment)?;
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO environments (storage_key, document, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(storage_key) DO UPDATE
                 SET document = excluded.document, updated_at = excluded.updated_at",
                params![key, serialized],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Returns `false` if there was nothing to delete.
    pub async fn delete_environment(&self, id: &str) -> Result<bool, PersistenceError> {
        let key = storage_file_name(id);
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM environments WHERE storage_key = ?1", [&key])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    /// Run `operation` on a fresh connection off the async runtime. The
    /// connection is dropped when the closure returns, success or not.
    async fn with_connection<T, F>(&self, operation: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let mut conn = Connection::open(&path)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            debug!(path = %path.display(), "opened local storage connection");
            operation(&mut conn)
        })
        .await?
    }
}

fn ensure_migration_table(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<i64, PersistenceError> {
    Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
        row.get(0)
    })?)
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<(), PersistenceError> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )?;
        tx.commit()?;
        current_version = *version;
    }

    Ok(())
}
