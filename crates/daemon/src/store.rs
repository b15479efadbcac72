// File-backed document store: `<data>/<environments>/<key>.json` per
// environment plus the singleton `<data>/settings.json`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use mocksmith_common::storage_key::storage_file_name;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::DaemonConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("document `{}` is not valid JSON: {source}", path.display())]
    Malformed { path: PathBuf, source: serde_json::Error },

    #[error("I/O error on `{}`: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Output formatting for persisted documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonFormat {
    /// Two-space indentation.
    #[default]
    Pretty,
    Compact,
}

impl JsonFormat {
    /// Interpret a `pretty` query flag: absent, `1`, or `true` select
    /// pretty output; any other explicit value selects compact output.
    pub fn from_pretty_flag(flag: Option<&str>) -> Self {
        match flag {
            None | Some("1") | Some("true") => Self::Pretty,
            Some(_) => Self::Compact,
        }
    }

    pub fn render(self, document: &Value) -> Result<String, serde_json::Error> {
        match self {
            Self::Pretty => serde_json::to_string_pretty(document),
            Self::Compact => serde_json::to_string(document),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    environments_dir: PathBuf,
    settings_path: PathBuf,
}

impl FileStore {
    pub fn new(config: &DaemonConfig) -> Self {
        Self { environments_dir: config.environments_path(), settings_path: config.settings_path() }
    }

    pub fn environments_dir(&self) -> &Path {
        &self.environments_dir
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Confined on-disk location for an externally supplied identifier.
    pub fn environment_path(&self, id: &str) -> PathBuf {
        self.environments_dir.join(storage_file_name(id))
    }

    pub async fn read_settings(&self) -> Result<Value, StoreError> {
        read_json_file(&self.settings_path).await
    }

    pub async fn write_settings(&self, settings: &Value, format: JsonFormat) -> Result<(), StoreError> {
        write_json_file(&self.settings_path, settings, format).await
    }

    pub async fn read_environment(&self, id: &str) -> Result<Value, StoreError> {
        read_json_file(&self.environment_path(id)).await
    }

    pub async fn write_environment(
        &self,
        id: &str,
        environment: &Value,
        format: JsonFormat,
    ) -> Result<(), StoreError> {
        write_json_file(&self.environment_path(id), environment, format).await
    }

    pub async fn delete_environment(&self, id: &str) -> Result<(), StoreError> {
        let path = self.environment_path(id);
        tokio::fs::remove_file(&path).await.map_err(|source| io_error(path, source))
    }
}

/// Read and parse a JSON document.
pub async fn read_json_file(path: &Path) -> Result<Value, StoreError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| io_error(path.to_path_buf(), source))?;
    serde_json::from_slice(&bytes)
        .map_err(|source| StoreError::Malformed { path: path.to_path_buf(), source })
}

/// Serialize and atomically replace a JSON document, creating parent
/// directories as needed.
pub async fn write_json_file(path: &Path, document: &Value, format: JsonFormat) -> Result<(), StoreError> {
    let contents = format.render(document)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| io_error(parent.to_path_buf(), source))?;
    }

    let tmp_path = temp_path_for(path);
    tokio::fs::write(&tmp_path, contents.as_bytes())
        .await
        .map_err(|source| io_error(tmp_path.clone(), source))?;
    if let Err(source) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(io_error(path.to_path_buf(), source));
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{file_name}.tmp.{}", Uuid::new_v4().simple()))
}

fn io_error(path: PathBuf, source: std::io::Error) -> StoreError {
    if source.kind() == ErrorKind::NotFound {
        StoreError::NotFound { path }
    } else {
        StoreError::Io { path, source }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn store_in(tmp: &TempDir) -> FileStore {
        FileStore {
            environments_dir: tmp.path().join("environments"),
            settings_path: tmp.path().join("settings.json"),
        }
    }

    #[test]
    fn pretty_flag_interpretation() {
        assert_eq!(JsonFormat::from_pretty_flag(None), JsonFormat::Pretty);
        assert_eq!(JsonFormat::from_pretty_flag(Some("1")), JsonFormat::Pretty);
        assert_eq!(JsonFormat::from_pretty_flag(Some("true")), JsonFormat::Pretty);
        assert_eq!(JsonFormat::from_pretty_flag(Some("0")), JsonFormat::Compact);
        assert_eq!(JsonFormat::from_pretty_flag(Some("false")), JsonFormat::Compact);
        assert_eq!(JsonFormat::from_pretty_flag(Some("")), JsonFormat::Compact);
    }

    #[test]
    fn environment_path_is_confined() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        assert_eq!(
            store.environment_path("../../etc/passwd"),
            tmp.path().join("environments").join("passwd.json")
        );
    }

    #[tokio::test]
    async fn write_then_read_environment() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let doc = json!({ "uuid": "env-1", "name": "Users" });

        store.write_environment("users", &doc, JsonFormat::Pretty).await.unwrap();
        assert_eq!(store.read_environment("users.json").await.unwrap(), doc);

        let raw = std::fs::read_to_string(store.environment_path("users")).unwrap();
        assert!(raw.contains("\n  \"uuid\""));
    }

    #[tokio::test]
    async fn compact_write_has_no_newlines() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store
            .write_settings(&json!({ "environments": [], "a": { "b": 1 } }), JsonFormat::Compact)
            .await
            .unwrap();
        let raw = std::fs::read_to_string(store.settings_path()).unwrap();
        assert!(!raw.contains('\n'));
    }

    #[tokio::test]
    async fn missing_documents_are_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        assert!(matches!(store.read_settings().await, Err(StoreError::NotFound { .. })));
        assert!(matches!(store.read_environment("nope").await, Err(StoreError::NotFound { .. })));
        assert!(matches!(store.delete_environment("nope").await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn malformed_document_is_reported() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        std::fs::create_dir_all(store.environments_dir()).unwrap();
        std::fs::write(store.environment_path("broken"), "{ not json").unwrap();
        assert!(matches!(store.read_environment("broken").await, Err(StoreError::Malformed { .. })));
    }

    #[tokio::test]
    async fn write_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.write_environment("a", &json!({ "uuid": "a" }), JsonFormat::Pretty).await.unwrap();
        store.write_environment("a", &json!({ "uuid": "a", "v": 2 }), JsonFormat::Pretty).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(store.environments_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json".to_string()]);
    }
}
