// Startup reconciliation of environment documents and the settings document.
//
// Runs to completion before the storage API or the engine start. Files are
// resolved strictly in configured order: synthesized names and ports depend
// on the file's index.

use std::path::PathBuf;

use mocksmith_common::storage_key::storage_file_name;
use mocksmith_common::types::{
    active_environment_unset, default_settings, environment_uuid, EnvironmentDescriptor,
    ENVIRONMENT_UUID_FIELD, SETTINGS_ACTIVE_FIELD, SETTINGS_ENVIRONMENTS_FIELD,
};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DaemonConfig;
use crate::store::{read_json_file, write_json_file, JsonFormat, StoreError};

/// Name given to the first synthesized environment; later ones get `#N`.
pub const DEFAULT_ENVIRONMENT_NAME: &str = "Demo API";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("no environment data files configured; nothing to serve")]
    NoTargets,

    #[error("environment file `{file}` is invalid: {detail}")]
    Validation { file: String, detail: String },

    #[error("I/O error on `{}`: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<StoreError> for BootstrapError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { path } => Self::Io {
                path,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
            StoreError::Malformed { path, source } => Self::Validation {
                file: path.display().to_string(),
                detail: source.to_string(),
            },
            StoreError::Io { path, source } => Self::Io { path, source },
            StoreError::Serialize(source) => Self::Serialize(source),
        }
    }
}

/// What happened to the settings document during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOutcome {
    /// Missing or unparsable; replaced with defaults.
    Created,
    /// Existing document patched with new or moved descriptors.
    Updated,
    /// Already consistent; not written.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct BootstrapReport {
    /// One descriptor per resolved environment, in file order.
    pub descriptors: Vec<EnvironmentDescriptor>,
    /// Absolute-or-configured paths of the resolved environment files.
    pub environment_files: Vec<PathBuf>,
    /// Storage keys of environment files synthesized during this run.
    pub created: Vec<String>,
    pub settings: SettingsOutcome,
    /// Number of files written during this run.
    pub writes: usize,
}

/// Ensure every configured environment file exists with a valid `uuid` and
/// that the settings document lists a descriptor for each.
pub async fn reconcile(config: &DaemonConfig) -> Result<BootstrapReport, BootstrapError> {
    if config.data_files.is_empty() {
        return Err(BootstrapError::NoTargets);
    }

    let environments_dir = config.environments_path();
    tokio::fs::create_dir_all(&environments_dir)
        .await
        .map_err(|source| BootstrapError::Io { path: environments_dir.clone(), source })?;

    let mut report = BootstrapReport {
        descriptors: Vec::with_capacity(config.data_files.len()),
        environment_files: Vec::with_capacity(config.data_files.len()),
        created: Vec::new(),
        settings: SettingsOutcome::Unchanged,
        writes: 0,
    };

    for (index, requested) in config.data_files.iter().enumerate() {
        let key = storage_file_name(requested);
        if report.descriptors.iter().any(|descriptor| descriptor.path == key) {
            warn!(file = %key, requested = %requested, "environment file listed more than once, skipping duplicate");
            continue;
        }
        let path = environments_dir.join(&key);

        let uuid = match read_json_file(&path).await {
            Ok(document) => environment_uuid(&document)
                .map(ToOwned::to_owned)
                .ok_or_else(|| BootstrapError::Validation {
                    file: key.clone(),
                    detail: format!("missing or empty `{ENVIRONMENT_UUID_FIELD}` field"),
                })?,
            Err(StoreError::NotFound { .. }) => {
                let document = new_environment_document(index, config);
                write_json_file(&path, &document, JsonFormat::Pretty).await?;
                report.writes += 1;
                report.created.push(key.clone());
                info!(path = %path.display(), port = %document["port"], "created environment file");
                environment_uuid(&document).map(ToOwned::to_owned).unwrap_or_default()
            }
            Err(StoreError::Malformed { source, .. }) => {
                return Err(BootstrapError::Validation { file: key, detail: source.to_string() });
            }
            Err(error) => return Err(error.into()),
        };

        if let Some(first) = report.descriptors.iter().find(|descriptor| descriptor.uuid == uuid) {
            return Err(BootstrapError::Validation {
                file: key,
                detail: format!("`{ENVIRONMENT_UUID_FIELD}` {uuid} is already used by `{}`", first.path),
            });
        }
        report.descriptors.push(EnvironmentDescriptor::local(uuid, key));
        report.environment_files.push(path);
    }

    let settings_path = config.settings_path();
    let existing = match read_json_file(&settings_path).await {
        Ok(Value::Object(settings)) => Some(settings),
        Ok(_) => {
            warn!(path = %settings_path.display(), "settings document is not an object, replacing");
            None
        }
        Err(StoreError::NotFound { .. }) => None,
        Err(StoreError::Malformed { source, .. }) => {
            warn!(path = %settings_path.display(), error = %source, "settings document is unparsable, replacing");
            None
        }
        Err(error) => return Err(error.into()),
    };

    report.settings = match existing {
        None => {
            write_json_file(&settings_path, &default_settings(&report.descriptors), JsonFormat::Pretty)
                .await?;
            report.writes += 1;
            SettingsOutcome::Created
        }
        Some(mut settings) => {
            if reconcile_settings(&mut settings, &report.descriptors)? {
                write_json_file(&settings_path, &Value::Object(settings), JsonFormat::Pretty).await?;
                report.writes += 1;
                SettingsOutcome::Updated
            } else {
                SettingsOutcome::Unchanged
            }
        }
    };

    info!(
        environments = report.descriptors.len(),
        created = report.created.len(),
        settings = ?report.settings,
        writes = report.writes,
        "bootstrap reconciliation complete"
    );
    Ok(report)
}

/// Merge resolved descriptors into an existing settings document.
///
/// Descriptors are matched by `uuid`: unknown ones are appended, known ones
/// get their `path` corrected in place. Entries for environments that are
/// no longer configured are left untouched. Returns whether anything changed.
pub fn reconcile_settings(
    settings: &mut Map<String, Value>,
    descriptors: &[EnvironmentDescriptor],
) -> Result<bool, serde_json::Error> {
    let mut changed = false;

    let list = settings
        .entry(SETTINGS_ENVIRONMENTS_FIELD)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !list.is_array() {
        *list = Value::Array(Vec::new());
        changed = true;
    }

    if let Value::Array(entries) = list {
        for descriptor in descriptors {
            let existing = entries.iter_mut().find(|entry| {
                entry.get(ENVIRONMENT_UUID_FIELD).and_then(Value::as_str) == Some(&descriptor.uuid)
            });
            match existing {
                None => {
                    entries.push(serde_json::to_value(descriptor)?);
                    changed = true;
                }
                Some(entry) => {
                    if entry.get("path").and_then(Value::as_str) != Some(descriptor.path.as_str()) {
                        entry["path"] = Value::String(descriptor.path.clone());
                        changed = true;
                    }
                }
            }
        }
    }

    if active_environment_unset(settings) {
        let first_listed = settings
            .get(SETTINGS_ENVIRONMENTS_FIELD)
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get(ENVIRONMENT_UUID_FIELD))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .or_else(|| descriptors.first().map(|descriptor| descriptor.uuid.clone()));
        if let Some(uuid) = first_listed {
            settings.insert(SETTINGS_ACTIVE_FIELD.to_string(), Value::String(uuid));
            changed = true;
        }
    }

    Ok(changed)
}

/// Name for the environment synthesized at `index`.
pub fn environment_name(index: usize, overrides: &[String]) -> String {
    match overrides.get(index).map(|name| name.trim()).filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None if index == 0 => DEFAULT_ENVIRONMENT_NAME.to_string(),
        None => format!("{DEFAULT_ENVIRONMENT_NAME} #{}", index + 1),
    }
}

fn new_environment_document(index: usize, config: &DaemonConfig) -> Value {
    let offset = u16::try_from(index).unwrap_or(u16::MAX);
    json!({
        "uuid": Uuid::new_v4().to_string(),
        "name": environment_name(index, &config.environment_names),
        "endpointPrefix": "",
        "latency": 0,
        "port": config.base_port.saturating_add(offset),
        "hostname": "",
        "folders": [],
        "routes": [],
        "rootChildren": [],
        "proxyMode": false,
        "proxyHost": "",
        "proxyRemovePrefix": false,
        "tlsOptions": {
            "enabled": false,
            "type": "CERT",
            "pfxPath": "",
            "certPath": "",
            "keyPath": "",
            "caPath": "",
            "passphrase": "",
        },
        "cors": true,
        "headers": [{ "key": "Content-Type", "value": "application/json" }],
        "proxyReqHeaders": [],
        "proxyResHeaders": [],
        "data": [],
        "callbacks": [],
    })
}
