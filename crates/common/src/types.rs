// Core data model shared across all Mocksmith crates.
//
// Environment and settings documents are opaque JSON objects; only the
// fields named here are interpreted.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Identifying field of an environment document.
pub const ENVIRONMENT_UUID_FIELD: &str = "uuid";
/// Settings field holding the descriptor list.
pub const SETTINGS_ENVIRONMENTS_FIELD: &str = "environments";
/// Settings field holding the active environment's uuid.
pub const SETTINGS_ACTIVE_FIELD: &str = "activeEnvironmentUuid";

/// Settings-side record pointing at one environment document.
///
/// Identity is `uuid`; `path` is the storage key and may be corrected in
/// place when the backing file is renamed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDescriptor {
    pub uuid: String,
    pub path: String,
    /// Always `false` for locally stored documents.
    #[serde(default)]
    pub cloud: bool,
    #[serde(default)]
    pub last_server_hash: Option<String>,
}

impl EnvironmentDescriptor {
    pub fn local(uuid: impl Into<String>, path: impl Into<String>) -> Self {
        Self { uuid: uuid.into(), path: path.into(), cloud: false, last_server_hash: None }
    }
}

/// Extract the non-empty `uuid` of an environment document.
pub fn environment_uuid(document: &Value) -> Option<&str> {
    document
        .get(ENVIRONMENT_UUID_FIELD)
        .and_then(Value::as_str)
        .filter(|uuid| !uuid.trim().is_empty())
}

/// Build a complete settings document with default preferences.
///
/// The first descriptor, if any, becomes the active environment.
pub fn default_settings(descriptors: &[EnvironmentDescriptor]) -> Value {
    let active = descriptors.first().map(|descriptor| descriptor.uuid.clone());
    json!({
        "welcomeShown": true,
        "maxLogsPerEnvironment": 50,
        "truncateRouteName": true,
        "mainMenuSize": 100,
        "secondaryMenuSize": 200,
        "fakerLocale": "en",
        "fakerSeed": null,
        "lastChangelog": "",
        "environments": descriptors,
        "activeEnvironmentUuid": active,
        "logTransactions": false,
        "fileWatcherEnabled": "disabled",
        "storagePrettyPrint": true,
        "enableTelemetry": false,
    })
}

/// Whether the settings' active environment is missing, null, or empty.
pub fn active_environment_unset(settings: &Map<String, Value>) -> bool {
    match settings.get(SETTINGS_ACTIVE_FIELD) {
        None | Some(Value::Null) => true,
        Some(Value::String(uuid)) => uuid.is_empty(),
        Some(_) => false,
    }
}
