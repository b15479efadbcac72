use std::collections::{HashMap, HashSet};
use std::path::Path;

use mocksmith_daemon::bootstrap::{reconcile, BootstrapError, SettingsOutcome};
use mocksmith_daemon::config::DaemonConfig;
use serde_json::{json, Value};
use tempfile::TempDir;

fn config_for(data_dir: &Path, overrides: &[(&str, &str)]) -> DaemonConfig {
    let mut vars: HashMap<String, String> = overrides
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    vars.insert("MOCKSMITH_DATA_DIR".into(), data_dir.to_string_lossy().into_owned());
    DaemonConfig::from_env_fn(move |key| vars.get(key).cloned().ok_or(std::env::VarError::NotPresent))
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).expect("file should exist"))
        .expect("file should be JSON")
}

fn snapshot_dir(root: &Path) -> HashMap<String, String> {
    let mut files = HashMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.insert(
                    path.strip_prefix(root).unwrap().to_string_lossy().into_owned(),
                    std::fs::read_to_string(&path).unwrap(),
                );
            }
        }
    }
    files
}

#[tokio::test]
async fn second_run_performs_zero_writes() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path(), &[("MOCKSMITH_DATA_FILES", "users,orders.json,billing")]);

    let first = reconcile(&config).await.unwrap();
    assert_eq!(first.created.len(), 3);
    assert_eq!(first.settings, SettingsOutcome::Created);
    assert_eq!(first.writes, 4);

    let before = snapshot_dir(tmp.path());
    let second = reconcile(&config).await.unwrap();
    assert_eq!(second.writes, 0);
    assert!(second.created.is_empty());
    assert_eq!(second.settings, SettingsOutcome::Unchanged);
    assert_eq!(snapshot_dir(tmp.path()), before);

    let first_uuids: Vec<_> = first.descriptors.iter().map(|d| d.uuid.clone()).collect();
    let second_uuids: Vec<_> = second.descriptors.iter().map(|d| d.uuid.clone()).collect();
    assert_eq!(first_uuids, second_uuids);
}

#[tokio::test]
async fn every_resolved_file_gets_a_distinct_matching_descriptor() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("settings.json"), r#"{ "environments": [] }"#).unwrap();
    let config = config_for(tmp.path(), &[("MOCKSMITH_DATA_FILES", "a,b,c,d")]);

    let report = reconcile(&config).await.unwrap();
    assert_eq!(report.settings, SettingsOutcome::Updated);

    let settings = read_json(&tmp.path().join("settings.json"));
    let listed = settings["environments"].as_array().unwrap();
    assert_eq!(listed.len(), 4);

    let uuids: HashSet<&str> = listed.iter().filter_map(|entry| entry["uuid"].as_str()).collect();
    assert_eq!(uuids.len(), 4);

    for entry in listed {
        let path = entry["path"].as_str().unwrap();
        let document = read_json(&tmp.path().join("environments").join(path));
        assert_eq!(document["uuid"], entry["uuid"]);
    }
    assert_eq!(settings["activeEnvironmentUuid"], listed[0]["uuid"]);
}

#[tokio::test]
async fn synthesized_documents_use_index_based_names_and_ports() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(
        tmp.path(),
        &[
            ("MOCKSMITH_DATA_FILES", "first,second,third"),
            ("MOCKSMITH_BASE_PORT", "4000"),
            ("MOCKSMITH_ENVIRONMENT_NAMES", ",Orders"),
        ],
    );

    reconcile(&config).await.unwrap();
    let environments = tmp.path().join("environments");

    let first = read_json(&environments.join("first.json"));
    let second = read_json(&environments.join("second.json"));
    let third = read_json(&environments.join("third.json"));

    assert_eq!(first["name"], "Demo API");
    assert_eq!(second["name"], "Orders");
    assert_eq!(third["name"], "Demo API #3");
    assert_eq!(first["port"], 4000);
    assert_eq!(second["port"], 4001);
    assert_eq!(third["port"], 4002);

    let raw = std::fs::read_to_string(environments.join("first.json")).unwrap();
    assert!(raw.contains("\n  \"uuid\""), "documents are pretty-printed");
}

#[tokio::test]
async fn existing_documents_are_kept_and_paths_corrected() {
    let tmp = TempDir::new().unwrap();
    let environments = tmp.path().join("environments");
    std::fs::create_dir_all(&environments).unwrap();
    std::fs::write(
        environments.join("users.json"),
        json!({ "uuid": "user-env", "name": "Users", "port": 3999 }).to_string(),
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("settings.json"),
        json!({
            "environments": [
                { "uuid": "user-env", "path": "old-users.json", "cloud": false, "lastServerHash": null },
                { "uuid": "vanished", "path": "vanished.json", "cloud": false, "lastServerHash": null },
            ],
            "activeEnvironmentUuid": "vanished",
            "theme": "dark",
        })
        .to_string(),
    )
    .unwrap();

    let config = config_for(tmp.path(), &[("MOCKSMITH_DATA_FILES", "users")]);
    let report = reconcile(&config).await.unwrap();
    assert!(report.created.is_empty());
    assert_eq!(report.settings, SettingsOutcome::Updated);
    assert_eq!(report.writes, 1);

    let document = read_json(&environments.join("users.json"));
    assert_eq!(document["port"], 3999);

    let settings = read_json(&tmp.path().join("settings.json"));
    assert_eq!(settings["environments"][0]["path"], "users.json");
    assert_eq!(settings["environments"][1]["uuid"], "vanished");
    assert_eq!(settings["activeEnvironmentUuid"], "vanished");
    assert_eq!(settings["theme"], "dark");
}

#[tokio::test]
async fn unparsable_settings_are_replaced_with_defaults() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("settings.json"), "{ definitely not json").unwrap();

    let report = reconcile(&config_for(tmp.path(), &[])).await.unwrap();
    assert_eq!(report.settings, SettingsOutcome::Created);

    let settings = read_json(&tmp.path().join("settings.json"));
    assert_eq!(settings["environments"][0]["path"], "environment.json");
    assert_eq!(settings["activeEnvironmentUuid"], settings["environments"][0]["uuid"]);
}

#[tokio::test]
async fn document_without_uuid_is_a_validation_error() {
    let tmp = TempDir::new().unwrap();
    let environments = tmp.path().join("environments");
    std::fs::create_dir_all(&environments).unwrap();
    std::fs::write(environments.join("environment.json"), r#"{ "name": "No id", "uuid": "" }"#).unwrap();

    let error = reconcile(&config_for(tmp.path(), &[])).await.unwrap_err();
    match error {
        BootstrapError::Validation { file, .. } => assert_eq!(file, "environment.json"),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(!tmp.path().join("settings.json").exists());
}

#[tokio::test]
async fn malformed_document_is_a_validation_error() {
    let tmp = TempDir::new().unwrap();
    let environments = tmp.path().join("environments");
    std::fs::create_dir_all(&environments).unwrap();
    std::fs::write(environments.join("broken.json"), "{ \"uuid\": ").unwrap();

    let config = config_for(tmp.path(), &[("MOCKSMITH_DATA_FILES", "broken")]);
    let error = reconcile(&config).await.unwrap_err();
    assert!(matches!(error, BootstrapError::Validation { ref file, .. } if file == "broken.json"));
}

#[tokio::test]
async fn empty_file_list_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path(), &[("MOCKSMITH_DATA_FILES", " , ")]);
    assert!(matches!(reconcile(&config).await, Err(BootstrapError::NoTargets)));
    assert!(!tmp.path().join("environments").exists());
}

#[tokio::test]
async fn names_that_sanitize_to_the_same_file_share_one_descriptor() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path(), &[("MOCKSMITH_DATA_FILES", "users,../users.json")]);

    let report = reconcile(&config).await.unwrap();
    assert_eq!(report.descriptors.len(), 1);
    assert_eq!(report.environment_files.len(), 1);
    assert_eq!(report.created, vec!["users.json".to_string()]);
}

#[tokio::test]
async fn distinct_files_sharing_a_uuid_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let environments = tmp.path().join("environments");
    std::fs::create_dir_all(&environments).unwrap();
    std::fs::write(environments.join("a.json"), r#"{ "uuid": "same" }"#).unwrap();
    std::fs::write(environments.join("b.json"), r#"{ "uuid": "same" }"#).unwrap();

    let config = config_for(tmp.path(), &[("MOCKSMITH_DATA_FILES", "a,b")]);
    match reconcile(&config).await.unwrap_err() {
        BootstrapError::Validation { file, detail } => {
            assert_eq!(file, "b.json");
            assert!(detail.contains("a.json"), "detail: {detail}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(!tmp.path().join("settings.json").exists());
}
