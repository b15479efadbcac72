// Runtime injection asset: a tiny script that publishes client configuration
// on a global object, e.g.
//
//   window.__MOCKSMITH_RUNTIME__ = {"storageBaseUrl":"/api"};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global the script assigns to.
pub const RUNTIME_GLOBAL: &str = "__MOCKSMITH_RUNTIME__";

/// Path the daemon serves the asset under.
pub const RUNTIME_SCRIPT_PATH: &str = "/runtime-config.js";

#[derive(Debug, Error)]
pub enum RuntimeScriptError {
    #[error("runtime script does not assign `{RUNTIME_GLOBAL}`")]
    MissingAssignment,

    #[error("runtime script payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Client configuration injected at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeInjection {
    /// Base address of the networked storage API.
    pub storage_base_url: Option<String>,
}

impl RuntimeInjection {
    pub fn networked(base_url: impl Into<String>) -> Self {
        Self { storage_base_url: Some(base_url.into()) }
    }

    /// The storage base address, if present and non-blank.
    pub fn networked_base_url(&self) -> Option<&str> {
        self.storage_base_url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }
}

/// Render the asset body for `injection`.
pub fn render_runtime_script(injection: &RuntimeInjection) -> String {
    let payload = serde_json::to_string(injection).unwrap_or_else(|_| "{}".to_string());
    format!("window.{RUNTIME_GLOBAL} = {payload};\n")
}

/// Parse an asset produced by [`render_runtime_script`] (or hand-written in
/// the same shape).
pub fn parse_runtime_script(script: &str) -> Result<RuntimeInjection, RuntimeScriptError> {
    let start = script.find(RUNTIME_GLOBAL).ok_or(RuntimeScriptError::MissingAssignment)?;
    let after_global = &script[start + RUNTIME_GLOBAL.len()..];
    let payload = after_global
        .trim_start()
        .strip_prefix('=')
        .ok_or(RuntimeScriptError::MissingAssignment)?;
    let payload = payload.trim().trim_end_matches(';').trim_end();

    Ok(serde_json::from_str(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_then_parse_keeps_base_url() {
        let script = render_runtime_script(&RuntimeInjection::networked("/api"));
        assert_eq!(script, "window.__MOCKSMITH_RUNTIME__ = {\"storageBaseUrl\":\"/api\"};\n");
        let parsed = parse_runtime_script(&script).unwrap();
        assert_eq!(parsed.networked_base_url(), Some("/api"));
    }

    #[test]
    fn parses_hand_written_script() {
        let script = "  window.__MOCKSMITH_RUNTIME__={ \"storageBaseUrl\": \"http://host:8080/api\" }  ";
        let parsed = parse_runtime_script(script).unwrap();
        assert_eq!(parsed.networked_base_url(), Some("http://host:8080/api"));
    }

    #[test]
    fn blank_base_url_is_not_networked() {
        let parsed =
            parse_runtime_script("window.__MOCKSMITH_RUNTIME__ = {\"storageBaseUrl\":\"  \"};")
                .unwrap();
        assert_eq!(parsed.networked_base_url(), None);

        let parsed = parse_runtime_script("window.__MOCKSMITH_RUNTIME__ = {};").unwrap();
        assert_eq!(parsed.networked_base_url(), None);
    }

    #[test]
    fn missing_assignment_is_an_error() {
        assert!(matches!(
            parse_runtime_script("console.log('hi');"),
            Err(RuntimeScriptError::MissingAssignment)
        ));
        assert!(matches!(
            parse_runtime_script("window.__MOCKSMITH_RUNTIME__;"),
            Err(RuntimeScriptError::MissingAssignment)
        ));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(matches!(
            parse_runtime_script("window.__MOCKSMITH_RUNTIME__ = {oops};"),
            Err(RuntimeScriptError::InvalidJson(_))
        ));
    }
}
