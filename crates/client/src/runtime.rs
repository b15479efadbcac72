// Client-side view of the runtime injection asset.

use mocksmith_common::runtime::parse_runtime_script;
pub use mocksmith_common::runtime::RuntimeInjection;
use tracing::warn;

/// Interpret a fetched runtime script. Anything unusable yields an empty
/// injection, which selects the embedded backend.
pub fn from_script(script: Option<&str>) -> RuntimeInjection {
    let Some(script) = script else {
        return RuntimeInjection::default();
    };
    match parse_runtime_script(script) {
        Ok(injection) => injection,
        Err(error) => {
            warn!(error = %error, "ignoring unusable runtime configuration script");
            RuntimeInjection::default()
        }
    }
}
