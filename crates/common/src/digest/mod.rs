// Content fingerprints for change detection.
//
// SHA-256 of the document bytes, rendered as lowercase hex. The native
// implementation (`sha2`) is used when the `native-digest` feature is
// enabled; otherwise the self-contained implementation in `fallback`
// produces the same output.

pub mod fallback;

use serde_json::Value;

/// Hex-encoded SHA-256 digest.
pub type Fingerprint = String;

/// SHA-256 via the native digest provider, if one is compiled in.
#[cfg(feature = "native-digest")]
pub fn native_sha256_hex(content: &[u8]) -> Option<Fingerprint> {
    use sha2::{Digest, Sha256};

    Some(hex_encode(&Sha256::digest(content)))
}

#[cfg(not(feature = "native-digest"))]
pub fn native_sha256_hex(_content: &[u8]) -> Option<Fingerprint> {
    None
}

/// Fingerprint raw bytes, preferring the native provider.
pub fn fingerprint(content: &[u8]) -> Fingerprint {
    native_sha256_hex(content).unwrap_or_else(|| fallback::sha256_hex(content))
}

/// Fingerprint a JSON document by its compact serialization.
pub fn fingerprint_document(document: &Value) -> Fingerprint {
    fingerprint(document.to_string().as_bytes())
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
