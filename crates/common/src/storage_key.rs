// Storage key sanitization: confine client-supplied identifiers to a single
// `.json` file name inside the storage directory.

/// File name used when an identifier sanitizes to nothing.
pub const DEFAULT_STORAGE_FILE: &str = "environment.json";

const JSON_SUFFIX: &str = ".json";

/// Reduce an arbitrary identifier to a bare file name.
///
/// Rules:
/// - Convert `\` separators to `/`
/// - Keep only the final path segment
/// - Strip every character outside `[A-Za-z0-9_.-]`
/// - If stripping removes everything, fall back to the raw final segment
///
/// May return an empty string (e.g. for `"dir/"`); callers must reject it
/// or go through [`storage_file_name`].
pub fn sanitize_key(input: &str) -> String {
    let unified = input.replace('\\', "/");
    let segment = unified.rsplit('/').next().unwrap_or_default();

    let stripped: String = segment.chars().filter(|ch| is_key_char(*ch)).collect();
    if stripped.is_empty() {
        segment.to_string()
    } else {
        stripped
    }
}

/// Map an identifier to the file name it is stored under.
///
/// The result never contains a separator and always ends in `.json`
/// (case-insensitive). Identifiers that sanitize to nothing map to
/// [`DEFAULT_STORAGE_FILE`].
pub fn storage_file_name(input: &str) -> String {
    let key = sanitize_key(input);
    if key.is_empty() {
        return DEFAULT_STORAGE_FILE.to_string();
    }
    if has_json_suffix(&key) {
        key
    } else {
        format!("{key}{JSON_SUFFIX}")
    }
}

fn is_key_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')
}

fn has_json_suffix(key: &str) -> bool {
    key.len() >= JSON_SUFFIX.len()
        && key.is_char_boundary(key.len() - JSON_SUFFIX.len())
        && key[key.len() - JSON_SUFFIX.len()..].eq_ignore_ascii_case(JSON_SUFFIX)
}
