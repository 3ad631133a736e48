//! Shared utility functions used across multiple modules.

/// Flatten a dotted entity-type name into a valid SQL identifier.
///
/// Returns `None` when the flattened name would not be a safe identifier
/// (entity names reach SQL as table names, so nothing else may pass).
pub fn flatten_entity_name(entity_type: &str) -> Option<String> {
    let flat: String = entity_type
        .chars()
        .map(|c| if c == '.' { '_' } else { c })
        .collect();

    let mut chars = flat.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    if starts_ok && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        Some(flat)
    } else {
        None
    }
}

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_timestamp_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
