//! Topic naming rules.
//!
//! Topics are hierarchical, path-like names such as `/user/42`.

/// Maximum topic name length.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// Topic path separator.
pub const SEPARATOR: char = '/';

/// Validate a topic name.
///
/// # Errors
///
/// Returns an error message if the topic name is invalid.
pub fn validate_topic(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic name cannot be empty");
    }
    if name.len() > MAX_TOPIC_LENGTH {
        return Err("Topic name too long");
    }
    if !name
        .chars()
        .all(|c| !c.is_control() && !c.is_whitespace())
    {
        return Err("Topic name contains invalid characters");
    }
    if name.contains("//") {
        return Err("Topic name contains an empty segment");
    }
    Ok(())
}

/// Split a topic name into its non-empty path segments.
pub fn segments(name: &str) -> impl Iterator<Item = &str> {
    name.split(SEPARATOR).filter(|s| !s.is_empty())
}
