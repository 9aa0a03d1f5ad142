//! Utility functions for `wirebus`.
//!
//! This module contains reusable helper functions used across the codebase.

/// Map a session identifier to the name of its on-disk page file.
///
/// Hyphens become underscores, and so does every other character outside
/// `[A-Za-z0-9_]`. Session identifiers are supplied by remote peers, so the
/// result must never be able to name a path component outside the page
/// directory (no separators, no `..`).
///
/// # Arguments
/// * `session_id` - The session identifier as received from the peer
///
/// # Returns
/// * A file name consisting only of `[A-Za-z0-9_]`
/// * `"_"` if the identifier is empty
///
/// # Examples
/// ```
/// use wirebus::util::sanitize_session_id;
///
/// assert_eq!(sanitize_session_id("abc-123"), "abc_123");
/// assert_eq!(sanitize_session_id("../etc/passwd"), "___etc_passwd");
/// assert_eq!(sanitize_session_id(""), "_");
/// ```
pub fn sanitize_session_id(session_id: &str) -> String {
    if session_id.is_empty() {
        return "_".to_string();
    }

    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
