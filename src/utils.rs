//! Utility functions for filenames and MIME types

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Maximum number of rename attempts when resolving name collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

static CONTACT_DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"[^\w\s-]").expect("static regex")
});

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\s+").expect("static regex")
});

/// Strip everything except ASCII letters, digits and `_`
///
/// Used for every sender fragment that ends up in a filename; `+` from
/// E.164 numbers is invalid on some filesystems.
///
/// # Examples
///
/// ```
/// use openphone_archiver::utils::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("+15551234567"), "15551234567");
/// assert_eq!(sanitize_identifier("Front Desk (main)"), "FrontDeskmain");
/// ```
pub fn sanitize_identifier(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Turn a contact display name into an archive filename fragment
///
/// Drops characters other than word characters, whitespace and `-`, then
/// replaces whitespace runs with `-`.
pub fn sanitize_contact_name(name: &str) -> String {
    let stripped = CONTACT_DISALLOWED.replace_all(name.trim(), "");
    WHITESPACE_RUN.replace_all(&stripped, "-").into_owned()
}

/// File extension for a MIME type: the subtype, or `file` when missing
///
/// Parameters such as `; codecs=opus` are dropped and the subtype goes
/// through [`sanitize_identifier`], so `svg+xml` becomes `svgxml` and a
/// malformed subtype can never add path segments.
pub fn extension_for_mime(mime_type: &str) -> String {
    let subtype = mime_type
        .split_once('/')
        .map(|(_, sub)| sub.split(';').next().unwrap_or_default())
        .unwrap_or_default();

    match sanitize_identifier(subtype) {
        ext if ext.is_empty() => "file".to_string(),
        ext => ext,
    }
}

/// Pick a name not yet in `taken`, appending ` (1)`, ` (2)`, ... before the extension
///
/// Returns `None` if every candidate up to the attempt limit is taken.
pub fn unique_name(name: &str, taken: &HashSet<String>) -> Option<String> {
    if !taken.contains(name) {
        return Some(name.to_string());
    }

    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    (1..=MAX_RENAME_ATTEMPTS)
        .map(|i| match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        })
        .find(|candidate| !taken.contains(candidate))
}
