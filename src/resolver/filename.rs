//! Output filename derivation for cloud sharing links.
//!
//! [`extract_filename`] is total: whatever the input, it returns a usable,
//! filesystem-safe name, degrading to [`DEFAULT_FILENAME`] when the URL
//! carries no usable information.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::candidates::SHARING_TOKEN_RE;
use super::utils::compile_static_regex;

/// Name used when nothing usable can be derived from the URL.
pub const DEFAULT_FILENAME: &str = "sharepoint_download.rar";

/// Longest filename produced, in bytes.
const MAX_FILENAME_BYTES: usize = 200;

/// Longest suffix, dot included, kept intact when a name is shortened.
const MAX_EXTENSION_BYTES: usize = 16;

static KNOWN_EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)\.(rar|zip|7z|tar|gz|pdf|docx?|xlsx?|pptx?|txt|csv|mp[34]|m4a|avi|mkv|mov|wmv|flv|webm|m4v|jpe?g|png|gif|iso|exe|msi)$",
    )
});

/// Library and routing segments that never name the shared file.
const PLACEHOLDER_SEGMENTS: &[&str] = &[
    "documents",
    "shared documents",
    "personal",
    "sites",
    "r",
    "_layouts",
    "15",
    "onedrive.aspx",
    "download.aspx",
];

/// Words that suggest a folder of course material, usually shared as an archive.
const ARCHIVE_KEYWORDS: &[&str] = &["khóa học", "khoa hoc", "course", "lesson", "bài", "chương"];

/// Extension appended when an archive keyword matches.
const ARCHIVE_EXTENSION: &str = ".rar";

/// Returns true when `name` ends in a recognised file extension.
#[must_use]
pub fn has_known_extension(name: &str) -> bool {
    KNOWN_EXTENSION_RE.is_match(name)
}

/// Derives a filesystem-safe filename from a sharing URL.
///
/// 1. take the path after the sharing token (or the URL path), drop the
///    query, percent-decode and split on `/`
/// 2. the last segment with a known extension wins
/// 3. otherwise the last non-placeholder segment, with `.rar` appended when
///    it looks like course material
/// 4. otherwise the file named by an `id=` query parameter
/// 5. otherwise [`DEFAULT_FILENAME`]
#[must_use]
pub fn extract_filename(url: &str) -> String {
    let decoded = decode_component(strip_query(sharing_path(url)));
    let segments: Vec<&str> = decoded
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if let Some(name) = segments.iter().rev().find(|s| has_known_extension(s)) {
        return sanitize_filename(name);
    }

    let last_named = segments
        .iter()
        .rev()
        .find(|s| !PLACEHOLDER_SEGMENTS.contains(&s.to_lowercase().as_str()));
    if let Some(segment) = last_named {
        let lower = segment.to_lowercase();
        if ARCHIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return sanitize_filename(&format!("{segment}{ARCHIVE_EXTENSION}"));
        }
    }

    if let Some(name) = filename_from_id_param(url) {
        return sanitize_filename(&name);
    }

    DEFAULT_FILENAME.to_string()
}

/// Replaces characters that are illegal on common filesystems.
///
/// Path separators, reserved punctuation and control characters become `_`;
/// leading/trailing dots and spaces are trimmed and the result is capped at
/// 200 bytes, shortening the stem so the extension survives. Empty results
/// fall back to [`DEFAULT_FILENAME`].
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return DEFAULT_FILENAME.to_string();
    }
    cap_length(trimmed)
}

fn cap_length(name: &str) -> String {
    if name.len() <= MAX_FILENAME_BYTES {
        return name.to_string();
    }
    let extension = name
        .rfind('.')
        .filter(|&dot| dot > 0)
        .map(|dot| &name[dot..])
        .filter(|ext| {
            ext.len() <= MAX_EXTENSION_BYTES && ext[1..].chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or("");
    let stem = &name[..name.len() - extension.len()];
    let stem = truncate_at_char_boundary(stem, MAX_FILENAME_BYTES - extension.len())
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace());
    if stem.is_empty() {
        return truncate_at_char_boundary(name, MAX_FILENAME_BYTES).to_string();
    }
    format!("{stem}{extension}")
}

fn truncate_at_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// The part of the URL that encodes the shared item's path.
fn sharing_path(url: &str) -> &str {
    if let Some(token) = SHARING_TOKEN_RE.find(url) {
        return &url[token.end()..];
    }
    match url.find("://") {
        Some(scheme_end) => {
            let after_scheme = &url[scheme_end + 3..];
            after_scheme.find('/').map_or("", |i| &after_scheme[i..])
        }
        None => url,
    }
}

fn strip_query(value: &str) -> &str {
    value.split(['?', '#']).next().unwrap_or(value)
}

fn decode_component(value: &str) -> Cow<'_, str> {
    urlencoding::decode(value).unwrap_or(Cow::Borrowed(value))
}

fn filename_from_id_param(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let id = parsed
        .query_pairs()
        .find_map(|(key, value)| (key == "id").then_some(value))?;
    let last = id.rsplit('/').find(|s| !s.trim().is_empty())?;
    has_known_extension(last).then(|| last.to_string())
}
