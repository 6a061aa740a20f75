//! Scraping download links out of a sharing page.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::utils::{absolutize_url, compile_static_regex};

static FILE_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?i)href\s*=\s*["']([^"']+\.(?:rar|zip|7z|pdf|docx?|xlsx?|pptx?|mp[34]|mkv|avi|mov|webm|m4v|txt|csv)(?:\?[^"']*)?)["']"#,
    )
});

static DOWNLOAD_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)href\s*=\s*["']([^"']*download[^"']*)["']"#)
});

static SHAREPOINT_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?i)href\s*=\s*["']([^"']*(?:_layouts/15/download\.aspx|guestaccess\.aspx)[^"']*)["']"#,
    )
});

static DOWNLOAD_REDIRECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"["']?downloadRedirect["']?\s*[:=]\s*["']([^"']+)["']"#)
});

static JSON_DOWNLOAD_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#""(?:@microsoft\.graph\.downloadUrl|@content\.downloadUrl|downloadUrl)"\s*:\s*"([^"]+)""#,
    )
});

/// Error, throttling and sign-in pages that look like links but never serve files.
const SYSTEM_PAGE_MARKERS: &[&str] = &[
    "/_layouts/15/throttle.htm",
    "error.aspx",
    "accessdenied.aspx",
    "login",
    "/_vti_bin/",
    "/_forms/",
];

/// Extracts candidate download links from a sharing page, in discovery order.
///
/// Patterns run in priority order: file hrefs, `download` hrefs, SharePoint
/// download/guest-access hrefs, `downloadRedirect` values, then JSON
/// `downloadUrl` fields. Relative links are resolved against `base_url`.
#[must_use]
pub fn extract_download_links(html: &str, base_url: &Url) -> Vec<String> {
    let patterns: [&Regex; 5] = [
        &FILE_HREF_RE,
        &DOWNLOAD_HREF_RE,
        &SHAREPOINT_HREF_RE,
        &DOWNLOAD_REDIRECT_RE,
        &JSON_DOWNLOAD_URL_RE,
    ];

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for pattern in patterns {
        for caps in pattern.captures_iter(html) {
            let Some(raw) = caps.get(1) else { continue };
            let value = unescape(raw.as_str());
            if is_ignored_target(&value) {
                continue;
            }
            let Some(absolute) = absolutize_url(&value, base_url) else {
                continue;
            };
            if is_system_page(&absolute) {
                continue;
            }
            if seen.insert(absolute.clone()) {
                links.push(absolute);
            }
        }
    }
    links
}

fn unescape(value: &str) -> String {
    value
        .replace("\\u0026", "&")
        .replace("\\/", "/")
        .replace("&amp;", "&")
}

fn is_ignored_target(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    lower.is_empty()
        || lower.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
}

fn is_system_page(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    SYSTEM_PAGE_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://contoso.sharepoint.com/personal/u/Documents/view").unwrap()
    }

    #[test]
    fn test_extracts_in_pattern_order() {
        let html = r#"
            <a href="/x/download?item=1">Download</a>
            <a href="files/archive.zip">zip</a>
            <script>var cfg = {"downloadUrl":"https:\/\/cdn.example.com\/a.rar?x=1&y=2"};</script>
        "#;
        let links = extract_download_links(html, &base());
        assert_eq!(
            links,
            vec![
                "https://contoso.sharepoint.com/personal/u/Documents/files/archive.zip",
                "https://contoso.sharepoint.com/x/download?item=1",
                "https://cdn.example.com/a.rar?x=1&y=2",
            ]
        );
    }

    #[test]
    fn test_graph_download_url_and_redirect() {
        let html = r#"{"@microsoft.graph.downloadUrl":"https://graph.example.com/dl/1"}
            downloadRedirect: "https://cdn.example.com/redirect/2""#;
        let links = extract_download_links(html, &base());
        assert_eq!(
            links,
            vec![
                "https://cdn.example.com/redirect/2",
                "https://graph.example.com/dl/1",
            ]
        );
    }

    #[test]
    fn test_sharepoint_download_aspx_and_amp_unescape() {
        let html =
            r#"<a href="/_layouts/15/download.aspx?UniqueId=abc&amp;Translate=false">get</a>"#;
        let links = extract_download_links(html, &base());
        assert_eq!(
            links,
            vec!["https://contoso.sharepoint.com/_layouts/15/download.aspx?UniqueId=abc&Translate=false"]
        );
    }

    #[test]
    fn test_drops_scripts_mailto_anchors_and_system_pages() {
        let html = r##"
            <a href="javascript:download()">x</a>
            <a href="mailto:download@example.com">x</a>
            <a href="#download">x</a>
            <a href="/_layouts/15/Throttle.htm?download=1">x</a>
            <a href="/_layouts/15/AccessDenied.aspx?download">x</a>
            <a href="https://login.example.com/download">x</a>
            <a href="/_vti_bin/download.zip">x</a>
        "##;
        assert!(extract_download_links(html, &base()).is_empty());
    }

    #[test]
    fn test_duplicates_removed() {
        let html = r#"<a href="/a.zip">1</a><a href="/a.zip">2</a><a href="https://contoso.sharepoint.com/a.zip">3</a>"#;
        assert_eq!(
            extract_download_links(html, &base()),
            vec!["https://contoso.sharepoint.com/a.zip"]
        );
    }

    #[test]
    fn test_protocol_relative_links_get_https() {
        let html = r#"<a href="//cdn.example.com/b.pdf">pdf</a>"#;
        assert_eq!(
            extract_download_links(html, &base()),
            vec!["https://cdn.example.com/b.pdf"]
        );
    }
}
