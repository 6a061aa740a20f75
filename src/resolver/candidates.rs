//! Cloud sharing link detection and direct-download candidate generation.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::utils::{compile_static_regex, host_matches_domain, origin_of};
use super::validation::ValidationMode;

/// Hosts whose sharing links are resolved through the candidate chain.
pub const CLOUD_DOMAINS: &[&str] = &["1drv.ms", "onedrive.live.com", "sharepoint.com", "office.com"];

/// URLs longer than this are treated as opaque sharing links.
const COMPLEX_URL_LENGTH: usize = 200;

/// `/:u:/r/` style sharing token.
pub(crate) static SHARING_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)/:[a-z]:/[rg]/"));

/// A direct-download URL to probe, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUrl {
    /// Short label used in logs and results.
    pub strategy: &'static str,
    pub url: String,
    pub validation: ValidationMode,
}

impl CandidateUrl {
    fn new(strategy: &'static str, url: String, validation: ValidationMode) -> Self {
        Self {
            strategy,
            url,
            validation,
        }
    }
}

/// True when `url` is an opaque link on a cloud-storage host.
///
/// Plain file URLs on those hosts are left to the fetch engine; only links
/// carrying a sharing token, an `id=`/`parent=` query, the `onedrive.aspx`
/// viewer path or an unusually long path qualify.
#[must_use]
pub fn is_cloud_sharing_link(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    if !CLOUD_DOMAINS.iter().any(|d| host_matches_domain(host, d)) {
        return false;
    }

    SHARING_TOKEN_RE.is_match(url)
        || parsed
            .query_pairs()
            .any(|(key, _)| key == "id" || key == "parent")
        || url.to_ascii_lowercase().contains("_layouts/15/onedrive.aspx")
        || url.len() > COMPLEX_URL_LENGTH
}

/// Builds the ordered candidate list for a sharing link.
///
/// The output depends only on `url`. Duplicates are removed keeping the first
/// occurrence; an empty list means neither the token nor the `id=` form applies.
#[must_use]
pub fn generate_candidates(url: &str) -> Vec<CandidateUrl> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };
    let base = origin_of(&parsed);

    let candidates = if let Some(token) = SHARING_TOKEN_RE.find(url) {
        let rest = &url[token.end()..];
        let path = rest.split(['?', '#']).next().unwrap_or(rest);
        token_form_candidates(&base, path)
    } else if let Some(id) = parsed
        .query_pairs()
        .find_map(|(key, value)| (key == "id").then(|| value.into_owned()))
    {
        query_form_candidates(url, &base, &id)
    } else {
        Vec::new()
    };

    dedup_preserving_order(candidates)
}

fn token_form_candidates(base: &str, path: &str) -> Vec<CandidateUrl> {
    if path.is_empty() {
        return Vec::new();
    }
    let decoded = urlencoding::decode(path).map_or_else(|_| path.to_string(), |d| d.into_owned());
    let mode = validation_mode_for(&decoded);
    let mut out = vec![
        CandidateUrl::new("direct-path", format!("{base}/{path}"), mode),
        CandidateUrl::new("download-param", format!("{base}/{path}?download=1"), mode),
        CandidateUrl::new(
            "forced-download",
            format!("{base}/{path}?download=true&noRedirect=true"),
            mode,
        ),
    ];

    if let Some((site, rest)) = personal_site(path) {
        out.push(CandidateUrl::new(
            "download-aspx",
            format!(
                "{base}/_layouts/15/download.aspx?SourceUrl={}",
                urlencoding::encode(&format!("/{decoded}"))
            ),
            mode,
        ));
        out.push(CandidateUrl::new(
            "api-content",
            format!("{base}/_api/v2.0/drives/b!{site}/root:/{rest}:/content"),
            mode,
        ));
    }

    out.push(CandidateUrl::new(
        "guest-access",
        format!(
            "{base}/_layouts/15/guestaccess.aspx?docid={}&authkey=&e=",
            urlencoding::encode(&decoded)
        ),
        mode,
    ));
    out.push(CandidateUrl::new(
        "encoded-path",
        format!("{base}/{}", urlencoding::encode(&decoded)),
        mode,
    ));

    if personal_site(path).is_some() {
        let source_url = urlencoding::encode(&format!("{base}/{decoded}")).into_owned();
        out.push(CandidateUrl::new(
            "download-aspx-unique",
            format!(
                "{base}/_layouts/15/download.aspx?UniqueId={}&SourceUrl={source_url}",
                urlencoding::encode(&decoded)
            ),
            mode,
        ));
        out.push(CandidateUrl::new(
            "file-preview",
            format!("{base}/_layouts/15/filepreview.aspx?SourceUrl={source_url}"),
            mode,
        ));
    }
    out
}

fn query_form_candidates(url: &str, base: &str, id: &str) -> Vec<CandidateUrl> {
    let mode = validation_mode_for(id);
    let mut out = Vec::new();
    if url.contains("onedrive.aspx") {
        out.push(CandidateUrl::new(
            "download-aspx-rewrite",
            url.replace("onedrive.aspx", "download.aspx"),
            mode,
        ));
    }

    let id_path = if id.starts_with('/') {
        id.to_string()
    } else {
        format!("/{id}")
    };
    // The url crate percent-encodes spaces and the like in the decoded id.
    if let Ok(direct) = Url::parse(&format!("{base}{id_path}")) {
        let direct = direct.to_string();
        let with_param = format!("{direct}?download=1");
        out.push(CandidateUrl::new("direct-path", direct, mode));
        out.push(CandidateUrl::new("download-param", with_param, mode));
    }
    out
}

/// Splits `personal/{site}/{rest}` out of a sharing path.
fn personal_site(path: &str) -> Option<(&str, &str)> {
    let start = path.find("personal/")? + "personal/".len();
    let (site, rest) = path[start..].split_once('/')?;
    (!site.is_empty() && !rest.is_empty()).then_some((site, rest))
}

fn validation_mode_for(decoded_path: &str) -> ValidationMode {
    let lower = decoded_path.to_ascii_lowercase();
    if lower.ends_with(".html") || lower.ends_with(".htm") {
        ValidationMode::HtmlAllowed
    } else {
        ValidationMode::BinaryBody
    }
}

fn dedup_preserving_order(candidates: Vec<CandidateUrl>) -> Vec<CandidateUrl> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_URL: &str = "https://contoso-my.sharepoint.com/:u:/r/personal/user_contoso_com/Documents/Course%20Name.rar?csf=1&web=1&e=AbCd";

    // ==================== Detection Tests ====================

    #[test]
    fn test_is_cloud_sharing_link_token_form() {
        assert!(is_cloud_sharing_link(TOKEN_URL));
        assert!(is_cloud_sharing_link(
            "https://contoso.sharepoint.com/:f:/g/personal/u/EaBcDe"
        ));
    }

    #[test]
    fn test_is_cloud_sharing_link_query_and_viewer_forms() {
        assert!(is_cloud_sharing_link(
            "https://contoso-my.sharepoint.com/personal/u/_layouts/15/onedrive.aspx?id=%2Fpersonal%2Fu%2FDocuments%2Fa.zip"
        ));
        assert!(is_cloud_sharing_link(
            "https://onedrive.live.com/?parent=ABC&cid=1"
        ));
    }

    #[test]
    fn test_is_cloud_sharing_link_long_url() {
        let long = format!("https://1drv.ms/u/s!{}", "A".repeat(220));
        assert!(is_cloud_sharing_link(&long));
        assert!(!is_cloud_sharing_link("https://1drv.ms/u/s!Short"));
    }

    #[test]
    fn test_is_cloud_sharing_link_rejects_other_hosts() {
        assert!(!is_cloud_sharing_link("https://www.youtube.com/watch?v=abc&id=1"));
        assert!(!is_cloud_sharing_link(
            "https://notsharepoint.com/:u:/r/personal/u/a.rar"
        ));
        assert!(!is_cloud_sharing_link("not a url"));
    }

    // ==================== Token Form Tests ====================

    #[test]
    fn test_token_form_exact_sequence() {
        let candidates = generate_candidates(TOKEN_URL);
        let base = "https://contoso-my.sharepoint.com";
        let path = "personal/user_contoso_com/Documents/Course%20Name.rar";

        let got: Vec<(&str, String)> = candidates
            .iter()
            .map(|c| (c.strategy, c.url.clone()))
            .collect();
        let expected: Vec<(&str, String)> = vec![
            ("direct-path", format!("{base}/{path}")),
            ("download-param", format!("{base}/{path}?download=1")),
            (
                "forced-download",
                format!("{base}/{path}?download=true&noRedirect=true"),
            ),
            (
                "download-aspx",
                format!(
                    "{base}/_layouts/15/download.aspx?SourceUrl=%2Fpersonal%2Fuser_contoso_com%2FDocuments%2FCourse%20Name.rar"
                ),
            ),
            (
                "api-content",
                format!(
                    "{base}/_api/v2.0/drives/b!user_contoso_com/root:/Documents/Course%20Name.rar:/content"
                ),
            ),
            (
                "guest-access",
                format!(
                    "{base}/_layouts/15/guestaccess.aspx?docid=personal%2Fuser_contoso_com%2FDocuments%2FCourse%20Name.rar&authkey=&e="
                ),
            ),
            (
                "encoded-path",
                format!("{base}/personal%2Fuser_contoso_com%2FDocuments%2FCourse%20Name.rar"),
            ),
            (
                "download-aspx-unique",
                format!(
                    "{base}/_layouts/15/download.aspx?UniqueId=personal%2Fuser_contoso_com%2FDocuments%2FCourse%20Name.rar&SourceUrl=https%3A%2F%2Fcontoso-my.sharepoint.com%2Fpersonal%2Fuser_contoso_com%2FDocuments%2FCourse%20Name.rar"
                ),
            ),
            (
                "file-preview",
                format!(
                    "{base}/_layouts/15/filepreview.aspx?SourceUrl=https%3A%2F%2Fcontoso-my.sharepoint.com%2Fpersonal%2Fuser_contoso_com%2FDocuments%2FCourse%20Name.rar"
                ),
            ),
        ];
        assert_eq!(got, expected);
        assert!(
            candidates
                .iter()
                .all(|c| c.validation == ValidationMode::BinaryBody)
        );
    }

    #[test]
    fn test_token_form_without_personal_skips_site_candidates() {
        let candidates =
            generate_candidates("https://contoso.sharepoint.com/:b:/r/sites/team/Shared%20Documents/x.pdf");
        let strategies: Vec<_> = candidates.iter().map(|c| c.strategy).collect();
        assert_eq!(
            strategies,
            [
                "direct-path",
                "download-param",
                "forced-download",
                "guest-access",
                "encoded-path"
            ]
        );
    }

    #[test]
    fn test_generation_is_deterministic() {
        assert_eq!(generate_candidates(TOKEN_URL), generate_candidates(TOKEN_URL));
    }

    // ==================== Query Form Tests ====================

    #[test]
    fn test_query_form_sequence() {
        let url = "https://contoso-my.sharepoint.com/personal/u/_layouts/15/onedrive.aspx?id=%2Fpersonal%2Fu%2FDocuments%2Fmy%20file.zip&parent=%2Fpersonal%2Fu";
        let candidates = generate_candidates(url);
        let strategies: Vec<_> = candidates.iter().map(|c| c.strategy).collect();
        assert_eq!(
            strategies,
            ["download-aspx-rewrite", "direct-path", "download-param"]
        );
        assert!(candidates[0].url.contains("/_layouts/15/download.aspx?id="));
        assert_eq!(
            candidates[1].url,
            "https://contoso-my.sharepoint.com/personal/u/Documents/my%20file.zip"
        );
        assert_eq!(
            candidates[2].url,
            "https://contoso-my.sharepoint.com/personal/u/Documents/my%20file.zip?download=1"
        );
    }

    #[test]
    fn test_no_token_and_no_id_yields_empty() {
        assert!(generate_candidates("https://1drv.ms/u/s!AbCdEf").is_empty());
        assert!(generate_candidates("garbage").is_empty());
    }

    #[test]
    fn test_html_targets_allow_html_bodies() {
        let candidates =
            generate_candidates("https://contoso.sharepoint.com/:u:/r/sites/t/page.html");
        assert!(
            candidates
                .iter()
                .all(|c| c.validation == ValidationMode::HtmlAllowed)
        );
    }

    #[test]
    fn test_dedup_keeps_first() {
        let a = CandidateUrl::new("a", "https://x/1".into(), ValidationMode::BinaryBody);
        let b = CandidateUrl::new("b", "https://x/1".into(), ValidationMode::BinaryBody);
        let c = CandidateUrl::new("c", "https://x/2".into(), ValidationMode::BinaryBody);
        let out = dedup_preserving_order(vec![a, b, c]);
        let names: Vec<_> = out.iter().map(|c| c.strategy).collect();
        assert_eq!(names, ["a", "c"]);
    }
}
