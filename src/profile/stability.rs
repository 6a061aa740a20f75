//! Heuristic tightening of profiles for hosts that are known to be fragile.

use std::time::Duration;

use tracing::debug;
use url::Url;

use super::ConfigProfile;

/// Providers that historically throttle or drop aggressive fragment fetching.
///
/// A host matches when it equals an entry or is a subdomain of it.
pub const FRAGILE_HOSTS: &[&str] = &[
    "tiktok.com",
    "facebook.com",
    "fb.watch",
    "instagram.com",
    "twitter.com",
    "x.com",
    "vimeo.com",
    "dailymotion.com",
    "bilibili.com",
    "twitch.tv",
];

const FRAGILE_MAX_CONCURRENCY: u32 = 2;
const FRAGILE_MIN_FRAGMENT_RETRIES: u32 = 10;
const FRAGILE_MIN_RETRY_SLEEP: Duration = Duration::from_secs(3);
const FRAGILE_MIN_SOCKET_TIMEOUT: Duration = Duration::from_secs(45);

const GLOBAL_MAX_CONCURRENCY: u32 = 4;
const GLOBAL_MIN_FRAGMENT_RETRIES: u32 = 5;
const GLOBAL_MIN_RETRY_SLEEP: Duration = Duration::from_secs(2);

/// Returns true when `url` points at a host in [`FRAGILE_HOSTS`].
#[must_use]
pub fn is_fragile_host(url: &str) -> bool {
    let Some(host) = Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
    else {
        return false;
    };
    let host = host.trim_start_matches("www.");

    FRAGILE_HOSTS
        .iter()
        .any(|fragile| host == *fragile || host.ends_with(&format!(".{fragile}")))
}

/// Clamps a profile for a fragile provider.
pub(super) fn apply_fragile_host_rules(profile: &ConfigProfile) -> ConfigProfile {
    ConfigProfile {
        name: format!("{}+fragile-host", profile.name),
        concurrent_fragments: profile.concurrent_fragments.min(FRAGILE_MAX_CONCURRENCY),
        fragment_retries: profile.fragment_retries.max(FRAGILE_MIN_FRAGMENT_RETRIES),
        retry_sleep: profile.retry_sleep.max(FRAGILE_MIN_RETRY_SLEEP),
        socket_timeout: profile.socket_timeout.max(FRAGILE_MIN_SOCKET_TIMEOUT),
        ..profile.clone()
    }
}

/// Hard limits applied to every profile regardless of host.
pub(super) fn apply_global_guardrails(profile: &ConfigProfile) -> ConfigProfile {
    ConfigProfile {
        concurrent_fragments: profile.concurrent_fragments.clamp(1, GLOBAL_MAX_CONCURRENCY),
        fragment_retries: profile.fragment_retries.max(GLOBAL_MIN_FRAGMENT_RETRIES),
        retry_sleep: profile.retry_sleep.max(GLOBAL_MIN_RETRY_SLEEP),
        ..profile.clone()
    }
}

/// Tightens `profile` for the request `url`.
///
/// Both rule classes only ever lower concurrency or raise retry, backoff and
/// timeout values; the input profile is left untouched.
#[must_use]
pub fn adjust_for_stability(profile: &ConfigProfile, url: &str) -> ConfigProfile {
    let adjusted = if is_fragile_host(url) {
        debug!(url, profile = %profile.name, "fragile host, clamping profile");
        apply_fragile_host_rules(profile)
    } else {
        profile.clone()
    };
    apply_global_guardrails(&adjusted)
}
