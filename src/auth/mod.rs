//! Credential handling.
//!
//! Credentials are opaque cookies supplied by the caller. The orchestrator
//! only cares whether a set is present and non-empty; the resolver turns it
//! into a cookie jar and the fetch engine into a cookie file or header.

mod cookies;

pub use cookies::{
    CookieFileSupplier, CookieFormat, Credential, CredentialError, CredentialSet, CredentialSupplier,
    build_cookie_jar, parse_json_cookies, parse_netscape_cookies,
};
