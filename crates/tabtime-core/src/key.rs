//! Tracking keys: URL normalization and the validity filter.
//!
//! A [`TrackingKey`] is the canonical identity of a page used as the
//! aggregation key in day records. Two raw addresses that differ only in
//! query string, fragment, a leading `www.` or a trailing slash map to the
//! same key.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// URL schemes that denote privileged or browser-internal contexts.
///
/// Pages under these schemes are never tracked: they are either the
/// browser's own UI, an extension's pages, or local files.
const BLOCKED_SCHEMES: &[&str] = &[
    "about",
    "blob",
    "brave",
    "chrome",
    "chrome-extension",
    "chrome-search",
    "chrome-untrusted",
    "data",
    "devtools",
    "edge",
    "extension",
    "file",
    "javascript",
    "moz-extension",
    "opera",
    "resource",
    "safari-extension",
    "safari-web-extension",
    "view-source",
    "vivaldi",
];

const WWW_PREFIX: &str = "www.";

/// Canonical identifier for a tracked page.
///
/// Formed as `scheme://host[:port]path` with the query and fragment removed,
/// no leading `www.` on the host, and no trailing slash on the path unless
/// the path is the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingKey(String);

impl TrackingKey {
    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TrackingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalizes a raw address into its canonical tracking key.
///
/// This is a total function. An address that does not parse, or that has
/// no host component, is returned unchanged rather than rejected.
///
/// Rules, in order:
/// 1. Parse the address.
/// 2. Drop the query string and fragment.
/// 3. Strip the leading `www.` from the host.
/// 4. Strip the trailing `/` from the path unless the path is exactly `/`.
/// 5. Reassemble as `scheme://host[:port]path`.
///
/// Credentials are never part of a key. Host case follows the URL parser
/// (lowercased); path case is left as-is.
pub fn normalize(raw: &str) -> TrackingKey {
    let Ok(url) = Url::parse(raw) else {
        return TrackingKey(raw.to_string());
    };

    let Some(host) = url.host_str().filter(|h| !h.is_empty()) else {
        return TrackingKey(raw.to_string());
    };

    let host = strip_www(host);
    let path = strip_trailing_slash(url.path());

    let key = match url.port() {
        Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, path),
        None => format!("{}://{}{}", url.scheme(), host, path),
    };

    TrackingKey(key)
}

/// Returns true if the address may start a tracking session.
///
/// Rejects anything that fails to parse, has no host, or belongs to a
/// privileged context (browser pages, extension pages, local files).
pub fn is_trackable(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw.trim()) else {
        return false;
    };

    if BLOCKED_SCHEMES.contains(&url.scheme()) {
        return false;
    }

    matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some_and(|host| !host.is_empty())
}

/// Removes leading `www.` labels, keeping at least one label.
///
/// Repeated prefixes are stripped so normalization reaches a fixed point.
fn strip_www(mut host: &str) -> &str {
    while let Some(rest) = host.strip_prefix(WWW_PREFIX) {
        if rest.is_empty() {
            break;
        }
        host = rest;
    }
    host
}

/// Removes trailing slashes from a path, keeping the root `/`.
fn strip_trailing_slash(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}
