//! Header sanitizer
//!
//! Strips hop-by-hop and environment-leaking headers before egress.
//! Matching is a case-insensitive prefix test, so `cf-connecting-ip`,
//! `cdn-loop`, and `referrer-policy` are all dropped. Callers re-add
//! `Host` (and any transport-specific headers) after sanitizing.

/// Prefixes of header names that must never reach the upstream.
const DENIED_PREFIXES: &[&str] = &[
    "host",
    "accept-encoding",
    "cf-",
    "cdn-",
    "referer",
    "referrer",
];

/// Whether a header name is dropped by the sanitizer.
pub fn is_denied(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    DENIED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Copy every header whose name does not match the deny list.
pub fn sanitize(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !is_denied(name))
        .cloned()
        .collect()
}
