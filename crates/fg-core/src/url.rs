//! URL helpers
//!
//! These functions avoid allocations where they can and work directly on
//! string slices.

use std::borrow::Cow;

// =============================================================================
// Scheme Handling
// =============================================================================

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();
    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    // A scheme never contains '/', '.' or '?' before the colon
    if bytes[..colon_pos]
        .iter()
        .any(|&b| !(b.is_ascii_alphanumeric() || b == b'+' || b == b'-'))
    {
        return None;
    }

    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/'
    {
        return Some(colon_pos + 3);
    }

    None
}

/// True for `http://` and `https://` URLs.
#[inline]
pub fn is_web_url(url: &str) -> bool {
    let bytes = url.as_bytes();
    (bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"http://"))
        || (bytes.len() >= 8 && bytes[..8].eq_ignore_ascii_case(b"https://"))
}

/// True for browser-internal and extension-owned pages that must never be
/// matched or redirected.
pub fn is_internal_url(url: &str) -> bool {
    if url.is_empty() {
        return true;
    }
    match get_scheme_end(url) {
        Some(_) => !is_web_url(url),
        None => INTERNAL_PREFIXES.iter().any(|prefix| {
            url.len() >= prefix.len() && url.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
        }),
    }
}

const INTERNAL_PREFIXES: [&str; 5] = ["about:", "data:", "blob:", "javascript:", "view-source:"];

/// Bring a URL into the shape provider filters expect: web URLs are returned
/// unchanged, scheme-less input is treated as `https://`, anything else
/// (internal pages, other schemes) yields `None`.
pub fn normalize_url(url: &str) -> Option<Cow<'_, str>> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if is_web_url(url) {
        return Some(Cow::Borrowed(url));
    }
    if is_internal_url(url) {
        return None;
    }
    Some(Cow::Owned(format!("https://{}", url)))
}

/// Remove a leading `scheme://` if present.
#[inline]
pub fn strip_scheme(s: &str) -> &str {
    match get_scheme_end(s) {
        Some(end) => &s[end..],
        None => s,
    }
}
