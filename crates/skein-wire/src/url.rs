// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Peer URL normalization.
//!
//! Peer entries store a base URL of the form `scheme://host:port`. Operators
//! type these by hand, so a little cleanup is applied before anything is
//! persisted:
//!
//! - empty input is rejected,
//! - a bare `host:port` gets `http://` prepended,
//! - a single trailing slash is stripped,
//! - only `http` and `https` schemes are accepted.

use url::Url;

use crate::error::WireError;

/// Normalize an operator-supplied peer URL.
///
/// ```rust
/// use skein_wire::normalize_peer_url;
///
/// assert_eq!(normalize_peer_url("localhost:18790").unwrap(), "http://localhost:18790");
/// assert_eq!(normalize_peer_url("https://mesh.example:8443/").unwrap(), "https://mesh.example:8443");
/// assert!(normalize_peer_url("").is_err());
/// ```
pub fn normalize_peer_url(input: &str) -> Result<String, WireError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(WireError::InvalidUrl("empty URL".into()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else if trimmed.contains(':') {
        // Bare host:port shorthand.
        format!("http://{trimmed}")
    } else {
        return Err(WireError::InvalidUrl(format!(
            "missing scheme in {trimmed:?}"
        )));
    };

    let parsed = Url::parse(&with_scheme)
        .map_err(|e| WireError::InvalidUrl(format!("{trimmed:?}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(WireError::InvalidUrl(format!(
                "unsupported scheme {other:?}"
            )))
        }
    }
    if parsed.host_str().is_none() {
        return Err(WireError::InvalidUrl(format!("no host in {trimmed:?}")));
    }

    let mut normalized = with_scheme;
    if normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_rejected() {
        assert!(normalize_peer_url("").is_err());
        assert!(normalize_peer_url("   ").is_err());
    }

    #[test]
    fn bare_host_port_gets_http_scheme() {
        assert_eq!(
            normalize_peer_url("10.0.0.5:18790").unwrap(),
            "http://10.0.0.5:18790"
        );
    }

    #[test]
    fn explicit_scheme_is_preserved() {
        assert_eq!(
            normalize_peer_url("https://mesh.example:8443").unwrap(),
            "https://mesh.example:8443"
        );
    }

    #[test]
    fn single_trailing_slash_is_stripped() {
        assert_eq!(
            normalize_peer_url("http://mesh.example:80/").unwrap(),
            "http://mesh.example:80"
        );
    }

    #[test]
    fn scheme_without_port_is_accepted() {
        assert_eq!(
            normalize_peer_url("http://mesh.example").unwrap(),
            "http://mesh.example"
        );
    }

    #[test]
    fn bare_host_without_port_is_rejected() {
        assert!(normalize_peer_url("mesh.example").is_err());
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        assert!(normalize_peer_url("ftp://mesh.example:21").is_err());
        assert!(normalize_peer_url("unix:///tmp/sock").is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(normalize_peer_url("http://").is_err());
    }
}
