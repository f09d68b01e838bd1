//! HTML normalisation applied before rendering
//!
//! User documents arrive with arbitrary default margins and often rely on
//! Tailwind utility classes without loading Tailwind. The enhancer injects a
//! zero-margin reset and, when the document does not already reference it,
//! the Tailwind CDN script. The transform is pure text and idempotent: any
//! copy it inserted earlier is stripped before one canonical copy goes back in.

use std::borrow::Cow;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

/// CDN host that counts as an existing framework reference.
pub const FRAMEWORK_HOST: &str = "cdn.tailwindcss.com";

/// Reset rule injected into every document.
pub const RESET_STYLE: &str = "<style data-html2pdf-reset>\
* { margin: 0; padding: 0; box-sizing: border-box; } \
html, body { margin: 0 !important; padding: 0 !important; width: 100%; height: 100%; }\
</style>";

/// Framework reference injected when the document has none.
pub const FRAMEWORK_SCRIPT: &str = r#"<script src="https://cdn.tailwindcss.com"></script>"#;

static RESET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style data-html2pdf-reset>.*?</style>").unwrap());
static CANONICAL_FRAMEWORK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<script src="https://cdn\.tailwindcss\.com"></script>"#).unwrap()
});
static FRAMEWORK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)cdn\.tailwindcss\.com").unwrap());
static HEAD_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").unwrap());
static HEAD_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</head\s*>").unwrap());
static HTML_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<html(?:\s[^>]*)?>").unwrap());

/// Whether `html` already loads the utility framework from its CDN.
pub fn has_framework_reference(html: &str) -> bool {
    FRAMEWORK_RE.is_match(html)
}

/// Normalize `html` for rendering.
pub fn enhance_html(html: &str) -> String {
    let stripped = strip_injected(html);
    let needs_framework = !has_framework_reference(&stripped);

    let mut block = String::from(RESET_STYLE);
    if needs_framework {
        block.push_str(FRAMEWORK_SCRIPT);
    }
    debug!(
        "enhancing {} bytes of html (framework {})",
        html.len(),
        if needs_framework { "injected" } else { "already present" }
    );

    if let Some(close) = HEAD_CLOSE_RE.find(&stripped) {
        return splice(&stripped, close.start(), &block);
    }
    if let Some(open) = HEAD_OPEN_RE.find(&stripped) {
        return splice(&stripped, open.end(), &block);
    }

    let head = format!("<head>{}</head>", block);
    match HTML_OPEN_RE.find(&stripped) {
        Some(open) => splice(&stripped, open.end(), &head),
        None => head + &stripped,
    }
}

fn strip_injected(html: &str) -> String {
    let without_reset = RESET_RE.replace_all(html, "");
    match CANONICAL_FRAMEWORK_RE.replace_all(&without_reset, "") {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}

fn splice(html: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(html.len() + insert.len());
    out.push_str(&html[..at]);
    out.push_str(insert);
    out.push_str(&html[at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn injects_into_existing_head() {
        let out = enhance_html("<html><head><title>t</title></head><body>x</body></html>");
        assert_eq!(count(&out, RESET_STYLE), 1);
        assert_eq!(count(&out, FRAMEWORK_SCRIPT), 1);
        assert!(out.contains(&format!("<title>t</title>{}{}</head>", RESET_STYLE, FRAMEWORK_SCRIPT)));
    }

    #[test]
    fn existing_framework_only_gets_reset() {
        let html = r#"<html><HEAD><script src="https://CDN.tailwindcss.com?plugins=forms"></script></HEAD><body></body></html>"#;
        let out = enhance_html(html);
        assert_eq!(count(&out, RESET_STYLE), 1);
        assert_eq!(out.to_lowercase().matches(FRAMEWORK_HOST).count(), 1);
    }

    #[test]
    fn synthesizes_head_after_html_tag() {
        let out = enhance_html(r#"<html lang="it"><body><h1>x</h1></body></html>"#);
        assert!(out.starts_with(&format!(
            r#"<html lang="it"><head>{}{}</head><body>"#,
            RESET_STYLE, FRAMEWORK_SCRIPT
        )));
    }

    #[test]
    fn bare_fragment_gets_leading_head() {
        let out = enhance_html("<p>hello</p>");
        assert!(out.starts_with("<head>"));
        assert!(out.ends_with("</head><p>hello</p>"));
    }

    #[test]
    fn header_element_is_not_a_head() {
        let out = enhance_html("<html><body><header>top</header></body></html>");
        assert!(out.starts_with("<html><head>"));
        assert!(out.contains("<header>top</header>"));
    }

    #[test]
    fn head_without_closing_tag() {
        let out = enhance_html("<html><head><title>t</title><body>b</body></html>");
        assert!(out.starts_with(&format!("<html><head>{}", RESET_STYLE)));
    }

    #[test]
    fn enhancing_twice_is_a_no_op() {
        for html in [
            "<html><head></head><body>a</body></html>",
            "<html><body>a</body></html>",
            "just text",
            r#"<html><head><script src="https://cdn.tailwindcss.com"></script></head></html>"#,
        ] {
            let once = enhance_html(html);
            let twice = enhance_html(&once);
            assert_eq!(once, twice, "not idempotent for {html:?}");
            assert_eq!(count(&twice, RESET_STYLE), 1);
            assert_eq!(twice.matches(FRAMEWORK_HOST).count(), 1);
        }
    }
}
