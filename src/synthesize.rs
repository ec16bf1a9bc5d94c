//! Assemble a standalone document from the user's fragments.
//!
//! The document layout is:
//!
//! ```text
//! <!doctype html>
//! <html lang="en">
//! <head>  meta, external resource tags, <style>styles</style>
//! <body>  markup, <script>instrumentation</script>, <script>try { script } catch ...</script>
//! ```
//!
//! Every user fragment has its closing-script sequences escaped so it cannot
//! terminate one of the injected script blocks early.

use crate::instrument::{instrumentation_script, wrap_user_script};
use crate::protocol::Generation;
use crate::source::SourceBundle;
use url::Url;

/// Origin serving Google Fonts stylesheets (they carry no `.css` suffix).
const GOOGLE_FONTS_ORIGIN: &str = "https://fonts.googleapis.com";

/// How an external resource URL is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `<link rel="stylesheet">` in the head
    Stylesheet,
    /// `<script src defer>` in the head
    Script,
}

/// Options for [`synthesize_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthesisOptions {
    /// Stamp every message the document posts with this generation.
    pub generation: Option<Generation>,
}

/// Build the document for `bundle` with untagged messages.
pub fn synthesize(bundle: &SourceBundle) -> String {
    synthesize_with(bundle, &SynthesisOptions::default())
}

/// Build the document for `bundle`.
pub fn synthesize_with(bundle: &SourceBundle, options: &SynthesisOptions) -> String {
    let resource_tags = bundle
        .external_resources
        .iter()
        .filter_map(|url| resource_tag(url))
        .collect::<Vec<_>>()
        .join("\n");

    let safe_styles = escape_script_close(&bundle.styles);
    let safe_markup = escape_script_close(&bundle.markup);
    let safe_script = escape_script_close(&bundle.script);

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width,initial-scale=1" />
  {resource_tags}
  <style>{styles}</style>
</head>
<body>
  {markup}
  <script>{instrumentation}</script>
  <script>{user_script}</script>
</body>
</html>"#,
        resource_tags = resource_tags,
        styles = safe_styles,
        markup = safe_markup,
        instrumentation = instrumentation_script(options.generation),
        user_script = wrap_user_script(&safe_script, options.generation),
    )
}

/// Classify an external resource. Best-effort: the URL is not validated.
///
/// A URL whose path ends in `.css` (any case, query string allowed) or that
/// starts with the Google Fonts origin is a stylesheet; anything else is a
/// script.
pub fn classify_resource(url: &str) -> ResourceKind {
    let url = url.trim();
    if url.starts_with(GOOGLE_FONTS_ORIGIN) || has_css_suffix(url) {
        ResourceKind::Stylesheet
    } else {
        ResourceKind::Script
    }
}

fn has_css_suffix(url: &str) -> bool {
    // Parsed URLs are judged on their path so fragments don't get in the way;
    // anything unparseable falls back to the raw text.
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.to_ascii_lowercase().ends_with(".css")
}

/// The tag for one external resource, or `None` for a blank entry.
pub fn resource_tag(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let tag = match classify_resource(url) {
        ResourceKind::Stylesheet => format!(r#"<link rel="stylesheet" href="{}">"#, url),
        ResourceKind::Script => format!(r#"<script src="{}" defer></script>"#, url),
    };
    Some(tag)
}

/// Escape every case-insensitive `</script` that could end a script element:
/// followed by whitespace, `/`, `>` or the end of the fragment (the document
/// continues right after it). `</script>` becomes `<\/script>`.
pub fn escape_script_close(text: &str) -> String {
    const NEEDLE: &[u8] = b"</script";
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut start = 0;
    let mut i = 0;

    while i + NEEDLE.len() <= bytes.len() {
        let end = i + NEEDLE.len();
        let closes = match bytes.get(end) {
            None => true,
            Some(b) => matches!(b, b'>' | b'/') || b.is_ascii_whitespace(),
        };
        if closes && bytes[i..end].eq_ignore_ascii_case(NEEDLE) {
            out.push_str(&text[start..i]);
            out.push_str("<\\/");
            // Keep the user's casing of "script"
            out.push_str(&text[i + 2..end]);
            i = end;
            start = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&text[start..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn test_escape_mixed_case() {
        assert_eq!(
            escape_script_close("a</script>b</SCRIPT>c</ScRiPt>"),
            r"a<\/script>b<\/SCRIPT>c<\/ScRiPt>"
        );
        assert_eq!(escape_script_close("no tags here"), "no tags here");
        assert_eq!(escape_script_close("é</script>ü"), "é<\\/script>ü");
    }

    #[test]
    fn test_escape_every_end_tag_form() {
        assert_eq!(
            escape_script_close("var s = '</script >'; var t = '</script\n>';"),
            "var s = '<\\/script >'; var t = '<\\/script\n>';"
        );
        assert_eq!(escape_script_close("</Script/>"), r"<\/Script/>");
        assert_eq!(escape_script_close("</script\t>"), "<\\/script\t>");
        // The wrapper's newline follows the user script, so a trailing
        // `</script` would close the block too.
        assert_eq!(escape_script_close("x = '</script"), r"x = '<\/script");
    }

    #[test]
    fn test_escape_leaves_other_tags_alone() {
        assert_eq!(escape_script_close("'</scripts>'"), "'</scripts>'");
        assert_eq!(escape_script_close("</scriptx"), "</scriptx");
        assert_eq!(escape_script_close("</scrip>"), "</scrip>");
    }

    #[test]
    fn test_user_content_cannot_close_script_blocks() {
        let bundle = SourceBundle::new(
            "<p></Script></p>",
            "/* </script> */",
            "const s = '</SCRIPT><script>alert(1)</script>';",
        );
        let doc = synthesize(&bundle).to_ascii_lowercase();

        // Exactly the two closing tags of the injected blocks survive.
        assert_eq!(count(&doc, "</script>"), 2);
    }

    #[test]
    fn test_classify_resources() {
        assert_eq!(
            classify_resource("https://cdn.example.com/lib.css"),
            ResourceKind::Stylesheet
        );
        assert_eq!(
            classify_resource("https://cdn.example.com/lib.CSS?v=3"),
            ResourceKind::Stylesheet
        );
        assert_eq!(
            classify_resource("https://fonts.googleapis.com/css2?family=Inter"),
            ResourceKind::Stylesheet
        );
        assert_eq!(
            classify_resource("https://unpkg.com/react.js"),
            ResourceKind::Script
        );
        assert_eq!(
            classify_resource("https://example.com/style.css.js"),
            ResourceKind::Script
        );
        // Not a URL at all: still classified, never rejected
        assert_eq!(classify_resource("theme.css"), ResourceKind::Stylesheet);
        assert_eq!(classify_resource("not a url"), ResourceKind::Script);
    }

    #[test]
    fn test_resource_tags_preserve_order_and_skip_blanks() {
        let bundle = SourceBundle::default().with_resources([
            "https://cdn.example.com/a.js",
            "   ",
            "https://cdn.example.com/b.css",
            "",
            "https://cdn.example.com/c.js",
        ]);
        let doc = synthesize(&bundle);

        let a = doc.find(r#"<script src="https://cdn.example.com/a.js" defer></script>"#);
        let b = doc.find(r#"<link rel="stylesheet" href="https://cdn.example.com/b.css">"#);
        let c = doc.find(r#"<script src="https://cdn.example.com/c.js" defer></script>"#);
        assert!(a.is_some() && b.is_some() && c.is_some());
        assert!(a < b && b < c);
        assert_eq!(count(&doc, "<link"), 1);
        assert_eq!(count(&doc, " defer>"), 2);
    }

    #[test]
    fn test_malformed_url_included_verbatim() {
        let tag = resource_tag("  ht!tp://bad url.js ").unwrap();
        assert_eq!(tag, r#"<script src="ht!tp://bad url.js" defer></script>"#);
    }

    #[test]
    fn test_basic_scenario() {
        let bundle = SourceBundle::new("<h1>Hi</h1>", "h1{color:red}", "console.log('x')");
        let doc = synthesize(&bundle);

        assert!(doc.starts_with("<!doctype html>"));
        assert_eq!(count(&doc, "<head>"), 1);
        assert_eq!(count(&doc, "<link"), 0);
        assert_eq!(count(&doc, "<h1>Hi</h1>"), 1);
        assert!(doc.contains("<style>h1{color:red}</style>"));

        let head_end = doc.find("</head>").unwrap();
        let markup_at = doc.find("<h1>Hi</h1>").unwrap();
        assert!(markup_at > head_end);

        // Instrumentation first, then the wrapped user script
        let instrumentation_at = doc.find("send('sandbox-ready'").unwrap();
        let user_at = doc.find("try {\nconsole.log('x')\n}").unwrap();
        assert!(markup_at < instrumentation_at && instrumentation_at < user_at);
    }

    #[test]
    fn test_empty_bundle_is_a_complete_document() {
        let doc = synthesize(&SourceBundle::default());
        assert!(doc.starts_with("<!doctype html>"));
        assert!(doc.contains("<style></style>"));
        assert!(doc.trim_end().ends_with("</html>"));
        assert_eq!(count(&doc, "<script>"), 2);
    }

    #[test]
    fn test_deterministic() {
        let bundle = SourceBundle::new("<p>x</p>", "p{}", "1 + 1").with_resources(["a.css"]);
        assert_eq!(synthesize(&bundle), synthesize(&bundle));
    }

    #[test]
    fn test_generation_is_stamped_into_document() {
        let bundle = SourceBundle::new("", "", "throw new Error('boom')");
        let doc = synthesize_with(
            &bundle,
            &SynthesisOptions {
                generation: Some(Generation::new(12)),
            },
        );
        assert!(doc.contains("var GENERATION = 12;"));
        assert!(doc.contains("generation: 12"));
        assert!(!synthesize(&bundle).contains("generation: "));
    }
}
