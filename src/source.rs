//! User-supplied sources for one run.

use serde::{Deserialize, Serialize};

/// The three editor fragments plus external resources, as captured at Run time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceBundle {
    #[serde(alias = "html")]
    pub markup: String,
    #[serde(alias = "css")]
    pub styles: String,
    #[serde(alias = "js")]
    pub script: String,
    #[serde(alias = "resources")]
    pub external_resources: Vec<String>,
}

impl SourceBundle {
    pub fn new(
        markup: impl Into<String>,
        styles: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            markup: markup.into(),
            styles: styles.into(),
            script: script.into(),
            external_resources: Vec::new(),
        }
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_resources = resources.into_iter().map(Into::into).collect();
        self
    }
}

/// Saved editor draft (`{html, css, js, updated}`), as written by the editor UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Draft {
    pub html: String,
    pub css: String,
    pub js: String,
    /// Milliseconds since the epoch of the last edit
    pub updated: Option<u64>,
}

impl Draft {
    /// Overlay the non-empty fields of the draft onto `base`.
    ///
    /// Empty draft fields keep the editor's current value, matching how a
    /// draft is restored on mount.
    pub fn restore_into(&self, base: SourceBundle) -> SourceBundle {
        let pick = |draft: &str, current: String| {
            if draft.is_empty() {
                current
            } else {
                draft.to_string()
            }
        };
        SourceBundle {
            markup: pick(&self.html, base.markup),
            styles: pick(&self.css, base.styles),
            script: pick(&self.js, base.script),
            external_resources: base.external_resources,
        }
    }
}

impl From<Draft> for SourceBundle {
    fn from(draft: Draft) -> Self {
        SourceBundle::new(draft.html, draft.css, draft.js)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_accepts_editor_field_names() {
        let bundle: SourceBundle = serde_json::from_str(
            r#"{"html":"<p>x</p>","css":"p{}","js":"1","resources":["a.css"]}"#,
        )
        .unwrap();
        assert_eq!(bundle.markup, "<p>x</p>");
        assert_eq!(bundle.styles, "p{}");
        assert_eq!(bundle.script, "1");
        assert_eq!(bundle.external_resources, vec!["a.css".to_string()]);
    }

    #[test]
    fn test_draft_restore_keeps_current_for_empty_fields() {
        let draft: Draft =
            serde_json::from_str(r#"{"html":"<b>saved</b>","css":"","updated":1700000000000}"#)
                .unwrap();
        let base = SourceBundle::new("<i>current</i>", "i{}", "go()").with_resources(["x.js"]);

        let restored = draft.restore_into(base);
        assert_eq!(restored.markup, "<b>saved</b>");
        assert_eq!(restored.styles, "i{}");
        assert_eq!(restored.script, "go()");
        assert_eq!(restored.external_resources, vec!["x.js".to_string()]);
    }

    #[test]
    fn test_draft_into_bundle() {
        let draft = Draft {
            html: "h".into(),
            css: "c".into(),
            js: "j".into(),
            updated: None,
        };
        let bundle = SourceBundle::from(draft);
        assert_eq!(bundle, SourceBundle::new("h", "c", "j"));
    }
}
