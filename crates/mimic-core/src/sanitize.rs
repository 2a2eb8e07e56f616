//! Text cleanup applied to message content before it becomes a record.
//!
//! Strips attachment CDN links, generic URLs and bare `www.` hosts, drops
//! any leftover `Attachments:` label, and normalizes whitespace. The
//! result of `sanitize` is a fixed point: re-applying it changes nothing.

use regex::Regex;

pub struct Sanitizer {
    cdn_url: Regex,
    generic_url: Regex,
    bare_url: Regex,
    attachments_label: Regex,
    whitespace: Regex,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self {
            // CDN links are a strict subset of the generic URL pattern and
            // must be removed first, before the generic pattern can
            // partially consume them.
            cdn_url: Regex::new(r"https?://(?:cdn|media)\.discordapp\.(?:com|net)/\S+").unwrap(),
            generic_url: Regex::new(r"[a-zA-Z][a-zA-Z0-9+.\-]*://\S+").unwrap(),
            bare_url: Regex::new(r"\bwww\.\S+").unwrap(),
            attachments_label: Regex::new(r"Attachments:\s*").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
        }
    }

    /// Strip URLs and attachment markers, collapse whitespace runs to a
    /// single space, trim. Total: every input yields a (possibly empty)
    /// string.
    pub fn sanitize(&self, text: &str) -> String {
        let text = self.cdn_url.replace_all(text, "");
        let text = self.generic_url.replace_all(&text, "");
        let text = self.bare_url.replace_all(&text, "");
        let text = self.attachments_label.replace_all(&text, "");
        let text = self.whitespace.replace_all(&text, " ");
        text.trim().to_string()
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Final inclusion gate: did anything survive sanitization?
pub fn is_meaningful(text: &str) -> bool {
    !text.trim().is_empty()
}
