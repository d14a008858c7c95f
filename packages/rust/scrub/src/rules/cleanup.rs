//! Final cleanup: unsupported tags and bare ampersands.

use std::sync::LazyLock;

use regex::Regex;

use crate::rule::{Rule, RuleOutcome, ScrubContext};

/// Tail of a character or entity reference following `&`.
static ENTITY_TAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A#?\w+;").expect("valid regex"));

// ---------------------------------------------------------------------------
// Unsupported tags
// ---------------------------------------------------------------------------

/// Removes tag/value pairs the downstream application rejects.
pub struct StripTagsRule;

impl Rule for StripTagsRule {
    fn name(&self) -> &'static str {
        "strip-tags"
    }

    fn applies(&self, _text: &str, ctx: &ScrubContext) -> bool {
        !ctx.strip_tags.is_empty()
    }

    fn apply(&self, text: &str, ctx: &mut ScrubContext) -> RuleOutcome {
        let mut result = text.to_string();
        let mut removed = Vec::new();

        for tag in &ctx.strip_tags {
            let pattern = format!(
                r"(?i)<{tag}>[^<]*(?:</{tag}>[ \t]*\r?\n?)?",
                tag = regex::escape(tag)
            );
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            if re.is_match(&result) {
                result = re.replace_all(&result, "").into_owned();
                removed.push(format!("<{tag}>"));
            }
        }

        RuleOutcome::compare(
            text,
            result,
            format!("Removed unsupported tags: {}", removed.join(", ")),
        )
    }
}

// ---------------------------------------------------------------------------
// Ampersands
// ---------------------------------------------------------------------------

/// Escapes `&` that does not start an entity or character reference.
pub struct EscapeAmpersandsRule;

impl Rule for EscapeAmpersandsRule {
    fn name(&self) -> &'static str {
        "escape-ampersands"
    }

    fn applies(&self, text: &str, _ctx: &ScrubContext) -> bool {
        text.contains('&')
    }

    fn apply(&self, text: &str, _ctx: &mut ScrubContext) -> RuleOutcome {
        RuleOutcome::compare(text, escape_ampersands(text), "Replaced bare '&' with '&amp;'")
    }
}

fn escape_ampersands(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    for (i, _) in text.match_indices('&') {
        out.push_str(&text[last..i]);
        if ENTITY_TAIL_RE.is_match(&text[i + 1..]) {
            out.push('&');
        } else {
            out.push_str("&amp;");
        }
        last = i + 1;
    }
    out.push_str(&text[last..]);
    out
}
