//! Ordered rule execution and the scrubbed-file marker.

use std::sync::LazyLock;

use chrono::Local;
use ofxfetch_shared::ofx::{SCRUBBED_FILE_UID, sgml_header};
use ofxfetch_shared::{Site, StatementKind};
use regex::{NoExpand, Regex};
use tracing::{debug, info, instrument, trace, warn};

use crate::rule::{Rule, ScrubContext, ScrubWarning};
use crate::rules::{generic_rules, quirk_rule};

static NEWFILEUID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*NEWFILEUID:[^\r\n]*").expect("valid regex"));

static SCRUBBED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?im)^[ \t]*NEWFILEUID:{SCRUBBED_FILE_UID}[ \t]*\r?$"
    ))
    .expect("valid regex")
});

/// Output of a pipeline run.
#[derive(Debug, Clone)]
pub struct ScrubReport {
    pub text: String,
    /// One line per rule that changed something.
    pub notes: Vec<String>,
    pub warnings: Vec<ScrubWarning>,
    /// The input already carried the scrubbed marker and was passed through.
    pub already_scrubbed: bool,
}

/// The rule sequence for one site.
pub struct ScrubPipeline {
    rules: Vec<Box<dyn Rule>>,
    quiet: bool,
}

impl ScrubPipeline {
    /// Quirk rules for the site first, then the generic rules.
    pub fn for_site(site: &Site) -> Self {
        let mut rules: Vec<Box<dyn Rule>> = site.quirks.iter().map(|q| quirk_rule(*q)).collect();
        rules.extend(generic_rules());
        Self {
            rules,
            quiet: site.quiet_scrub,
        }
    }

    /// Build a pipeline from an explicit rule list.
    pub fn with_rules(rules: Vec<Box<dyn Rule>>, quiet: bool) -> Self {
        Self { rules, quiet }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run every applicable rule over `text`, then stamp the marker.
    #[instrument(skip_all, fields(kind = %ctx.kind, rules = self.rules.len()))]
    pub fn run(&self, text: &str, ctx: &mut ScrubContext) -> ScrubReport {
        if is_scrubbed(text) {
            debug!("statement already scrubbed, passing through");
            return ScrubReport {
                text: text.to_string(),
                notes: Vec::new(),
                warnings: Vec::new(),
                already_scrubbed: true,
            };
        }

        let mut current = text.to_string();
        let mut notes = Vec::new();

        for rule in &self.rules {
            if !rule.applies(&current, ctx) {
                trace!(rule = rule.name(), "not applicable");
                continue;
            }
            let outcome = rule.apply(&current, ctx);
            if !outcome.changed {
                continue;
            }
            if let Some(note) = outcome.note {
                if self.quiet {
                    debug!(rule = rule.name(), "{note}");
                } else {
                    info!(rule = rule.name(), "{note}");
                }
                notes.push(note);
            }
            current = outcome.text;
        }

        let warnings = std::mem::take(&mut ctx.warnings);
        for w in &warnings {
            warn!(rule = w.rule, "{}", w.message);
        }

        ScrubReport {
            text: stamp_scrubbed(&current),
            notes,
            warnings,
            already_scrubbed: false,
        }
    }
}

/// Scrub one statement with a fresh context.
pub fn scrub(site: &Site, kind: StatementKind, text: &str) -> ScrubReport {
    let mut ctx = ScrubContext::new(site, kind, Local::now().naive_local());
    ScrubPipeline::for_site(site).run(text, &mut ctx)
}

/// Whether the header carries the scrubbed marker.
pub fn is_scrubbed(text: &str) -> bool {
    SCRUBBED_RE.is_match(text)
}

/// Set `NEWFILEUID` to the scrubbed marker, adding a header if needed.
fn stamp_scrubbed(text: &str) -> String {
    let marker = format!("NEWFILEUID:{SCRUBBED_FILE_UID}");
    if NEWFILEUID_RE.is_match(text) {
        return NEWFILEUID_RE.replace(text, NoExpand(&marker)).into_owned();
    }

    let body_start = text.find('<').unwrap_or(text.len());
    let head = text[..body_start].trim();
    if head.to_ascii_uppercase().contains("OFXHEADER:") {
        format!("{head}\r\n{marker}\r\n\r\n{}", &text[body_start..])
    } else {
        format!("{}{}", sgml_header(SCRUBBED_FILE_UID), text.trim_start())
    }
}
