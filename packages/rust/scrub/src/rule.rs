//! The [`Rule`] trait and the per-statement state rules share.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use ofxfetch_shared::{Site, StatementKind};

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// One rewrite pass over a whole statement body.
///
/// Rules must be idempotent and must leave text they do not recognize
/// untouched; they report problems through [`ScrubContext::warn`] rather
/// than failing.
pub trait Rule: Send + Sync {
    /// Short kebab-case name used in logs and warnings.
    fn name(&self) -> &'static str;

    /// Whether this rule should run for this statement.
    fn applies(&self, _text: &str, _ctx: &ScrubContext) -> bool {
        true
    }

    fn apply(&self, text: &str, ctx: &mut ScrubContext) -> RuleOutcome;
}

/// Result of a single rule application.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub text: String,
    pub changed: bool,
    /// Operator-facing description of the change.
    pub note: Option<String>,
}

impl RuleOutcome {
    pub fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            changed: false,
            note: None,
        }
    }

    /// Compare against the original; the note is kept only if text changed.
    pub fn compare(original: &str, text: String, note: impl Into<String>) -> Self {
        let changed = text != original;
        Self {
            text,
            changed,
            note: changed.then(|| note.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// ScrubContext
// ---------------------------------------------------------------------------

/// A non-fatal problem a rule ran into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubWarning {
    pub rule: &'static str,
    pub message: String,
}

/// State for one scrub run over one statement.
///
/// Created fresh for every statement and dropped afterwards; nothing in it
/// outlives the run.
#[derive(Debug, Clone)]
pub struct ScrubContext {
    /// Clock used for inserted timestamps.
    pub now: NaiveDateTime,
    pub kind: StatementKind,
    pub time_offset_hours: f64,
    pub skip_zero_transactions: bool,
    pub strip_tags: Vec<String>,
    /// FITIDs already assigned in this statement.
    pub fitids: HashSet<String>,
    pub warnings: Vec<ScrubWarning>,
}

impl ScrubContext {
    pub fn new(site: &Site, kind: StatementKind, now: NaiveDateTime) -> Self {
        Self {
            now,
            kind,
            time_offset_hours: site.time_offset_hours,
            skip_zero_transactions: site.skip_zero_transactions,
            strip_tags: site.strip_tags.clone(),
            fitids: HashSet::new(),
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, rule: &'static str, message: impl Into<String>) {
        self.warnings.push(ScrubWarning {
            rule,
            message: message.into(),
        });
    }
}
