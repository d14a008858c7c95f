//! Timestamp repairs: midnight/absent times, time-zone shift, missing DTEND.

use std::sync::LazyLock;

use chrono::{NaiveDateTime, TimeDelta};
use regex::{Captures, Regex};

use crate::rule::{Rule, RuleOutcome, ScrubContext};

static DT_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<DT[^<>/]+>)([^<\s]+)").expect("valid regex"));

static DTASOF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<DTASOF>)([^<\s]+)").expect("valid regex"));

static DTSTART_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<DTSTART>[^<\s]+(</DTSTART>)?").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Null time
// ---------------------------------------------------------------------------

/// Date-only and midnight timestamps become noon, so a later time-zone
/// shift cannot move them onto another day.
pub struct NullTimeRule;

impl Rule for NullTimeRule {
    fn name(&self) -> &'static str {
        "null-time"
    }

    fn apply(&self, text: &str, _ctx: &mut ScrubContext) -> RuleOutcome {
        let result = DT_FIELD_RE
            .replace_all(text, |caps: &Captures| {
                format!("{}{}", &caps[1], noon_if_null(&caps[2]))
            })
            .into_owned();
        RuleOutcome::compare(text, result, "Null time values set to 12:00:00")
    }
}

fn noon_if_null(value: &str) -> String {
    let Some(date) = value.get(..8).filter(|d| d.bytes().all(|b| b.is_ascii_digit())) else {
        return value.to_string();
    };
    let rest = &value[8..];

    if rest.is_empty() || rest.starts_with('[') {
        format!("{date}120000{rest}")
    } else if let Some(after) = rest.strip_prefix("000000") {
        format!("{date}120000{after}")
    } else {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Time shift
// ---------------------------------------------------------------------------

/// Add the site's hour offset to every `<DTASOF>`.
pub struct TimeShiftRule;

impl Rule for TimeShiftRule {
    fn name(&self) -> &'static str {
        "time-shift"
    }

    fn applies(&self, _text: &str, ctx: &ScrubContext) -> bool {
        ctx.time_offset_hours != 0.0
    }

    fn apply(&self, text: &str, ctx: &mut ScrubContext) -> RuleOutcome {
        let hours = ctx.time_offset_hours;
        let delta = TimeDelta::seconds((hours * 3600.0).round() as i64);

        let result = DTASOF_RE
            .replace_all(text, |caps: &Captures| {
                let value = &caps[2];
                match shift(value, delta) {
                    Some(shifted) => format!("{}{shifted}", &caps[1]),
                    None => {
                        ctx.warn("time-shift", format!("unparseable DTASOF '{value}' left as is"));
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();
        RuleOutcome::compare(text, result, format!("Shifted DTASOF values {hours} hours"))
    }
}

/// Shift `YYYYMMDDHHMMSS[.XXX][tz]`; the fraction is dropped, the zone kept.
fn shift(value: &str, delta: TimeDelta) -> Option<String> {
    let (stamp, tz) = match value.find('[') {
        Some(i) => value.split_at(i),
        None => (value, ""),
    };
    let stamp = stamp.split('.').next().unwrap_or(stamp);
    let parsed = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").ok()?;
    let shifted = parsed.checked_add_signed(delta)?;
    Some(format!("{}{tz}", shifted.format("%Y%m%d%H%M%S")))
}

// ---------------------------------------------------------------------------
// Missing DTEND
// ---------------------------------------------------------------------------

/// A transaction list with a start date but no end date gets an end of now.
pub struct MissingDtEndRule;

impl Rule for MissingDtEndRule {
    fn name(&self) -> &'static str {
        "missing-dtend"
    }

    fn applies(&self, text: &str, _ctx: &ScrubContext) -> bool {
        let upper = text.to_ascii_uppercase();
        upper.contains("<DTSTART>") && !upper.contains("<DTEND>")
    }

    fn apply(&self, text: &str, ctx: &mut ScrubContext) -> RuleOutcome {
        let now = ctx.now.format("%Y%m%d%H%M00").to_string();
        let result = DTSTART_RE
            .replace_all(text, |caps: &Captures| {
                if caps.get(1).is_some() {
                    format!("{}<DTEND>{now}</DTEND>", &caps[0])
                } else {
                    format!("{}<DTEND>{now}", &caps[0])
                }
            })
            .into_owned();
        RuleOutcome::compare(text, result, "Added missing <DTEND> field")
    }
}
