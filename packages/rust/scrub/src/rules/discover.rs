//! Discover Card / Discover Bank statement repairs.
//!
//! Discover reuses FITIDs within a statement (card statements vary only the
//! trailing serial digits) and reports checks as debits with the check
//! number buried in the payee name.

use std::sync::LazyLock;

use ofxfetch_shared::StatementKind;
use regex::{Captures, Regex};

use crate::rule::{Rule, RuleOutcome, ScrubContext};

static STMTTRN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<STMTTRN>").expect("valid regex"));

static FITID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<FITID>)([^<\s]+)").expect("valid regex"));

static CHECK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(<TRNTYPE>DEBIT)([^\s]+)(<NAME>Check[ ]+)([0-9]+)").expect("valid regex")
});

/// Number of trailing serial digits Discover varies on card FITIDs.
const SERIAL_DIGITS: usize = 5;

pub struct DiscoverFitidRule;

impl Rule for DiscoverFitidRule {
    fn name(&self) -> &'static str {
        "discover-fitid"
    }

    fn apply(&self, text: &str, ctx: &mut ScrubContext) -> RuleOutcome {
        let mut notes = Vec::new();

        let separated = separate_transactions(text);
        if separated != text {
            notes.push("split transactions onto separate lines");
        }

        let card = ctx.kind == StatementKind::CreditCard;
        let renumbered = FITID_RE
            .replace_all(&separated, |caps: &Captures| {
                let id = assign_fitid(&caps[2], card, ctx);
                format!("{}{id}", &caps[1])
            })
            .into_owned();
        if renumbered != separated {
            notes.push("assigned unique FITIDs");
        }

        let result = if card {
            renumbered
        } else {
            let checks = CHECK_RE
                .replace_all(&renumbered, "<TRNTYPE>CHECK${2}<CHECKNUM>${4}<NAME>Check")
                .into_owned();
            if checks != renumbered {
                notes.push("moved check numbers from NAME to CHECKNUM");
            }
            checks
        };

        let statement = if card { "card" } else { "bank" };
        RuleOutcome::compare(
            text,
            result,
            format!("Discover {statement} statement: {}", notes.join(", ")),
        )
    }
}

/// Put each `<STMTTRN>` at the start of a line.
fn separate_transactions(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 64);
    let mut last = 0;
    for m in STMTTRN_RE.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        if m.start() > 0 && !text[..m.start()].ends_with('\n') {
            out.push('\n');
        }
        last = m.start();
    }
    out.push_str(&text[last..]);
    out
}

/// Pick a FITID that is unique within this statement.
///
/// Card ids ending in the serial digits get those digits replaced by a
/// zero-padded counter; other ids are kept unless they collide, in which
/// case a `-N` suffix is added.
fn assign_fitid(original: &str, card: bool, ctx: &mut ScrubContext) -> String {
    let has_serial = original.len() > SERIAL_DIGITS
        && original.is_char_boundary(original.len() - SERIAL_DIGITS)
        && original[original.len() - SERIAL_DIGITS..]
            .chars()
            .all(|c| c.is_ascii_digit());

    let candidate = if card && has_serial {
        let base = &original[..original.len() - SERIAL_DIGITS];
        (0..100_000u32)
            .map(|seq| format!("{base}{seq:05}"))
            .find(|id| !ctx.fitids.contains(id))
    } else if !ctx.fitids.contains(original) {
        Some(original.to_string())
    } else {
        (1..10_000u32)
            .map(|n| format!("{original}-{n}"))
            .find(|id| !ctx.fitids.contains(id))
    };

    match candidate {
        Some(id) => {
            ctx.fitids.insert(id.clone());
            id
        }
        None => {
            ctx.warn("discover-fitid", format!("no free FITID for {original}"));
            original.to_string()
        }
    }
}
