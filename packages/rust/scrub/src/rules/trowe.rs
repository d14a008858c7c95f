//! T. Rowe Price paid-out distributions.
//!
//! Dividends and capital gains that were paid in cash rather than
//! reinvested arrive as `<REINVEST>` records with zero units, a negative
//! total and no `<SUBACCTFUND>`. The downstream app ignores those, so they
//! are rewritten as `<INCOME>` records.

use std::sync::LazyLock;

use ofxfetch_shared::ofx::{element_value, parse_amount};
use regex::{Captures, Regex};

use crate::rule::{Rule, RuleOutcome, ScrubContext};

static REINVEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<REINVEST>.*?</REINVEST>").expect("valid regex"));

static OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<REINVEST>").expect("valid regex"));

static CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</REINVEST>").expect("valid regex"));

static MEMO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<MEMO>)([^<\r\n]*)").expect("valid regex"));

static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<TOTAL>)([^<\r\n]*)").expect("valid regex"));

static SUBACCTSEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<SUBACCTSEC>[^<\r\n]*(</SUBACCTSEC>)?").expect("valid regex")
});

static UNITS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<UNITS>[^<]*(?:</UNITS>[ \t]*\r?\n?)?").expect("valid regex")
});

static UNITPRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<UNITPRICE>[^<]*(?:</UNITPRICE>[ \t]*\r?\n?)?").expect("valid regex")
});

const NAME: &str = "trowe-price-income";

pub struct TRowePriceIncomeRule;

impl Rule for TRowePriceIncomeRule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, text: &str, ctx: &mut ScrubContext) -> RuleOutcome {
        let mut converted = 0usize;
        let result = REINVEST_RE
            .replace_all(text, |caps: &Captures| {
                let block = &caps[0];
                match convert(block, ctx) {
                    Some(income) => {
                        converted += 1;
                        income
                    }
                    None => block.to_string(),
                }
            })
            .into_owned();

        RuleOutcome::compare(
            text,
            result,
            format!("T. Rowe Price: {converted} paid-out distribution(s) recorded as income"),
        )
    }
}

/// Rewrite one zero-unit reinvestment as income. `None` leaves it as is.
fn convert(block: &str, ctx: &mut ScrubContext) -> Option<String> {
    let units = element_value(block, "UNITS").and_then(|u| parse_amount(&u))?;
    if units != 0.0 {
        return None;
    }

    if !TOTAL_RE.is_match(block) || !SUBACCTSEC_RE.is_match(block) {
        ctx.warn(NAME, "zero-unit reinvestment lacks TOTAL or SUBACCTSEC; left unchanged");
        return None;
    }

    let income_type = element_value(block, "INCOMETYPE")
        .unwrap_or_default()
        .to_ascii_uppercase();
    let memo = match income_type.as_str() {
        "DIV" => Some("DIVIDEND PAID"),
        "CGSHORT" => Some("SHORT TERM CAP GAIN PAID"),
        "CGLONG" => Some("LONG TERM CAPITAL GAIN PAID"),
        _ => None,
    };

    let mut out = OPEN_RE.replace(block, "<INCOME>").into_owned();
    out = CLOSE_RE.replace(&out, "</INCOME>").into_owned();
    if let Some(memo) = memo {
        out = MEMO_RE.replace(&out, format!("${{1}}{memo}")).into_owned();
    }
    out = TOTAL_RE
        .replace(&out, |caps: &Captures| format!("{}{}", &caps[1], caps[2].replace('-', "")))
        .into_owned();
    if !out.to_ascii_uppercase().contains("<SUBACCTFUND>") {
        out = SUBACCTSEC_RE
            .replace(&out, |caps: &Captures| {
                let fund = if caps.get(1).is_some() {
                    "<SUBACCTFUND>CASH</SUBACCTFUND>"
                } else {
                    "<SUBACCTFUND>CASH"
                };
                format!("{}{fund}", &caps[0])
            })
            .into_owned();
    }
    out = UNITS_RE.replace_all(&out, "").into_owned();
    out = UNITPRICE_RE.replace_all(&out, "").into_owned();
    Some(out)
}
