//! Sign conventions on investment transactions.
//!
//! | record   | UNITS | TOTAL |
//! |----------|-------|-------|
//! | INVBUY   |   +   |   -   |
//! | INVSELL  |   -   |   +   |
//! | REINVEST |   +   |   -   |

use std::sync::LazyLock;

use ofxfetch_shared::ofx::{negate, parse_amount};
use regex::{Captures, Regex};

use crate::rule::{Rule, RuleOutcome, ScrubContext};

static BUY_SELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<INVBUY>.*?</INVBUY>|<INVSELL>.*?</INVSELL>").expect("valid regex")
});

static REINVEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<REINVEST>.*?</REINVEST>").expect("valid regex"));

static UNITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<UNITS>)([^<\r\n]+)").expect("valid regex"));

static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<TOTAL>)([^<\r\n]+)").expect("valid regex"));

/// Which way an amount is required to point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Positive,
    Negative,
}

impl Sign {
    fn violated_by(self, value: f64) -> bool {
        match self {
            Sign::Positive => value < 0.0,
            Sign::Negative => value > 0.0,
        }
    }
}

fn is_investment_statement(text: &str) -> bool {
    text.to_ascii_uppercase().contains("<INVSTMTTRNRS>")
}

/// Negate the first `re` value in `block` if it has the wrong sign.
fn enforce(block: &str, re: &Regex, sign: Sign) -> String {
    re.replace(block, |caps: &Captures| {
        let value = &caps[2];
        match parse_amount(value) {
            Some(v) if sign.violated_by(v) => format!("{}{}", &caps[1], negate(value)),
            _ => caps[0].to_string(),
        }
    })
    .into_owned()
}

// ---------------------------------------------------------------------------
// Buy / sell
// ---------------------------------------------------------------------------

pub struct InvestmentSignRule;

impl Rule for InvestmentSignRule {
    fn name(&self) -> &'static str {
        "investment-sign"
    }

    fn applies(&self, text: &str, _ctx: &ScrubContext) -> bool {
        is_investment_statement(text)
    }

    fn apply(&self, text: &str, _ctx: &mut ScrubContext) -> RuleOutcome {
        let result = BUY_SELL_RE
            .replace_all(text, |caps: &Captures| {
                let block = &caps[0];
                let buy = block.get(..8).is_some_and(|t| t.eq_ignore_ascii_case("<INVBUY>"));
                let (units, total) = if buy {
                    (Sign::Positive, Sign::Negative)
                } else {
                    (Sign::Negative, Sign::Positive)
                };
                let fixed = enforce(block, &UNITS_RE, units);
                enforce(&fixed, &TOTAL_RE, total)
            })
            .into_owned();
        RuleOutcome::compare(text, result, "Corrected investment buy/sell signs")
    }
}

// ---------------------------------------------------------------------------
// Reinvest
// ---------------------------------------------------------------------------

pub struct ReinvestSignRule;

impl Rule for ReinvestSignRule {
    fn name(&self) -> &'static str {
        "reinvest-sign"
    }

    fn applies(&self, text: &str, _ctx: &ScrubContext) -> bool {
        is_investment_statement(text)
    }

    fn apply(&self, text: &str, _ctx: &mut ScrubContext) -> RuleOutcome {
        let result = REINVEST_RE
            .replace_all(text, |caps: &Captures| {
                let fixed = enforce(&caps[0], &UNITS_RE, Sign::Positive);
                enforce(&fixed, &TOTAL_RE, Sign::Negative)
            })
            .into_owned();
        RuleOutcome::compare(text, result, "Corrected reinvestment signs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use ofxfetch_shared::StatementKind;

    fn statement(body: &str) -> String {
        format!("<INVSTMTMSGSRSV1><INVSTMTTRNRS><INVSTMTRS><INVTRANLIST>{body}</INVTRANLIST></INVSTMTRS></INVSTMTTRNRS></INVSTMTMSGSRSV1>")
    }

    fn buy(units: &str, total: &str) -> String {
        format!(
            "<BUYMF><INVBUY><INVTRAN><FITID>B1</INVTRAN><SECID><UNIQUEID>922908363</SECID>\
             <UNITS>{units}<UNITPRICE>24.00<TOTAL>{total}<SUBACCTSEC>CASH</INVBUY><BUYTYPE>BUY</BUYMF>"
        )
    }

    fn sell(units: &str, total: &str) -> String {
        format!(
            "<SELLMF><INVSELL><INVTRAN><FITID>S1</INVTRAN><SECID><UNIQUEID>922908363</SECID>\
             <UNITS>{units}<UNITPRICE>24.00<TOTAL>{total}<SUBACCTSEC>CASH</INVSELL><SELLTYPE>SELL</SELLMF>"
        )
    }

    fn run(rule: &dyn Rule, text: &str) -> RuleOutcome {
        let mut ctx = context(StatementKind::Investment);
        assert!(rule.applies(text, &ctx));
        rule.apply(text, &mut ctx)
    }

    #[test]
    fn buy_signs_corrected() {
        let out = run(&InvestmentSignRule, &statement(&buy("-5", "120.00")));
        assert_eq!(out.text, statement(&buy("5", "-120.00")));
        assert!(out.changed);
    }

    #[test]
    fn sell_signs_corrected() {
        let out = run(&InvestmentSignRule, &statement(&sell("5", "-120.00")));
        assert_eq!(out.text, statement(&sell("-5", "120.00")));
    }

    #[test]
    fn correct_signs_untouched() {
        let text = statement(&format!("{}{}", buy("5", "-120.00"), sell("-2", "48.00")));
        let out = run(&InvestmentSignRule, &text);
        assert!(!out.changed);
        assert!(out.note.is_none());
    }

    #[test]
    fn blocks_are_fixed_independently() {
        let text = statement(&format!("{}{}", buy("-5", "-120.00"), sell("-2", "-48.00")));
        let out = run(&InvestmentSignRule, &text);
        assert_eq!(
            out.text,
            statement(&format!("{}{}", buy("5", "-120.00"), sell("-2", "48.00")))
        );
    }

    #[test]
    fn reinvest_signs_corrected() {
        let reinvest = |units: &str, total: &str| {
            format!("<REINVEST><INVTRAN><FITID>R1</INVTRAN><INCOMETYPE>DIV<TOTAL>{total}<SUBACCTSEC>CASH<UNITS>{units}<UNITPRICE>31.00</REINVEST>")
        };
        let out = run(&ReinvestSignRule, &statement(&reinvest("-1.5", "46.50")));
        assert_eq!(out.text, statement(&reinvest("1.5", "-46.50")));

        let again = run(&ReinvestSignRule, &out.text);
        assert!(!again.changed);
    }

    #[test]
    fn only_investment_statements() {
        let ctx = context(StatementKind::Bank);
        let bank = "<BANKMSGSRSV1><STMTTRNRS><INVBUY><UNITS>-1<TOTAL>5</INVBUY></STMTTRNRS></BANKMSGSRSV1>";
        assert!(!InvestmentSignRule.applies(bank, &ctx));
        assert!(!ReinvestSignRule.applies(bank, &ctx));
    }

    #[test]
    fn unparseable_amounts_skipped() {
        let out = run(&InvestmentSignRule, &statement(&buy("N/A", "120.00")));
        assert_eq!(out.text, statement(&buy("N/A", "-120.00")));
    }
}
