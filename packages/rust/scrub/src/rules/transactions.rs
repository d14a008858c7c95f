//! Zero-amount transaction removal.

use std::sync::LazyLock;

use ofxfetch_shared::ofx::{element_value, parse_amount};
use regex::{Captures, Regex};

use crate::rule::{Rule, RuleOutcome, ScrubContext};

/// A whole `<STMTTRN>` record plus the line break that follows it.
static STMTTRN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<STMTTRN>.*?</STMTTRN>[ \t]*(?:\r?\n)?").expect("valid regex")
});

/// Drops `$0.00` transactions when the site asks for it.
///
/// The whole record goes, sub-fields included; no placeholder is left.
pub struct ZeroAmountRule;

impl Rule for ZeroAmountRule {
    fn name(&self) -> &'static str {
        "zero-transactions"
    }

    fn applies(&self, _text: &str, ctx: &ScrubContext) -> bool {
        ctx.skip_zero_transactions
    }

    fn apply(&self, text: &str, _ctx: &mut ScrubContext) -> RuleOutcome {
        let mut removed = 0usize;
        let result = STMTTRN_RE
            .replace_all(text, |caps: &Captures| {
                let record = &caps[0];
                let zero = element_value(record, "TRNAMT")
                    .and_then(|amt| parse_amount(&amt))
                    .is_some_and(|amt| amt == 0.0);
                if zero {
                    removed += 1;
                    String::new()
                } else {
                    record.to_string()
                }
            })
            .into_owned();
        RuleOutcome::compare(
            text,
            result,
            format!("Removed {removed} zero amount ($0.00) transaction(s)"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use ofxfetch_shared::StatementKind;

    const LIST: &str = "<BANKTRANLIST>\r\n\
        <STMTTRN><TRNTYPE>DEBIT<DTPOSTED>20240105<TRNAMT>-12.50<FITID>1<NAME>COFFEE</STMTTRN>\r\n\
        <STMTTRN><TRNTYPE>OTHER<DTPOSTED>20240106<TRNAMT>0.00<FITID>2<NAME>AUTH HOLD<MEMO>x</STMTTRN>\r\n\
        <STMTTRN><TRNTYPE>CREDIT<DTPOSTED>20240107<TRNAMT>40.00<FITID>3<NAME>REFUND</STMTTRN>\r\n\
        </BANKTRANLIST>";

    #[test]
    fn zero_record_removed_when_enabled() {
        let mut ctx = context(StatementKind::Bank);
        ctx.skip_zero_transactions = true;
        assert!(ZeroAmountRule.applies(LIST, &ctx));

        let out = ZeroAmountRule.apply(LIST, &mut ctx);
        assert!(!out.text.contains("AUTH HOLD"));
        assert!(!out.text.contains("<TRNAMT>0.00"));
        assert_eq!(out.text.matches("<STMTTRN>").count(), 2);
        assert!(out.text.contains("</STMTTRN>\r\n<STMTTRN><TRNTYPE>CREDIT"));
        assert!(out.note.unwrap().contains("Removed 1"));
    }

    #[test]
    fn disabled_by_default() {
        let ctx = context(StatementKind::Bank);
        assert!(!ZeroAmountRule.applies(LIST, &ctx));
    }

    #[test]
    fn negative_zero_and_unparseable() {
        let mut ctx = context(StatementKind::Bank);
        ctx.skip_zero_transactions = true;
        let text = "<STMTTRN><TRNAMT>-0.00</STMTTRN><STMTTRN><TRNAMT>pending</STMTTRN>";
        let out = ZeroAmountRule.apply(text, &mut ctx);
        assert_eq!(out.text, "<STMTTRN><TRNAMT>pending</STMTTRN>");
    }
}
