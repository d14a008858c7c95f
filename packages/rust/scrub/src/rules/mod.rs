//! Built-in scrub rules, one module per family.

mod cleanup;
mod datetime;
mod discover;
mod investment;
mod transactions;
mod trowe;

use ofxfetch_shared::SiteQuirk;

use crate::rule::Rule;

pub use cleanup::{EscapeAmpersandsRule, StripTagsRule};
pub use datetime::{MissingDtEndRule, NullTimeRule, TimeShiftRule};
pub use discover::DiscoverFitidRule;
pub use investment::{InvestmentSignRule, ReinvestSignRule};
pub use transactions::ZeroAmountRule;
pub use trowe::TRowePriceIncomeRule;

/// The institution-specific rule for a quirk tag.
pub fn quirk_rule(quirk: SiteQuirk) -> Box<dyn Rule> {
    match quirk {
        SiteQuirk::DiscoverFitid => Box::new(DiscoverFitidRule),
        SiteQuirk::TRowePriceIncome => Box::new(TRowePriceIncomeRule),
    }
}

/// Rules every statement goes through, in order.
///
/// Null-time repair must precede the time shift; cleanup runs last.
pub fn generic_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(NullTimeRule),
        Box::new(TimeShiftRule),
        Box::new(MissingDtEndRule),
        Box::new(InvestmentSignRule),
        Box::new(ReinvestSignRule),
        Box::new(ZeroAmountRule),
        Box::new(StripTagsRule),
        Box::new(EscapeAmpersandsRule),
    ]
}
