//! Statement normalization for ofxfetch.
//!
//! A statement body passes through an ordered list of [`Rule`]s. Each rule is
//! a global find-and-rewrite over the SGML text that repairs one known server
//! defect. Institution-specific rules are chosen from the site's resolved
//! quirk tags and run before the generic ones:
//!
//! 1. quirk rules (Discover FITIDs, T. Rowe Price income)
//! 2. null-time repair
//! 3. time-zone shift of `<DTASOF>`
//! 4. missing `<DTEND>`
//! 5. buy/sell sign repair
//! 6. reinvestment sign repair
//! 7. zero-amount transaction removal
//! 8. unsupported tags, bare ampersands
//!
//! Scrubbed output carries `NEWFILEUID:OFXFETCH` in its header, and a body
//! with that marker is passed through unchanged.

mod pipeline;
mod rule;
pub mod rules;

pub use pipeline::{ScrubPipeline, ScrubReport, is_scrubbed, scrub};
pub use rule::{Rule, RuleOutcome, ScrubContext, ScrubWarning};
