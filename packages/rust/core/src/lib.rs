//! Fetch orchestration for ofxfetch.
//!
//! This crate ties request building, transport, validation and scrubbing into
//! end-to-end workflows:
//! - [`fetch_statement`] for one account
//! - [`run_batch`] for every configured account, plus the import folder and
//!   optional combining
//! - [`discover_accounts`] for an account-info query
//! - [`combine_statements`] to merge statements into one file

pub mod combine;
pub mod files;
pub mod import;
pub mod pipeline;

pub use combine::{combine_statements, write_combined};
pub use import::{import_statements, infer_kind};
pub use pipeline::{
    AccountFailure, BatchReport, FailedLogins, FetchConfig, ProgressReporter, SilentProgress,
    SkippedAccount, discover_accounts, fetch_statement, run_batch,
};
