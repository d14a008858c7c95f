//! Shared types, error model, and configuration for ofxfetch.
//!
//! This crate is the foundation depended on by all other ofxfetch crates.
//! It provides:
//! - [`OfxError`], the unified error type
//! - Domain types ([`Site`], [`Account`], [`StatementKind`], [`Statement`], ...)
//! - Configuration ([`AppConfig`], [`SiteConfig`], config loading)
//! - OFX text conventions ([`ofx`])

pub mod config;
pub mod error;
pub mod ofx;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, DeliveryConfig, SiteConfig, config_dir, config_file_path,
    init_config, init_config_at, load_config, load_config_from,
};
pub use error::{OfxError, Result};
pub use types::{
    Account, Attempt, BankAccountType, Capability, ProtocolVersion, RawResponse, Site, SiteQuirk,
    Statement, StatementKind,
};
