//! Core domain types: institutions, accounts, exchanges, and statements.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OfxError, Result};

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A message set an institution accepts requests for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Capability {
    #[serde(alias = "BASTMT")]
    Bank,
    #[serde(alias = "CCSTMT")]
    CreditCard,
    #[serde(alias = "INVSTMT")]
    Investment,
    Signup,
}

// ---------------------------------------------------------------------------
// SiteQuirk
// ---------------------------------------------------------------------------

/// Institution-specific defects that need a dedicated scrub rule.
///
/// Resolved once when a [`Site`] is loaded, never re-matched per statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteQuirk {
    /// Unstable FITID serials and check numbers buried in `<NAME>`.
    DiscoverFitid,
    /// Paid-out distributions reported as zero-unit reinvestments.
    TRowePriceIncome,
}

impl SiteQuirk {
    /// Host fragments that identify each quirky institution.
    const HOST_MARKERS: &[(&str, SiteQuirk)] = &[
        ("discovercard", SiteQuirk::DiscoverFitid),
        ("troweprice.com", SiteQuirk::TRowePriceIncome),
    ];

    /// Derive the quirk set from an endpoint URL's host.
    pub fn resolve(url: &Url) -> Vec<SiteQuirk> {
        let host = url.host_str().unwrap_or("").to_ascii_lowercase();
        Self::HOST_MARKERS
            .iter()
            .filter(|(marker, _)| host.contains(marker))
            .map(|(_, quirk)| *quirk)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ProtocolVersion
// ---------------------------------------------------------------------------

/// OFX protocol version string such as `102` or `220`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion(String);

impl ProtocolVersion {
    /// Parse a three-digit 1.x or 2.x version.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let valid = s.len() == 3
            && s.chars().all(|c| c.is_ascii_digit())
            && matches!(s.as_bytes()[0], b'1' | b'2');
        if !valid {
            return Err(OfxError::config(format!(
                "unsupported OFX version '{s}': expected 1xx or 2xx"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// 2.x versions use XML framing and closed tags.
    pub fn is_xml(&self) -> bool {
        self.0.starts_with('2')
    }

    /// Numeric value (`102`, `103`, `220`, ...).
    pub fn number(&self) -> u32 {
        self.0.parse().unwrap_or(102)
    }

    /// Version 103 and later expect a `CLIENTUID` in the sign-on block.
    pub fn requires_client_uid(&self) -> bool {
        self.number() >= 103
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self("102".into())
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = OfxError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ProtocolVersion> for String {
    fn from(v: ProtocolVersion) -> Self {
        v.0
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// A financial institution endpoint, fully resolved from configuration.
#[derive(Debug, Clone)]
pub struct Site {
    /// Display name (also used in statement file names).
    pub name: String,
    /// OFX endpoint URL.
    pub url: Url,
    /// `<FI><ORG>` value.
    pub fi_org: String,
    /// `<FI><FID>` value.
    pub fid: String,
    /// Routing number for bank statement requests.
    pub bank_id: Option<String>,
    /// Broker id for investment statement requests.
    pub broker_id: Option<String>,
    pub version: ProtocolVersion,
    pub capabilities: Vec<Capability>,
    /// The site never gets asked for fewer days than this.
    pub min_interval_days: Option<u32>,
    /// Log scrub notes at debug instead of info.
    pub quiet_scrub: bool,
    /// Drop `$0.00` transactions while scrubbing.
    pub skip_zero_transactions: bool,
    /// Hours added to every `<DTASOF>` (0 disables the shift).
    pub time_offset_hours: f64,
    pub quirks: Vec<SiteQuirk>,
    pub app_id: String,
    pub app_ver: String,
    /// Tags the downstream application cannot import.
    pub strip_tags: Vec<String>,
}

impl Site {
    /// Host header value: host plus explicit port, if any.
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Broker id, falling back to the FI org.
    pub fn broker_or_org(&self) -> Option<&str> {
        self.broker_id
            .as_deref()
            .filter(|b| !b.is_empty())
            .or(Some(self.fi_org.as_str()).filter(|o| !o.is_empty()))
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Bank account sub-type sent in `<ACCTTYPE>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankAccountType {
    #[serde(rename = "CHECKING")]
    Checking,
    #[serde(rename = "SAVINGS")]
    Savings,
    #[serde(rename = "MONEYMRKT")]
    MoneyMarket,
    #[serde(rename = "CREDITLINE")]
    CreditLine,
}

impl BankAccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "CHECKING",
            Self::Savings => "SAVINGS",
            Self::MoneyMarket => "MONEYMRKT",
            Self::CreditLine => "CREDITLINE",
        }
    }
}

/// A configured account at a site, with its credentials.
///
/// `account_id` may carry a `:suffix` that maps one physical account onto
/// several downstream accounts; the suffix never goes over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Name of the [`Site`] this account belongs to.
    pub site: String,
    /// Account number, possibly with a mapping suffix (`1234:2`). Empty for
    /// an account-info query.
    #[serde(default)]
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<BankAccountType>,
    pub user: String,
    pub password: String,
}

impl Account {
    /// Account id as sent to the institution (mapping suffix stripped).
    pub fn transmitted_id(&self) -> &str {
        self.account_id
            .split_once(':')
            .map_or(self.account_id.as_str(), |(id, _)| id)
    }

    /// Whether the configured id carries a mapping suffix.
    pub fn has_mapping_suffix(&self) -> bool {
        self.transmitted_id() != self.account_id
    }

    /// The (site, user) pair used for lockout tracking.
    pub fn credential_key(&self) -> (String, String) {
        (self.site.clone(), self.user.clone())
    }
}

// ---------------------------------------------------------------------------
// StatementKind
// ---------------------------------------------------------------------------

/// The four request kinds this client can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatementKind {
    AccountInfo,
    Bank,
    CreditCard,
    Investment,
}

impl StatementKind {
    /// Pick the request kind for an account at a site.
    ///
    /// Precedence: credit card, then investment, then bank.
    pub fn select(site: &Site, account: &Account) -> Result<Self> {
        if account.transmitted_id().is_empty() {
            return Ok(Self::AccountInfo);
        }
        if site.has(Capability::CreditCard) {
            Ok(Self::CreditCard)
        } else if site.has(Capability::Investment) {
            Ok(Self::Investment)
        } else if site.has(Capability::Bank) {
            Ok(Self::Bank)
        } else {
            Err(OfxError::config(format!(
                "site {} does not support any statement download",
                site.name
            )))
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AccountInfo => "account-info",
            Self::Bank => "bank",
            Self::CreditCard => "credit-card",
            Self::Investment => "investment",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// RawResponse
// ---------------------------------------------------------------------------

/// Which rung of the transport ladder produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Attempt 0: bare OFX POST.
    Plain,
    /// Attempt 1: adds User-Agent and any session cookie.
    WithAgent,
    /// Attempt 2: legacy content-negotiation POST.
    Legacy,
}

impl Attempt {
    pub const LADDER: [Attempt; 3] = [Attempt::Plain, Attempt::WithAgent, Attempt::Legacy];

    pub fn index(&self) -> usize {
        match self {
            Self::Plain => 0,
            Self::WithAgent => 1,
            Self::Legacy => 2,
        }
    }
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            other => write!(f, "{}", other.index()),
        }
    }
}

/// A response body as received, SGML-framed.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub body: String,
    pub attempt: Attempt,
    /// `Set-Cookie` captured from the first attempt, if any.
    pub cookie: Option<String>,
}

// ---------------------------------------------------------------------------
// Statement
// ---------------------------------------------------------------------------

/// A validated, scrubbed statement file ready for hand-off.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Path of the statement file on disk.
    pub path: PathBuf,
    /// Originating site name.
    pub site: String,
    /// Originating account id (with mapping suffix).
    pub account_id: String,
    pub kind: StatementKind,
    /// Human-readable notes describing what scrubbing changed.
    pub notes: Vec<String>,
}
