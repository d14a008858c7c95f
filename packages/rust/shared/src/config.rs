//! Application configuration for ofxfetch.
//!
//! User config lives at `~/.ofxfetch/ofxfetch.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OfxError, Result};
use crate::types::{Account, Capability, ProtocolVersion, Site, SiteQuirk};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "ofxfetch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".ofxfetch";

// ---------------------------------------------------------------------------
// Config structs (matching ofxfetch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Downstream hand-off settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Institution definitions.
    #[serde(default)]
    pub sites: Vec<SiteConfig>,

    /// Accounts to download, in delivery order.
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default look-back interval in days.
    #[serde(default = "default_interval_days")]
    pub interval_days: u32,

    /// Directory statement files are written to.
    #[serde(default = "default_transfer_dir")]
    pub transfer_dir: String,

    /// Directory scanned for manually downloaded statements.
    #[serde(default = "default_import_dir")]
    pub import_dir: String,

    /// JSON file holding per-(host, user) client UIDs.
    #[serde(default = "default_client_uid_file")]
    pub client_uid_file: String,

    /// Merge all statements into one file before hand-off.
    #[serde(default)]
    pub combine: bool,

    /// After a failed exchange, skip other accounts sharing the credentials.
    #[serde(default = "default_true")]
    pub skip_failed_logon: bool,

    /// Suppress scrub notes (sites may override).
    #[serde(default)]
    pub quiet_scrub: bool,

    /// Remove `$0.00` transactions (sites may override).
    #[serde(default)]
    pub skip_zero_transactions: bool,

    /// Application id sent at sign-on.
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Application version sent at sign-on.
    #[serde(default = "default_app_ver")]
    pub app_ver: String,

    /// Tags the downstream application rejects.
    #[serde(default = "default_strip_tags")]
    pub strip_tags: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            interval_days: default_interval_days(),
            transfer_dir: default_transfer_dir(),
            import_dir: default_import_dir(),
            client_uid_file: default_client_uid_file(),
            combine: false,
            skip_failed_logon: true,
            quiet_scrub: false,
            skip_zero_transactions: false,
            app_id: default_app_id(),
            app_ver: default_app_ver(),
            strip_tags: default_strip_tags(),
        }
    }
}

fn default_interval_days() -> u32 {
    31
}
fn default_transfer_dir() -> String {
    "xfr".into()
}
fn default_import_dir() -> String {
    "import".into()
}
fn default_client_uid_file() -> String {
    "connect.json".into()
}
fn default_true() -> bool {
    true
}
fn default_app_id() -> String {
    "QWIN".into()
}
fn default_app_ver() -> String {
    "2400".into()
}
fn default_strip_tags() -> Vec<String> {
    vec!["CORRECTACTION".into(), "CORRECTFITID".into()]
}

/// `[delivery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Program invoked with each finished file as its only argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Pause between hand-offs so the downstream app keeps file order.
    #[serde(default = "default_delivery_delay")]
    pub delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            command: None,
            delay_ms: default_delivery_delay(),
        }
    }
}

fn default_delivery_delay() -> u64 {
    500
}

/// `[[sites]]` entry, before resolution into a [`Site`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub fi_org: String,
    #[serde(default)]
    pub fid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
    #[serde(default)]
    pub version: ProtocolVersion,
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_scrub: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_zero_transactions: Option<bool>,
    #[serde(default)]
    pub time_offset_hours: f64,
    /// Explicit quirk tags; derived from the URL host when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quirks: Option<Vec<SiteQuirk>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_ver: Option<String>,
}

impl SiteConfig {
    /// Resolve this entry into an immutable [`Site`], merging defaults.
    pub fn resolve(&self, defaults: &DefaultsConfig) -> Result<Site> {
        let url = Url::parse(&self.url).map_err(|e| {
            OfxError::config(format!("site {}: invalid url '{}': {e}", self.name, self.url))
        })?;
        if url.host_str().is_none() {
            return Err(OfxError::config(format!(
                "site {}: url '{}' has no host",
                self.name, self.url
            )));
        }
        if self.capabilities.is_empty() {
            return Err(OfxError::config(format!(
                "site {}: no capabilities configured",
                self.name
            )));
        }

        let quirks = self
            .quirks
            .clone()
            .unwrap_or_else(|| SiteQuirk::resolve(&url));

        Ok(Site {
            name: self.name.clone(),
            url,
            fi_org: self.fi_org.clone(),
            fid: self.fid.clone(),
            bank_id: self.bank_id.clone().filter(|b| !b.is_empty()),
            broker_id: self.broker_id.clone().filter(|b| !b.is_empty()),
            version: self.version.clone(),
            capabilities: self.capabilities.clone(),
            min_interval_days: self.min_interval_days,
            quiet_scrub: self.quiet_scrub.unwrap_or(defaults.quiet_scrub),
            skip_zero_transactions: self
                .skip_zero_transactions
                .unwrap_or(defaults.skip_zero_transactions),
            time_offset_hours: self.time_offset_hours,
            quirks,
            app_id: self.app_id.clone().unwrap_or_else(|| defaults.app_id.clone()),
            app_ver: self
                .app_ver
                .clone()
                .unwrap_or_else(|| defaults.app_ver.clone()),
            strip_tags: defaults.strip_tags.clone(),
        })
    }
}

impl AppConfig {
    /// Resolve every configured site.
    pub fn sites(&self) -> Result<Vec<Site>> {
        self.sites
            .iter()
            .map(|s| s.resolve(&self.defaults))
            .collect()
    }

    /// Resolve a single site by name.
    pub fn site(&self, name: &str) -> Result<Site> {
        self.sites
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| OfxError::config(format!("no site named '{name}' is configured")))?
            .resolve(&self.defaults)
    }

    /// A copy safe to print: passwords replaced with asterisks.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for account in &mut config.accounts {
            account.password = "********".into();
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.ofxfetch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| OfxError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.ofxfetch/ofxfetch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| OfxError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| OfxError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| OfxError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| OfxError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| OfxError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[defaults]
interval_days = 45
skip_zero_transactions = true

[[sites]]
name = "Discover Card"
url = "https://ofx.discovercard.com"
fi_org = "Discover Financial Services"
fid = "7101"
capabilities = ["CREDITCARD"]
version = "102"

[[sites]]
name = "Vanguard"
url = "https://vesnc.vanguard.com/us/OfxDirectConnectServlet"
fi_org = "Vanguard"
fid = "1358"
broker_id = "vanguard.com"
capabilities = ["INVSTMT"]
version = "220"
min_interval_days = 60
time_offset_hours = -5.0
skip_zero_transactions = false

[[accounts]]
site = "Discover Card"
account_id = "6011000000000000"
user = "jdoe"
password = "hunter2"
"#;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("transfer_dir"));
        assert!(toml_str.contains("CORRECTACTION"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.interval_days, 31);
        assert!(parsed.defaults.skip_failed_logon);
        assert_eq!(parsed.delivery.delay_ms, 500);
    }

    #[test]
    fn sites_resolve_with_defaults_and_overrides() {
        let config: AppConfig = toml::from_str(SAMPLE).expect("parse");
        let sites = config.sites().expect("resolve");
        assert_eq!(sites.len(), 2);

        let discover = &sites[0];
        assert_eq!(discover.quirks, vec![SiteQuirk::DiscoverFitid]);
        assert!(discover.has(Capability::CreditCard));
        assert!(discover.skip_zero_transactions);
        assert_eq!(discover.app_id, "QWIN");

        let vanguard = config.site("Vanguard").expect("site by name");
        assert!(vanguard.has(Capability::Investment));
        assert!(vanguard.version.is_xml());
        assert_eq!(vanguard.min_interval_days, Some(60));
        assert_eq!(vanguard.time_offset_hours, -5.0);
        assert!(!vanguard.skip_zero_transactions);
        assert!(vanguard.quirks.is_empty());
    }

    #[test]
    fn bad_site_url_is_config_error() {
        let config: AppConfig = toml::from_str(
            r#"
[[sites]]
name = "Broken"
url = "not a url"
capabilities = ["BANK"]
"#,
        )
        .expect("parse");
        let err = config.sites().unwrap_err();
        assert!(matches!(err, OfxError::Config { .. }));
    }

    #[test]
    fn bad_version_rejected_at_parse() {
        let result: std::result::Result<AppConfig, _> = toml::from_str(
            r#"
[[sites]]
name = "Odd"
url = "https://ofx.example.com"
capabilities = ["BANK"]
version = "9"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_site_lookup_fails() {
        let config: AppConfig = toml::from_str(SAMPLE).expect("parse");
        assert!(config.site("Nowhere").is_err());
    }

    #[test]
    fn redacted_masks_passwords() {
        let config: AppConfig = toml::from_str(SAMPLE).expect("parse");
        let shown = toml::to_string_pretty(&config.redacted()).expect("serialize");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("********"));
    }
}
