//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use ofxfetch_core::{
    BatchReport, FetchConfig, ProgressReporter, combine_statements, discover_accounts,
    import_statements, infer_kind, run_batch, write_combined,
};
use ofxfetch_request::client_uid::{ClientUidStore, FileClientUidStore};
use ofxfetch_scrub::scrub;
use ofxfetch_shared::{
    AppConfig, DeliveryConfig, OfxError, StatementKind, config_dir, config_file_path,
    init_config_at, load_config, load_config_from,
};
use ofxfetch_transport::{Transport, TransportOptions};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ofxfetch: download and clean up OFX statements.
#[derive(Parser)]
#[command(
    name = "ofxfetch",
    version,
    about = "Download OFX statements, repair known server defects, and hand them to your finance app.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.ofxfetch/ofxfetch.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Statement kind accepted by `scrub --kind`.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum KindArg {
    Bank,
    Creditcard,
    Investment,
}

impl From<KindArg> for StatementKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Bank => StatementKind::Bank,
            KindArg::Creditcard => StatementKind::CreditCard,
            KindArg::Investment => StatementKind::Investment,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Download statements for every configured account.
    Fetch {
        /// Look-back in days (overrides the configured interval).
        #[arg(long)]
        interval: Option<u32>,

        /// Also write one combined file and deliver only that.
        #[arg(long)]
        combine: bool,

        /// Leave the files in the transfer directory.
        #[arg(long)]
        no_deliver: bool,
    },

    /// List the accounts a login can see.
    Accounts {
        /// Configured site name.
        #[arg(long)]
        site: String,

        #[arg(long)]
        user: String,

        #[arg(long, env = "OFXFETCH_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Scrub a statement file in place (or into --out).
    Scrub {
        file: PathBuf,

        /// Configured site whose rules apply.
        #[arg(long)]
        site: String,

        /// Statement kind (detected from the file if omitted).
        #[arg(long)]
        kind: Option<KindArg>,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Merge statement files into one.
    Combine {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output path (defaults to combined<random>.ofx in the transfer directory).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Move statements from the import folder into the transfer directory.
    Import {
        /// Leave the files in the transfer directory.
        #[arg(long)]
        no_deliver: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration (passwords masked).
    Show,
    /// Drop the stored client UID for a site and user.
    ///
    /// The next connection registers a fresh UID with the institution.
    ForgetUid {
        /// Site name as configured.
        #[arg(long)]
        site: String,
        /// Login the UID was issued for.
        #[arg(long)]
        user: String,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "ofxfetch=info",
        1 => "ofxfetch=debug",
        _ => "ofxfetch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Fetch {
            interval,
            combine,
            no_deliver,
        } => cmd_fetch(config_path, interval, combine, no_deliver).await,
        Command::Accounts {
            site,
            user,
            password,
        } => cmd_accounts(config_path, &site, &user, &password).await,
        Command::Scrub {
            file,
            site,
            kind,
            out,
        } => cmd_scrub(config_path, &file, &site, kind, out.as_deref()),
        Command::Combine { files, out } => cmd_combine(config_path, &files, out.as_deref()),
        Command::Import { no_deliver } => cmd_import(config_path, no_deliver).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
            ConfigAction::ForgetUid { site, user } => {
                cmd_config_forget_uid(config_path, &site, &user).map(|_| ())
            }
        },
    }
}

/// Loaded config plus the directory relative paths resolve against.
struct Loaded {
    config: AppConfig,
    base: PathBuf,
}

impl Loaded {
    fn fetch_config(&self) -> FetchConfig {
        FetchConfig::from_defaults(&self.config.defaults, &self.base)
    }

    fn uid_store(&self) -> Result<FileClientUidStore> {
        let path = self.base.join(&self.config.defaults.client_uid_file);
        Ok(FileClientUidStore::open(path)?)
    }
}

fn load(config_path: Option<&Path>) -> Result<Loaded> {
    match config_path {
        Some(path) => {
            let config = load_config_from(path)?;
            let base = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
            Ok(Loaded { config, base })
        }
        None => Ok(Loaded {
            config: load_config()?,
            base: config_dir()?,
        }),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_fetch(
    config_path: Option<&Path>,
    interval: Option<u32>,
    combine: bool,
    no_deliver: bool,
) -> Result<()> {
    let loaded = load(config_path)?;
    if loaded.config.accounts.is_empty() {
        return Err(eyre!(
            "no accounts configured; add [[accounts]] entries to the config file"
        ));
    }

    let sites = loaded.config.sites()?;
    let mut fetch = loaded.fetch_config();
    if let Some(days) = interval {
        fetch.interval_days = days;
    }
    fetch.combine |= combine;

    info!(
        accounts = loaded.config.accounts.len(),
        interval_days = fetch.interval_days,
        combine = fetch.combine,
        "fetching statements"
    );

    let transport = Transport::new(&TransportOptions::default())?;
    let mut uids = loaded.uid_store()?;
    let reporter = CliProgress::new();

    let report = run_batch(
        &sites,
        &loaded.config.accounts,
        &fetch,
        &transport,
        &mut uids,
        &reporter,
    )
    .await?;

    print_report(&report);

    if !no_deliver {
        deliver(&report.deliverables(), &loaded.config.delivery).await?;
    }

    if report.ok() {
        Ok(())
    } else {
        Err(eyre!(
            "{} account(s) or step(s) failed; see messages above",
            report.failures.len()
        ))
    }
}

async fn cmd_accounts(
    config_path: Option<&Path>,
    site_name: &str,
    user: &str,
    password: &str,
) -> Result<()> {
    let loaded = load(config_path)?;
    let site = loaded.config.site(site_name)?;
    let transport = Transport::new(&TransportOptions::default())?;
    let mut uids = loaded.uid_store()?;

    let ids = discover_accounts(&site, user, password, &transport, &mut uids).await?;
    if ids.is_empty() {
        println!("No accounts reported by {}.", site.name);
    } else {
        println!("Accounts at {}:", site.name);
        for id in ids {
            println!("  {id}");
        }
    }
    Ok(())
}

fn cmd_scrub(
    config_path: Option<&Path>,
    file: &Path,
    site_name: &str,
    kind: Option<KindArg>,
    out: Option<&Path>,
) -> Result<()> {
    let loaded = load(config_path)?;
    let site = loaded.config.site(site_name)?;
    let body = std::fs::read_to_string(file).map_err(|e| OfxError::io(file, e))?;
    let kind = kind.map_or_else(|| infer_kind(&body), StatementKind::from);

    let report = scrub(&site, kind, &body);
    let dest = out.unwrap_or(file);
    std::fs::write(dest, &report.text).map_err(|e| OfxError::io(dest, e))?;

    if report.already_scrubbed {
        println!("{} was already scrubbed.", file.display());
    } else {
        println!("Scrubbed {} ({kind}):", file.display());
        for note in &report.notes {
            println!("  - {note}");
        }
        for w in &report.warnings {
            println!("  ! [{}] {}", w.rule, w.message);
        }
    }
    Ok(())
}

fn cmd_combine(config_path: Option<&Path>, files: &[PathBuf], out: Option<&Path>) -> Result<()> {
    let path = match out {
        Some(out) => {
            let bodies = files
                .iter()
                .map(|p| std::fs::read_to_string(p).map_err(|e| OfxError::io(p, e)))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let now = Local::now().naive_local();
            std::fs::write(out, combine_statements(&bodies, now))
                .map_err(|e| OfxError::io(out, e))?;
            out.to_path_buf()
        }
        None => {
            let loaded = load(config_path)?;
            write_combined(files, &loaded.fetch_config().transfer_dir)?
        }
    };
    println!("Combined {} file(s) into {}", files.len(), path.display());
    Ok(())
}

async fn cmd_import(config_path: Option<&Path>, no_deliver: bool) -> Result<()> {
    let loaded = load(config_path)?;
    let fetch = loaded.fetch_config();
    let import_dir = fetch
        .import_dir
        .as_deref()
        .ok_or_else(|| eyre!("no import directory configured"))?;

    let statements = import_statements(import_dir, &fetch.transfer_dir, &loaded.config.sites()?)?;
    if statements.is_empty() {
        println!("Nothing to import from {}.", import_dir.display());
        return Ok(());
    }
    for st in &statements {
        println!("  {} [{}] -> {}", st.site, st.kind, st.path.display());
    }

    if !no_deliver {
        let paths: Vec<PathBuf> = statements.iter().map(|s| s.path.clone()).collect();
        deliver(&paths, &loaded.config.delivery).await?;
    }
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if path.exists() {
        return Err(eyre!("config file already exists at {}", path.display()));
    }
    init_config_at(&path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let loaded = load(config_path)?;
    let toml_str = toml::to_string_pretty(&loaded.config.redacted())?;
    println!("{toml_str}");
    Ok(())
}

/// Returns whether a UID was stored for the pair.
fn cmd_config_forget_uid(config_path: Option<&Path>, site: &str, user: &str) -> Result<bool> {
    let loaded = load(config_path)?;
    let site = loaded.config.site(site)?;
    let mut store = loaded.uid_store()?;
    let removed = store.forget(&site.host(), user)?;
    if removed {
        info!(site = %site.name, "forgot client UID");
        println!(
            "Removed client UID for {user} at {} from {}",
            site.name,
            store.path().display()
        );
    } else {
        println!("No client UID stored for {user} at {}", site.name);
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Output and hand-off
// ---------------------------------------------------------------------------

fn print_report(report: &BatchReport) {
    println!();
    if report.statements.is_empty() {
        println!("  No statements downloaded.");
    } else {
        println!("  Statements:");
        for st in &report.statements {
            println!("    {} {} [{}]", st.site, st.account_id, st.kind);
            println!("      {}", st.path.display());
        }
    }
    if let Some(path) = &report.combined {
        println!("  Combined: {}", path.display());
    }
    if !report.skipped.is_empty() {
        println!("  Skipped after failed login:");
        for s in &report.skipped {
            println!("    {} {} (user {})", s.site, s.account_id, s.user);
        }
    }
    if !report.failures.is_empty() {
        println!("  Failures:");
        for f in &report.failures {
            println!("    {} {}: {}", f.site, f.account_id, f.error);
            if let OfxError::Protocol {
                artifact: Some(path),
                ..
            } = &f.error
            {
                println!("      raw response kept at {}", path.display());
            }
        }
    }
    println!("  Time: {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

/// Hand each file to the configured delivery command, one at a time.
async fn deliver(files: &[PathBuf], delivery: &DeliveryConfig) -> Result<()> {
    let Some(command) = delivery.command.as_deref().filter(|c| !c.trim().is_empty()) else {
        info!("no delivery command configured, leaving files in place");
        return Ok(());
    };
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| eyre!("delivery command is empty"))?;
    let args: Vec<&str> = parts.collect();

    let mut failed = 0;
    for (i, file) in files.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(delivery.delay_ms)).await;
        }
        info!(program, file = %file.display(), "delivering statement");
        let status = std::process::Command::new(program)
            .args(&args)
            .arg(file)
            .status()
            .map_err(|e| eyre!("failed to run delivery command '{program}': {e}"))?;
        if !status.success() {
            warn!(file = %file.display(), code = status.code().unwrap_or(-1), "delivery command failed");
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(eyre!("delivery failed for {failed} file(s)"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn account_started(&self, site: &str, account_id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("[{current}/{total}] {site} {account_id}"));
    }

    fn account_finished(&self, site: &str, account_id: &str, error: Option<&OfxError>) {
        match error {
            None => self.spinner.println(format!("  ✓ {site} {account_id}")),
            Some(e) => self.spinner.println(format!("  ✗ {site} {account_id}: {e}")),
        }
    }

    fn account_skipped(&self, site: &str, account_id: &str) {
        self.spinner
            .println(format!("  - {site} {account_id}: skipped after failed login"));
    }

    fn done(&self, _report: &BatchReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const CONFIG: &str = r#"
[defaults]
client_uid_file = "uids/connect.json"

[[sites]]
name = "Mock Bank"
url = "https://ofx.mockbank.example/ofx"
fid = "999"
capabilities = ["BANK"]
version = "103"
"#;

    #[test]
    fn forget_uid_drops_the_stored_entry() {
        let root = std::env::temp_dir().join(format!("ofxfetch-cli-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&root).unwrap();
        let config_path = root.join("ofxfetch.toml");
        std::fs::write(&config_path, CONFIG).unwrap();

        let table = root.join("uids").join("connect.json");
        let mut store = FileClientUidStore::open(&table).unwrap();
        let old = store.client_uid("ofx.mockbank.example", "jdoe").unwrap();
        let other = store.client_uid("ofx.mockbank.example", "spouse").unwrap();

        assert!(cmd_config_forget_uid(Some(&config_path), "Mock Bank", "jdoe").unwrap());
        assert!(!cmd_config_forget_uid(Some(&config_path), "Mock Bank", "jdoe").unwrap());

        let mut reopened = FileClientUidStore::open(&table).unwrap();
        assert_eq!(reopened.client_uid("ofx.mockbank.example", "spouse").unwrap(), other);
        assert_ne!(reopened.client_uid("ofx.mockbank.example", "jdoe").unwrap(), old);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn forget_uid_rejects_unknown_site() {
        let root = std::env::temp_dir().join(format!("ofxfetch-cli-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&root).unwrap();
        let config_path = root.join("ofxfetch.toml");
        std::fs::write(&config_path, CONFIG).unwrap();

        assert!(cmd_config_forget_uid(Some(&config_path), "Nowhere", "jdoe").is_err());
        assert!(!root.join("uids").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn forget_uid_parses_from_the_command_line() {
        let cli = Cli::try_parse_from([
            "ofxfetch", "config", "forget-uid", "--site", "Mock Bank", "--user", "jdoe",
        ])
        .unwrap();
        match cli.command {
            Command::Config {
                action: ConfigAction::ForgetUid { site, user },
            } => {
                assert_eq!(site, "Mock Bank");
                assert_eq!(user, "jdoe");
            }
            _ => panic!("expected config forget-uid"),
        }
    }
}
