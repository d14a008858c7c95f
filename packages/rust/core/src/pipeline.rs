//! Per-account fetch pipeline and the sequential batch runner.
//!
//! One account goes request → exchange → raw file → validate → scrub →
//! overwrite. Accounts run strictly one after another; the only state carried
//! between them is the [`FailedLogins`] set.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use chrono::{Days, Local, NaiveDate};
use ofxfetch_request::client_uid::ClientUidStore;
use ofxfetch_request::{RequestContext, build_request};
use ofxfetch_scrub::{ScrubContext, ScrubPipeline};
use ofxfetch_shared::ofx::element_values;
use ofxfetch_shared::{
    Account, DefaultsConfig, OfxError, Result, Site, Statement, StatementKind,
};
use ofxfetch_transport::Transport;
use regex::{Captures, Regex};
use tracing::{debug, info, instrument, warn};

use crate::combine::write_combined;
use crate::files::{clear_statement_files, ensure_dir, statement_file_name};
use crate::import::import_statements;

static ACCTID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<ACCTID>)(\s*)([^<\s]+)").expect("valid regex"));

// ---------------------------------------------------------------------------
// Configuration and results
// ---------------------------------------------------------------------------

/// Settings for a fetch run.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Where statement files are written.
    pub transfer_dir: PathBuf,
    /// Folder scanned for manually downloaded statements, if any.
    pub import_dir: Option<PathBuf>,
    /// Requested look-back in days.
    pub interval_days: u32,
    /// Skip further accounts for a (site, user) pair after one failure.
    pub skip_failed_logon: bool,
    /// Also write one combined file.
    pub combine: bool,
}

impl FetchConfig {
    /// Build from `[defaults]`, resolving relative directories against `base`.
    pub fn from_defaults(defaults: &DefaultsConfig, base: &Path) -> Self {
        let import_dir = (!defaults.import_dir.trim().is_empty())
            .then(|| base.join(&defaults.import_dir));
        Self {
            transfer_dir: base.join(&defaults.transfer_dir),
            import_dir,
            interval_days: defaults.interval_days,
            skip_failed_logon: defaults.skip_failed_logon,
            combine: defaults.combine,
        }
    }
}

/// An account (or import/combine step) that did not produce a statement.
#[derive(Debug)]
pub struct AccountFailure {
    pub site: String,
    pub account_id: String,
    pub error: OfxError,
}

/// An account not attempted because its credential pair already failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAccount {
    pub site: String,
    pub account_id: String,
    pub user: String,
}

/// Outcome of [`run_batch`], in queue order.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Downloaded statements followed by imported ones.
    pub statements: Vec<Statement>,
    pub failures: Vec<AccountFailure>,
    pub skipped: Vec<SkippedAccount>,
    /// Combined file, when combining was requested and anything was fetched.
    pub combined: Option<PathBuf>,
    pub elapsed: std::time::Duration,
}

impl BatchReport {
    /// No account, import or combine step failed.
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Files to hand off downstream: the combined file if present,
    /// otherwise every statement in order.
    pub fn deliverables(&self) -> Vec<PathBuf> {
        match &self.combined {
            Some(path) => vec![path.clone()],
            None => self.statements.iter().map(|s| s.path.clone()).collect(),
        }
    }
}

/// (site, user) pairs whose exchange failed during this run.
#[derive(Debug, Default)]
pub struct FailedLogins(HashSet<(String, String)>);

impl FailedLogins {
    pub fn contains(&self, account: &Account) -> bool {
        self.0.contains(&account.credential_key())
    }

    pub fn record(&mut self, account: &Account) {
        self.0.insert(account.credential_key());
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting batch status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before an account's exchange starts.
    fn account_started(&self, site: &str, account_id: &str, current: usize, total: usize);
    /// Called after an account finished, with its error if it failed.
    fn account_finished(&self, site: &str, account_id: &str, error: Option<&OfxError>);
    /// Called when an account is skipped after an earlier failed login.
    fn account_skipped(&self, site: &str, account_id: &str);
    /// Called when the batch completes.
    fn done(&self, report: &BatchReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn account_started(&self, _site: &str, _account_id: &str, _current: usize, _total: usize) {}
    fn account_finished(&self, _site: &str, _account_id: &str, _error: Option<&OfxError>) {}
    fn account_skipped(&self, _site: &str, _account_id: &str) {}
    fn done(&self, _report: &BatchReport) {}
}

// ---------------------------------------------------------------------------
// Single account
// ---------------------------------------------------------------------------

/// Download, validate and scrub one account's statement.
///
/// The raw response is written before validation. On a rejected response the
/// file stays on disk and its path is attached to the returned
/// [`OfxError::Protocol`].
#[instrument(skip_all, fields(site = %site.name, account = %account.account_id))]
pub async fn fetch_statement(
    site: &Site,
    account: &Account,
    config: &FetchConfig,
    transport: &Transport,
    uids: &mut dyn ClientUidStore,
) -> Result<Statement> {
    let kind = StatementKind::select(site, account)?;
    let ctx = request_context(site, &account.user, uids)?;
    let start = start_date(ctx.dt_client.date(), lookback_days(site, config.interval_days))?;
    let payload = build_request(site, account, kind, Some(start), &ctx)?;
    debug!(%kind, %start, "built request");

    let exchange = transport.exchange(site, &payload).await?;

    ensure_dir(&config.transfer_dir)?;
    let path = config
        .transfer_dir
        .join(statement_file_name(&site.name, ctx.dt_client));
    std::fs::write(&path, &exchange.response.body).map_err(|e| OfxError::io(&path, e))?;

    if !exchange.is_valid() {
        let error = exchange
            .validation
            .into_error()
            .unwrap_or_else(|| OfxError::protocol("response rejected"))
            .with_artifact(&path);
        warn!(path = %path.display(), "rejected response preserved");
        return Err(error);
    }

    let body = restore_account_suffix(&exchange.response.body, account);
    let mut scrub_ctx = ScrubContext::new(site, kind, Local::now().naive_local());
    let report = ScrubPipeline::for_site(site).run(&body, &mut scrub_ctx);
    std::fs::write(&path, &report.text).map_err(|e| OfxError::io(&path, e))?;

    info!(path = %path.display(), notes = report.notes.len(), "statement ready");
    Ok(Statement {
        path,
        site: site.name.clone(),
        account_id: account.account_id.clone(),
        kind,
        notes: report.notes,
    })
}

/// Ask the institution which accounts a login can see.
///
/// Returns the distinct `<ACCTID>` values of the account-info reply, sorted.
#[instrument(skip_all, fields(site = %site.name))]
pub async fn discover_accounts(
    site: &Site,
    user: &str,
    password: &str,
    transport: &Transport,
    uids: &mut dyn ClientUidStore,
) -> Result<Vec<String>> {
    let account = Account {
        site: site.name.clone(),
        account_id: String::new(),
        account_type: None,
        user: user.to_string(),
        password: password.to_string(),
    };
    let ctx = request_context(site, user, uids)?;
    let payload = build_request(site, &account, StatementKind::AccountInfo, None, &ctx)?;

    let exchange = transport.exchange(site, &payload).await?;
    if !exchange.is_valid() {
        return Err(exchange
            .validation
            .into_error()
            .unwrap_or_else(|| OfxError::protocol("response rejected")));
    }

    let mut ids = element_values(&exchange.response.body, "ACCTID");
    ids.sort();
    ids.dedup();
    info!(accounts = ids.len(), "account discovery finished");
    Ok(ids)
}

fn request_context(
    site: &Site,
    user: &str,
    uids: &mut dyn ClientUidStore,
) -> Result<RequestContext> {
    let client_uid = if site.version.requires_client_uid() {
        Some(uids.client_uid(&site.host(), user)?)
    } else {
        None
    };
    Ok(RequestContext::fresh(client_uid))
}

/// The larger of the requested interval and the site's minimum.
fn lookback_days(site: &Site, requested: u32) -> u32 {
    requested.max(site.min_interval_days.unwrap_or(0))
}

fn start_date(today: NaiveDate, days: u32) -> Result<NaiveDate> {
    today
        .checked_sub_days(Days::new(u64::from(days)))
        .ok_or_else(|| OfxError::config(format!("look-back of {days} days is out of range")))
}

/// Put the mapping suffix back on `<ACCTID>` values the institution echoed.
pub fn restore_account_suffix(body: &str, account: &Account) -> String {
    if !account.has_mapping_suffix() {
        return body.to_string();
    }
    let sent = account.transmitted_id();
    ACCTID_RE
        .replace_all(body, |c: &Captures| {
            if &c[3] == sent {
                format!("{}{}{}", &c[1], &c[2], account.account_id)
            } else {
                c[0].to_string()
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Fetch every account in order, then pick up the import folder and
/// optionally combine.
///
/// Failures are collected per account and never stop the batch. When
/// `skip_failed_logon` is set, a transport or protocol failure for a
/// (site, user) pair skips that pair's remaining accounts without contacting
/// the institution again.
#[instrument(skip_all, fields(accounts = accounts.len(), dir = %config.transfer_dir.display()))]
pub async fn run_batch(
    sites: &[Site],
    accounts: &[Account],
    config: &FetchConfig,
    transport: &Transport,
    uids: &mut dyn ClientUidStore,
    progress: &dyn ProgressReporter,
) -> Result<BatchReport> {
    let started = Instant::now();
    let mut report = BatchReport::default();
    let mut failed = FailedLogins::default();

    progress.phase("Preparing transfer directory");
    ensure_dir(&config.transfer_dir)?;
    clear_statement_files(&config.transfer_dir)?;

    progress.phase("Downloading statements");
    let total = accounts.len();
    for (i, account) in accounts.iter().enumerate() {
        fetch_account(
            sites,
            account,
            config,
            transport,
            uids,
            &mut failed,
            &mut report,
            progress,
            (i + 1, total),
        )
        .await;
    }

    if let Some(import_dir) = &config.import_dir {
        progress.phase("Importing statements");
        match import_statements(import_dir, &config.transfer_dir, sites) {
            Ok(imported) => report.statements.extend(imported),
            Err(error) => {
                warn!(%error, "import folder failed");
                report.failures.push(AccountFailure {
                    site: "import".into(),
                    account_id: import_dir.display().to_string(),
                    error,
                });
            }
        }
    }

    if config.combine && !report.statements.is_empty() {
        progress.phase("Combining statements");
        let paths: Vec<PathBuf> = report.statements.iter().map(|s| s.path.clone()).collect();
        match write_combined(&paths, &config.transfer_dir) {
            Ok(path) => report.combined = Some(path),
            Err(error) => {
                warn!(%error, "combining failed");
                report.failures.push(AccountFailure {
                    site: "combine".into(),
                    account_id: String::new(),
                    error,
                });
            }
        }
    }

    report.elapsed = started.elapsed();
    info!(
        statements = report.statements.len(),
        failures = report.failures.len(),
        skipped = report.skipped.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "batch complete"
    );
    progress.done(&report);
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn fetch_account(
    sites: &[Site],
    account: &Account,
    config: &FetchConfig,
    transport: &Transport,
    uids: &mut dyn ClientUidStore,
    failed: &mut FailedLogins,
    report: &mut BatchReport,
    progress: &dyn ProgressReporter,
    (current, total): (usize, usize),
) {
    if config.skip_failed_logon && failed.contains(account) {
        info!(
            site = %account.site,
            account = %account.account_id,
            "skipping account after earlier failed login"
        );
        progress.account_skipped(&account.site, &account.account_id);
        report.skipped.push(SkippedAccount {
            site: account.site.clone(),
            account_id: account.account_id.clone(),
            user: account.user.clone(),
        });
        return;
    }

    progress.account_started(&account.site, &account.account_id, current, total);

    let outcome = match sites.iter().find(|s| s.name == account.site) {
        Some(site) => fetch_statement(site, account, config, transport, uids).await,
        None => Err(OfxError::config(format!(
            "account {} refers to unknown site {}",
            account.account_id, account.site
        ))),
    };

    match outcome {
        Ok(statement) => {
            progress.account_finished(&account.site, &account.account_id, None);
            report.statements.push(statement);
        }
        Err(error) => {
            warn!(site = %account.site, account = %account.account_id, %error, "account failed");
            if error.is_exchange_failure() {
                failed.record(account);
            }
            progress.account_finished(&account.site, &account.account_id, Some(&error));
            report.failures.push(AccountFailure {
                site: account.site.clone(),
                account_id: account.account_id.clone(),
                error,
            });
        }
    }
}
