//! OFX request construction.
//!
//! [`build_request`] is pure: everything non-deterministic (client clock,
//! transaction UID, client UID) arrives through a [`RequestContext`].
//! The persistent client-UID table lives in [`client_uid`].

pub mod client_uid;
mod element;

use chrono::{Local, NaiveDate, NaiveDateTime};
use ofxfetch_shared::ofx::{format_date, format_datetime};
use ofxfetch_shared::{Account, OfxError, Result, Site, StatementKind};
use uuid::Uuid;

use crate::element::{Element, aggregate, field};

pub use client_uid::{ClientUidStore, FileClientUidStore};

/// Update-since value used when an account-info query has no date.
pub const EPOCH: &str = "19700101000000";

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Per-request values that are not derived from site or account.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Client clock, sent as `DTCLIENT` and investment `DTASOF`.
    pub dt_client: NaiveDateTime,
    /// Transaction UID for the single transaction in this request.
    pub trn_uid: String,
    /// Per-(endpoint, user) client UID; only sent for version 103 and later.
    pub client_uid: Option<String>,
}

impl RequestContext {
    /// Local time now and a random transaction UID.
    pub fn fresh(client_uid: Option<String>) -> Self {
        Self {
            dt_client: Local::now().naive_local(),
            trn_uid: Uuid::new_v4().to_string(),
            client_uid,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Build the full request body (header plus `<OFX>` block).
///
/// `start` is the statement start date; for account-info queries it is the
/// update-since date and defaults to the epoch. Statement queries without a
/// start date ask for everything the institution will give.
pub fn build_request(
    site: &Site,
    account: &Account,
    kind: StatementKind,
    start: Option<NaiveDate>,
    ctx: &RequestContext,
) -> Result<String> {
    let xml = site.version.is_xml();
    let message = match kind {
        StatementKind::AccountInfo => account_info(start, ctx),
        StatementKind::Bank => bank(site, account, start, ctx)?,
        StatementKind::CreditCard => credit_card(account, start, ctx),
        StatementKind::Investment => investment(site, account, start, ctx)?,
    };
    let ofx = aggregate("OFX", vec![sign_on(site, account, ctx), message]);

    Ok(format!("{}\r\n{}", header(site), ofx.render(xml)))
}

fn header(site: &Site) -> String {
    let version = site.version.as_str();
    if site.version.is_xml() {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\r\n\
             <?OFX OFXHEADER=\"200\" VERSION=\"{version}\" SECURITY=\"NONE\" \
             OLDFILEUID=\"NONE\" NEWFILEUID=\"NONE\"?>"
        )
    } else {
        [
            "OFXHEADER:100",
            "DATA:OFXSGML",
            &format!("VERSION:{version}"),
            "SECURITY:NONE",
            "ENCODING:USASCII",
            "CHARSET:1252",
            "COMPRESSION:NONE",
            "OLDFILEUID:NONE",
            "NEWFILEUID:NONE",
            "",
        ]
        .join("\r\n")
    }
}

fn sign_on(site: &Site, account: &Account, ctx: &RequestContext) -> Element {
    let mut sonrq = vec![
        field("DTCLIENT", format_datetime(ctx.dt_client)),
        field("USERID", account.user.as_str()),
        field("USERPASS", account.password.as_str()),
        field("LANGUAGE", "ENG"),
        aggregate(
            "FI",
            vec![field("ORG", site.fi_org.as_str()), field("FID", site.fid.as_str())],
        ),
        field("APPID", site.app_id.as_str()),
        field("APPVER", site.app_ver.as_str()),
    ];
    if site.version.requires_client_uid() {
        if let Some(uid) = &ctx.client_uid {
            sonrq.push(field("CLIENTUID", uid.as_str()));
        }
    }
    aggregate("SIGNONMSGSRQV1", vec![aggregate("SONRQ", sonrq)])
}

/// Wrap a request in its message set and transaction envelope.
fn message(
    set_tag: &'static str,
    trn_tag: &'static str,
    ctx: &RequestContext,
    request: Element,
) -> Element {
    aggregate(
        set_tag,
        vec![aggregate(
            trn_tag,
            vec![field("TRNUID", ctx.trn_uid.as_str()), request],
        )],
    )
}

fn inctran(start: Option<NaiveDate>) -> Element {
    aggregate(
        "INCTRAN",
        vec![
            field("DTSTART", start.map(format_date).unwrap_or_default()),
            field("INCLUDE", "Y"),
        ],
    )
}

fn account_info(start: Option<NaiveDate>, ctx: &RequestContext) -> Element {
    let since = start
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(format_datetime)
        .unwrap_or_else(|| EPOCH.to_string());
    let req = aggregate("ACCTINFORQ", vec![field("DTACCTUP", since)]);
    message("SIGNUPMSGSRQV1", "ACCTINFOTRNRQ", ctx, req)
}

fn bank(
    site: &Site,
    account: &Account,
    start: Option<NaiveDate>,
    ctx: &RequestContext,
) -> Result<Element> {
    let bank_id = site.bank_id.as_deref().ok_or_else(|| {
        OfxError::config(format!(
            "site {} has no BANKID; required for bank statements",
            site.name
        ))
    })?;
    let account_type = account.account_type.ok_or_else(|| {
        OfxError::config(format!(
            "account {} at {} has no account type; required for bank statements",
            account.transmitted_id(),
            site.name
        ))
    })?;

    let req = aggregate(
        "STMTRQ",
        vec![
            aggregate(
                "BANKACCTFROM",
                vec![
                    field("BANKID", bank_id),
                    field("ACCTID", account.transmitted_id()),
                    field("ACCTTYPE", account_type.as_str()),
                ],
            ),
            inctran(start),
        ],
    );
    Ok(message("BANKMSGSRQV1", "STMTTRNRQ", ctx, req))
}

fn credit_card(account: &Account, start: Option<NaiveDate>, ctx: &RequestContext) -> Element {
    let req = aggregate(
        "CCSTMTRQ",
        vec![
            aggregate("CCACCTFROM", vec![field("ACCTID", account.transmitted_id())]),
            inctran(start),
        ],
    );
    message("CREDITCARDMSGSRQV1", "CCSTMTTRNRQ", ctx, req)
}

fn investment(
    site: &Site,
    account: &Account,
    start: Option<NaiveDate>,
    ctx: &RequestContext,
) -> Result<Element> {
    let broker = site.broker_or_org().ok_or_else(|| {
        OfxError::config(format!(
            "site {} has no BROKERID or FIORG; required for investment statements",
            site.name
        ))
    })?;

    let req = aggregate(
        "INVSTMTRQ",
        vec![
            aggregate(
                "INVACCTFROM",
                vec![
                    field("BROKERID", broker),
                    field("ACCTID", account.transmitted_id()),
                ],
            ),
            inctran(start),
            field("INCOO", "Y"),
            aggregate(
                "INCPOS",
                vec![
                    field("DTASOF", format_datetime(ctx.dt_client)),
                    field("INCLUDE", "Y"),
                ],
            ),
            field("INCBAL", "Y"),
        ],
    );
    Ok(message("INVSTMTMSGSRQV1", "INVSTMTTRNRQ", ctx, req))
}
