//! Import folder: statements downloaded by hand.
//!
//! Each valid file is matched to a configured site, scrubbed unless it already
//! carries the marker, and moved into the transfer directory so it is queued
//! with the downloaded statements.

use std::path::{Path, PathBuf};

use ofxfetch_scrub::{is_scrubbed, scrub};
use ofxfetch_shared::ofx::element_value;
use ofxfetch_shared::{OfxError, Result, Site, Statement, StatementKind};
use ofxfetch_transport::{is_xml_framed, to_sgml_framing, validate};
use tracing::{debug, info, instrument, warn};

use crate::files::{ensure_dir, has_ofx_extension, list_files};

/// Move every valid statement in `import_dir` into `transfer_dir`.
///
/// Files that do not validate are left where they are. A missing import
/// directory imports nothing.
#[instrument(skip_all, fields(dir = %import_dir.display()))]
pub fn import_statements(
    import_dir: &Path,
    transfer_dir: &Path,
    sites: &[Site],
) -> Result<Vec<Statement>> {
    if !import_dir.is_dir() {
        debug!("import directory does not exist");
        return Ok(Vec::new());
    }
    ensure_dir(transfer_dir)?;

    let mut imported = Vec::new();
    for path in list_files(import_dir)? {
        let bytes = std::fs::read(&path).map_err(|e| OfxError::io(&path, e))?;
        let mut body = String::from_utf8_lossy(&bytes).into_owned();
        if is_xml_framed(&body) {
            body = to_sgml_framing(&body);
        }

        if let Some(reason) = validate(&body).reason() {
            debug!(file = %path.display(), reason, "not an importable statement");
            continue;
        }

        let Some(site) = match_site(&body, sites) else {
            warn!(file = %path.display(), "no site configured to scrub imported statement");
            continue;
        };
        let kind = infer_kind(&body);

        let (text, notes) = if is_scrubbed(&body) {
            (body, Vec::new())
        } else {
            let report = scrub(site, kind, &body);
            (report.text, report.notes)
        };

        let dest = transfer_dir.join(destination_name(&path));
        std::fs::write(&dest, &text).map_err(|e| OfxError::io(&dest, e))?;
        std::fs::remove_file(&path).map_err(|e| OfxError::io(&path, e))?;
        info!(from = %path.display(), to = %dest.display(), site = %site.name, "imported statement");

        imported.push(Statement {
            path: dest,
            site: site.name.clone(),
            account_id: element_value(&text, "ACCTID").unwrap_or_default(),
            kind,
            notes,
        });
    }
    Ok(imported)
}

/// The site whose FID, or failing that BANKID, appears in the statement.
/// Falls back to the first configured site.
pub fn match_site<'a>(body: &str, sites: &'a [Site]) -> Option<&'a Site> {
    let by_fid = element_value(body, "FID")
        .and_then(|fid| sites.iter().find(|s| !s.fid.is_empty() && s.fid == fid));
    let by_bank_id = || {
        element_value(body, "BANKID")
            .and_then(|id| sites.iter().find(|s| s.bank_id.as_deref() == Some(id.as_str())))
    };
    by_fid.or_else(by_bank_id).or_else(|| sites.first())
}

/// Statement kind from the response message set present.
pub fn infer_kind(body: &str) -> StatementKind {
    let upper = body.to_ascii_uppercase();
    if upper.contains("<CREDITCARDMSGSRSV1>") {
        StatementKind::CreditCard
    } else if upper.contains("<INVSTMTMSGSRSV1>") {
        StatementKind::Investment
    } else if upper.contains("<BANKMSGSRSV1>") {
        StatementKind::Bank
    } else {
        StatementKind::AccountInfo
    }
}

fn destination_name(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "imported".to_string());
    if has_ofx_extension(path) {
        PathBuf::from(name)
    } else {
        PathBuf::from(format!("{name}.ofx"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofxfetch_shared::{Capability, ProtocolVersion};
    use url::Url;
    use uuid::Uuid;

    fn site(name: &str, fid: &str, bank_id: Option<&str>) -> Site {
        Site {
            name: name.into(),
            url: Url::parse("https://ofx.example.com/ofx").unwrap(),
            fi_org: "EX".into(),
            fid: fid.into(),
            bank_id: bank_id.map(Into::into),
            broker_id: None,
            version: ProtocolVersion::default(),
            capabilities: vec![Capability::Bank],
            min_interval_days: None,
            quiet_scrub: false,
            skip_zero_transactions: false,
            time_offset_hours: 0.0,
            quirks: vec![],
            app_id: "QWIN".into(),
            app_ver: "2400".into(),
            strip_tags: vec![],
        }
    }

    fn statement(fid: &str, bank_id: &str) -> String {
        format!(
            "OFXHEADER:100\r\nDATA:OFXSGML\r\nNEWFILEUID:NONE\r\n\r\n\
             <OFX><SIGNONMSGSRSV1><SONRS><STATUS><CODE>0<SEVERITY>INFO</STATUS>\
             <FI><ORG>EX<FID>{fid}</FI></SONRS></SIGNONMSGSRSV1>\
             <BANKMSGSRSV1><STMTTRNRS><STMTRS><BANKACCTFROM><BANKID>{bank_id}<ACCTID>42\
             </BANKACCTFROM><BANKTRANLIST><STMTTRN><TRNAMT>-1.00<NAME>A&B</STMTTRN>\
             </BANKTRANLIST></STMTRS></STMTTRNRS></BANKMSGSRSV1></OFX>"
        )
    }

    #[test]
    fn sites_match_by_fid_then_bank_id_then_first() {
        let sites = vec![
            site("First", "100", None),
            site("Second", "200", None),
            site("Third", "300", Some("021000021")),
        ];
        assert_eq!(match_site(&statement("200", "x"), &sites).unwrap().name, "Second");
        assert_eq!(match_site(&statement("999", "021000021"), &sites).unwrap().name, "Third");
        assert_eq!(match_site(&statement("999", "x"), &sites).unwrap().name, "First");
        assert!(match_site(&statement("999", "x"), &[]).is_none());
    }

    #[test]
    fn valid_files_are_scrubbed_and_moved() {
        let root = std::env::temp_dir().join(format!("ofxfetch-import-test-{}", Uuid::now_v7()));
        let import = root.join("import");
        let xfr = root.join("xfr");
        ensure_dir(&import).unwrap();
        std::fs::write(import.join("download.qfx"), statement("200", "x")).unwrap();
        std::fs::write(import.join("readme.txt"), "not a statement").unwrap();

        let sites = vec![site("First", "100", None), site("Second", "200", None)];
        let imported = import_statements(&import, &xfr, &sites).unwrap();

        assert_eq!(imported.len(), 1);
        let st = &imported[0];
        assert_eq!(st.site, "Second");
        assert_eq!(st.kind, StatementKind::Bank);
        assert_eq!(st.account_id, "42");
        assert_eq!(st.path, xfr.join("download.qfx.ofx"));

        let content = std::fs::read_to_string(&st.path).unwrap();
        assert!(is_scrubbed(&content));
        assert!(content.contains("<NAME>A&amp;B"));
        assert!(!import.join("download.qfx").exists());
        assert!(import.join("readme.txt").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn scrubbed_files_pass_through_unchanged() {
        let root = std::env::temp_dir().join(format!("ofxfetch-import-test-{}", Uuid::now_v7()));
        let import = root.join("import");
        let xfr = root.join("xfr");
        ensure_dir(&import).unwrap();
        let marked = statement("100", "x").replace("NEWFILEUID:NONE", "NEWFILEUID:OFXFETCH");
        std::fs::write(import.join("done.ofx"), &marked).unwrap();

        let imported = import_statements(&import, &xfr, &[site("First", "100", None)]).unwrap();
        assert_eq!(imported.len(), 1);
        assert!(imported[0].notes.is_empty());
        assert_eq!(std::fs::read_to_string(xfr.join("done.ofx")).unwrap(), marked);

        assert!(import_statements(&root.join("missing"), &xfr, &[]).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }
}
