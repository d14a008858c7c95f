//! Merge several scrubbed statements into one document.
//!
//! Some downstream applications accept only one file per import, so the
//! message sets of every statement are pulled out and regrouped: all bank
//! bodies under one `<BANKMSGSRSV1>`, all card bodies under one
//! `<CREDITCARDMSGSRSV1>`, and so on. The sign-on block is synthesized, never
//! copied from a source statement.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{Local, NaiveDateTime};
use ofxfetch_shared::ofx::{CRLF, SCRUBBED_FILE_UID, format_datetime, sgml_header};
use ofxfetch_shared::{OfxError, Result};
use regex::Regex;
use tracing::{info, instrument};

use crate::files::{combined_file_name, ensure_dir};

/// A message set the combiner regroups.
struct Section {
    /// Aggregate that wraps the merged bodies.
    open: &'static str,
    close: &'static str,
    pattern: &'static LazyLock<Regex>,
}

static BANK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<BANKMSGSRSV1>(.*?)</BANKMSGSRSV1>").expect("valid regex")
});

static CARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<CREDITCARDMSGSRSV1>(.*?)</CREDITCARDMSGSRSV1>").expect("valid regex")
});

static INVESTMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<INVSTMTMSGSRSV1>(.*?)</INVSTMTMSGSRSV1>").expect("valid regex")
});

static SECLIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<SECLIST>(.*?)</SECLIST>").expect("valid regex"));

static SECTIONS: [Section; 4] = [
    Section {
        open: "<BANKMSGSRSV1>",
        close: "</BANKMSGSRSV1>",
        pattern: &BANK_RE,
    },
    Section {
        open: "<CREDITCARDMSGSRSV1>",
        close: "</CREDITCARDMSGSRSV1>",
        pattern: &CARD_RE,
    },
    Section {
        open: "<INVSTMTMSGSRSV1>",
        close: "</INVSTMTMSGSRSV1>",
        pattern: &INVESTMENT_RE,
    },
    Section {
        open: "<SECLISTMSGSRSV1><SECLIST>",
        close: "</SECLIST></SECLISTMSGSRSV1>",
        pattern: &SECLIST_RE,
    },
];

/// Combine statement bodies into one SGML document.
///
/// Pure text merge: inputs are expected to be scrubbed already. `now` is
/// used for the synthetic `<DTSERVER>`.
pub fn combine_statements<S: AsRef<str>>(bodies: &[S], now: NaiveDateTime) -> String {
    let flattened: Vec<String> = bodies
        .iter()
        .map(|b| b.as_ref().replace(['\r', '\n'], ""))
        .collect();

    let mut lines = vec!["<OFX>".to_string(), sign_on(now)];
    for section in &SECTIONS {
        let inner: Vec<&str> = flattened
            .iter()
            .flat_map(|body| section.pattern.captures_iter(body))
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if inner.is_empty() {
            continue;
        }
        lines.push(section.open.to_string());
        lines.extend(inner.iter().map(|s| s.to_string()));
        lines.push(section.close.to_string());
    }
    lines.push("</OFX>".to_string());

    let body = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(CRLF);

    format!("{}{body}{CRLF}", sgml_header(SCRUBBED_FILE_UID))
}

/// Read the given statement files, combine them and write the result to
/// `dir` as `combined<random>.ofx`.
#[instrument(skip_all, fields(files = paths.len(), dir = %dir.display()))]
pub fn write_combined(paths: &[PathBuf], dir: &Path) -> Result<PathBuf> {
    if paths.is_empty() {
        return Err(OfxError::config("no statements to combine"));
    }
    let bodies = paths
        .iter()
        .map(|p| std::fs::read_to_string(p).map_err(|e| OfxError::io(p, e)))
        .collect::<Result<Vec<_>>>()?;

    let combined = combine_statements(&bodies, Local::now().naive_local());

    ensure_dir(dir)?;
    let path = dir.join(combined_file_name());
    std::fs::write(&path, combined).map_err(|e| OfxError::io(&path, e))?;
    info!(path = %path.display(), "wrote combined statement");
    Ok(path)
}

fn sign_on(now: NaiveDateTime) -> String {
    format!(
        "<SIGNONMSGSRSV1><SONRS>\
         <STATUS><CODE>0<SEVERITY>INFO<MESSAGE>Successful Sign On</STATUS>\
         <DTSERVER>{}<LANGUAGE>ENG<DTPROFUP>20010101010000\
         <FI><ORG>ofxfetch</FI>\
         </SONRS></SIGNONMSGSRSV1>",
        format_datetime(now)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(9, 30, 45)
            .unwrap()
    }

    fn bank(acct: &str, fitid: &str) -> String {
        format!(
            "OFXHEADER:100\r\nDATA:OFXSGML\r\nNEWFILEUID:OFXFETCH\r\n\r\n\
             <OFX><SIGNONMSGSRSV1><SONRS><STATUS><CODE>0<SEVERITY>INFO</STATUS>\
             <DTSERVER>20230101000000<LANGUAGE>ENG<FI><ORG>SOURCEBANK</FI></SONRS></SIGNONMSGSRSV1>\r\n\
             <BANKMSGSRSV1>\r\n<STMTTRNRS><TRNUID>1<STMTRS><BANKACCTFROM><ACCTID>{acct}</BANKACCTFROM>\r\n\
             <STMTTRN><TRNAMT>-1.00<FITID>{fitid}</STMTTRN>\r\n\
             </STMTRS></STMTTRNRS>\r\n</BANKMSGSRSV1></OFX>"
        )
    }

    #[test]
    fn bank_sections_merge_under_one_wrapper() {
        let out = combine_statements(&[bank("111", "F1"), bank("222", "F2")], now());

        assert_eq!(out.matches("<BANKMSGSRSV1>").count(), 1);
        assert_eq!(out.matches("</BANKMSGSRSV1>").count(), 1);
        assert_eq!(out.matches("<STMTTRNRS>").count(), 2);
        let first = out.find("<ACCTID>111").unwrap();
        let second = out.find("<ACCTID>222").unwrap();
        assert!(first < second);

        assert_eq!(out.matches("<SIGNONMSGSRSV1>").count(), 1);
        assert!(out.contains("<MESSAGE>Successful Sign On"));
        assert!(out.contains("<DTSERVER>20240315093045"));
        assert!(!out.contains("SOURCEBANK"));
        assert!(!out.contains("<CREDITCARDMSGSRSV1>"));
    }

    #[test]
    fn output_has_canonical_header_and_no_blank_lines() {
        let out = combine_statements(&[bank("111", "F1")], now());
        assert!(out.starts_with(&sgml_header(SCRUBBED_FILE_UID)));

        let body = &out[sgml_header(SCRUBBED_FILE_UID).len()..];
        assert!(body.starts_with("<OFX>"));
        assert!(body.trim_end().ends_with("</OFX>"));
        assert!(!body.contains("\r\n\r\n"));
        assert!(!body.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn mixed_kinds_keep_their_sections() {
        let card = "<OFX><CREDITCARDMSGSRSV1><CCSTMTTRNRS><TRNUID>2</CCSTMTTRNRS></CREDITCARDMSGSRSV1></OFX>";
        let invest = "<OFX><INVSTMTMSGSRSV1><INVSTMTTRNRS><TRNUID>3</INVSTMTTRNRS></INVSTMTMSGSRSV1>\
                      <seclistmsgsrsv1><seclist><STOCKINFO><SECNAME>ACME</STOCKINFO></seclist></seclistmsgsrsv1></OFX>";
        let out = combine_statements(&[bank("111", "F1"), card.to_string(), invest.to_string()], now());

        let bank_at = out.find("<BANKMSGSRSV1>").unwrap();
        let card_at = out.find("<CREDITCARDMSGSRSV1>").unwrap();
        let invest_at = out.find("<INVSTMTMSGSRSV1>").unwrap();
        let seclist_at = out.find("<SECLISTMSGSRSV1><SECLIST>").unwrap();
        assert!(bank_at < card_at && card_at < invest_at && invest_at < seclist_at);
        assert!(out.contains("<SECNAME>ACME"));
        assert!(out.contains("</SECLIST></SECLISTMSGSRSV1>"));
    }

    #[test]
    fn write_combined_reads_and_writes_files() {
        let dir = std::env::temp_dir().join(format!("ofxfetch-combine-test-{}", Uuid::now_v7()));
        ensure_dir(&dir).unwrap();
        let a = dir.join("a.ofx");
        let b = dir.join("b.ofx");
        std::fs::write(&a, bank("111", "F1")).unwrap();
        std::fs::write(&b, bank("222", "F2")).unwrap();

        let path = write_combined(&[a, b], &dir).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("combined") && name.ends_with(".ofx"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("<STMTTRNRS>").count(), 2);

        assert!(write_combined(&[], &dir).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
