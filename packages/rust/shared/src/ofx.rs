//! Small OFX text helpers shared by every stage.
//!
//! Nothing here parses OFX; these are the handful of string conventions
//! (header block, timestamps, element values, signed amounts) that request
//! building, validation, scrubbing and combining all agree on.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

/// `NEWFILEUID` value stamped on statements that have been scrubbed.
pub const SCRUBBED_FILE_UID: &str = "OFXFETCH";

/// Line terminator used for everything we emit.
pub const CRLF: &str = "\r\n";

/// The canonical OFX 1.x SGML header block, followed by a blank line.
pub fn sgml_header(new_file_uid: &str) -> String {
    [
        "OFXHEADER:100",
        "DATA:OFXSGML",
        "VERSION:102",
        "SECURITY:TYPE1",
        "ENCODING:USASCII",
        "CHARSET:1252",
        "COMPRESSION:NONE",
        "OLDFILEUID:NONE",
        &format!("NEWFILEUID:{new_file_uid}"),
        "",
        "",
    ]
    .join(CRLF)
}

/// `YYYYMMDDHHMMSS`
pub fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format("%Y%m%d%H%M%S").to_string()
}

/// `YYYYMMDD`
pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y%m%d").to_string()
}

/// All values of an SGML element (`<TAG>value`), trimmed, in document order.
///
/// Tag matching is case-insensitive.
pub fn element_values(text: &str, tag: &str) -> Vec<String> {
    let Ok(re) = Regex::new(&format!(r"(?i)<{}>([^<]*)", regex::escape(tag))) else {
        return Vec::new();
    };
    re.captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// First value of an SGML element, if present and non-empty.
pub fn element_value(text: &str, tag: &str) -> Option<String> {
    element_values(text, tag).into_iter().next()
}

/// Parse an OFX amount, tolerating whitespace and a comma decimal separator.
pub fn parse_amount(value: &str) -> Option<f64> {
    let v = value.trim();
    v.parse::<f64>()
        .ok()
        .or_else(|| v.replace(',', ".").parse::<f64>().ok())
        .filter(|f| f.is_finite())
}

/// Negate an amount textually, preserving its formatting.
///
/// `-5` becomes `5`, `120.00` becomes `-120.00`, `+3` becomes `-3`.
pub fn negate(value: &str) -> String {
    let v = value.trim();
    if let Some(rest) = v.strip_prefix('-') {
        rest.to_string()
    } else if let Some(rest) = v.strip_prefix('+') {
        format!("-{rest}")
    } else {
        format!("-{v}")
    }
}
