//! Response classification.
//!
//! Inspection is read-only and case-insensitive. Markers are searched for in
//! an upper-cased copy with all whitespace removed, so `<SEVERITY> ERROR` and
//! pretty-printed XML are caught the same way as compact SGML.

use ofxfetch_shared::OfxError;

pub const NO_STATEMENT: &str = "No (null) statement received";
pub const INVALID_STATEMENT: &str = "Invalid OFX statement received";
pub const ERROR_CONDITION: &str = "OFX message contains ERROR condition";
pub const ACCESS_DENIED: &str = "Access denied";
pub const MISSING_SECLIST: &str = "OFX statement is missing required <SECLIST> section";

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Looks like a usable OFX statement.
    Valid,
    /// Not an OFX statement, or one the downstream app cannot load.
    Invalid { reason: String },
    /// A well-formed OFX reply reporting a server-side failure.
    ServerError { reason: String },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid { reason } | Self::ServerError { reason } => Some(reason),
        }
    }

    /// Convert a failed validation into a protocol error.
    pub fn into_error(self) -> Option<OfxError> {
        self.reason().map(OfxError::protocol)
    }

    fn invalid(reason: &str) -> Self {
        Self::Invalid {
            reason: reason.to_string(),
        }
    }

    fn server_error(reason: &str) -> Self {
        Self::ServerError {
            reason: reason.to_string(),
        }
    }
}

/// Classify a response body.
pub fn validate(body: &str) -> Validation {
    let compact: String = body
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    if compact.is_empty() {
        return Validation::invalid(NO_STATEMENT);
    }

    let framed = ["OFXHEADER:", "<OFX>", "</OFX>"]
        .iter()
        .any(|marker| compact.contains(marker));
    if !framed {
        return Validation::invalid(INVALID_STATEMENT);
    }

    // Positions without a securities list crash the downstream importer.
    if compact.contains("<INVPOS>") && !compact.contains("<SECLIST>") {
        return Validation::invalid(MISSING_SECLIST);
    }

    if compact.contains("<SEVERITY>ERROR") {
        return Validation::server_error(ERROR_CONDITION);
    }

    if compact.contains("ACCESSDENIED") {
        return Validation::server_error(ACCESS_DENIED);
    }

    Validation::Valid
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "OFXHEADER:100\r\nDATA:OFXSGML\r\n\r\n<OFX>\r\n<SIGNONMSGSRSV1><SONRS>\
        <STATUS><CODE>0<SEVERITY>INFO</STATUS></SONRS></SIGNONMSGSRSV1>\r\n</OFX>";

    #[test]
    fn empty_and_garbage() {
        assert_eq!(validate(""), Validation::invalid(NO_STATEMENT));
        assert_eq!(validate("  \r\n\t"), Validation::invalid(NO_STATEMENT));
        assert_eq!(validate("garbage"), Validation::invalid(INVALID_STATEMENT));
        assert_eq!(
            validate("<html><body>Service Unavailable</body></html>"),
            Validation::invalid(INVALID_STATEMENT)
        );
    }

    #[test]
    fn valid_statement() {
        assert!(validate(GOOD).is_valid());
        assert!(validate(&GOOD.to_lowercase()).is_valid());
        assert_eq!(validate(GOOD).reason(), None);
    }

    #[test]
    fn severity_error_is_server_error() {
        let body = GOOD.replace("<SEVERITY>INFO", "<SEVERITY>ERROR<MESSAGE>Bad request");
        assert_eq!(validate(&body), Validation::server_error(ERROR_CONDITION));

        let spaced = GOOD.replace("<SEVERITY>INFO", "<severity> error");
        assert!(matches!(validate(&spaced), Validation::ServerError { .. }));
    }

    #[test]
    fn access_denied_matches_across_whitespace() {
        let body = GOOD.replace("<CODE>0", "<CODE>15500<MESSAGE>ACCESS DENIED");
        assert_eq!(validate(&body), Validation::server_error(ACCESS_DENIED));
    }

    #[test]
    fn positions_without_seclist_rejected_regardless() {
        let body = GOOD.replace("</OFX>", "<INVPOSLIST><INVPOS><UNITS>10</INVPOS></INVPOSLIST></OFX>");
        assert_eq!(validate(&body), Validation::invalid(MISSING_SECLIST));

        // Even when a server-error marker is also present.
        let both = body.replace("<SEVERITY>INFO", "<SEVERITY>ERROR");
        assert_eq!(validate(&both), Validation::invalid(MISSING_SECLIST));

        let paired = body.replace("</OFX>", "<SECLISTMSGSRSV1><SECLIST></SECLIST></SECLISTMSGSRSV1></OFX>");
        assert!(validate(&paired).is_valid());
    }

    #[test]
    fn failure_converts_to_protocol_error() {
        let err = validate("garbage").into_error().unwrap();
        assert!(matches!(err, OfxError::Protocol { .. }));
        assert!(validate(GOOD).into_error().is_none());
    }
}
