//! HTTP(S) exchange with an OFX endpoint.
//!
//! Some servers are picky about request headers, so a request is sent up to
//! three ways in a fixed order until a reply validates:
//!
//! 1. a bare `application/x-ofx` POST with explicit `Host`/`Content-Length`
//! 2. the same plus `User-Agent` and any cookie the first reply set
//! 3. a legacy POST using plain content negotiation
//!
//! The ladder only routes around header sensitivity. A connect failure,
//! timeout or socket error ends the exchange at once.

mod validate;

use std::sync::LazyLock;
use std::time::Duration;

use ofxfetch_shared::ofx::sgml_header;
use ofxfetch_shared::{Attempt, OfxError, RawResponse, Result, Site};
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use tracing::{debug, info, instrument, warn};

pub use validate::{
    ACCESS_DENIED, ERROR_CONDITION, INVALID_STATEMENT, MISSING_SECLIST, NO_STATEMENT, Validation,
    validate,
};

/// Default connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout between reads, in seconds.
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Default deadline for a whole attempt, in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// User-Agent sent on the second attempt.
pub const USER_AGENT: &str = concat!("ofxfetch/", env!("CARGO_PKG_VERSION"));

const OFX_CONTENT_TYPE: &str = "application/x-ofx";

/// XML declaration and processing instructions (`<?xml ...?>`, `<?OFX ...?>`).
static XML_PI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<\?.*?\?>").expect("valid regex"));

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Timeouts applied to every attempt.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    /// Longest wait for the next chunk of a reply.
    pub read_timeout: Duration,
    /// Deadline from sending the request to the last byte of the reply.
    pub request_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// The response an exchange settled on and how it validated.
///
/// This is the first response that validated, or the last one received if
/// none did.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub response: RawResponse,
    pub validation: Validation,
}

impl Exchange {
    pub fn is_valid(&self) -> bool {
        self.validation.is_valid()
    }
}

/// Reusable OFX HTTP client.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
}

impl Transport {
    pub fn new(opts: &TransportOptions) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(opts.connect_timeout)
            .read_timeout(opts.read_timeout)
            .timeout(opts.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OfxError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// POST `payload` to the site's endpoint, walking the attempt ladder.
    ///
    /// Returns `Err(OfxError::Transport)` only for network-level faults; a
    /// reply that never validates is returned as an [`Exchange`] whose
    /// validation carries the reason.
    #[instrument(skip_all, fields(site = %site.name, host = %site.host()))]
    pub async fn exchange(&self, site: &Site, payload: &str) -> Result<Exchange> {
        let mut cookie: Option<String> = None;
        let mut last: Option<Exchange> = None;

        for attempt in Attempt::LADDER {
            let response = self.send(site, payload, attempt, cookie.as_deref()).await?;
            let status = response.status();

            if attempt == Attempt::Plain {
                cookie = session_cookie(response.headers());
            }

            let bytes = response.bytes().await.map_err(|e| {
                OfxError::Transport(format!("{}: failed to read response: {e}", site.url))
            })?;
            let mut body = String::from_utf8_lossy(&bytes).into_owned();
            if is_xml_framed(&body) {
                body = to_sgml_framing(&body);
            }

            let validation = validate(&body);
            debug!(%attempt, %status, bytes = bytes.len(), ?validation, "attempt finished");

            let exchange = Exchange {
                response: RawResponse {
                    body,
                    attempt,
                    cookie: cookie.clone(),
                },
                validation,
            };
            if exchange.is_valid() {
                info!(%attempt, "received valid OFX response");
                return Ok(exchange);
            }
            last = Some(exchange);
        }

        let exchange = last.ok_or_else(|| OfxError::Transport("no attempt was made".into()))?;
        warn!(
            reason = exchange.validation.reason().unwrap_or_default(),
            "no attempt produced a valid OFX response"
        );
        Ok(exchange)
    }

    async fn send(
        &self,
        site: &Site,
        payload: &str,
        attempt: Attempt,
        cookie: Option<&str>,
    ) -> Result<Response> {
        let headers = attempt_headers(site, payload, attempt, cookie)?;
        self.client
            .post(site.url.clone())
            .headers(headers)
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| OfxError::Transport(format!("{} (attempt {attempt}): {e}", site.url)))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn attempt_headers(
    site: &Site,
    payload: &str,
    attempt: Attempt,
    cookie: Option<&str>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OFX_CONTENT_TYPE));

    match attempt {
        Attempt::Plain | Attempt::WithAgent => {
            headers.insert(header::HOST, header_value(&site.host())?);
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(payload.len()));
            headers.insert(header::CONNECTION, HeaderValue::from_static("Keep-Alive"));
            if attempt == Attempt::WithAgent {
                headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
                if let Some(cookie) = cookie {
                    headers.insert(header::COOKIE, header_value(cookie)?);
                }
            }
        }
        Attempt::Legacy => {
            headers.insert(header::ACCEPT, HeaderValue::from_static(OFX_CONTENT_TYPE));
        }
    }
    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| OfxError::Transport(format!("invalid header value '{value}': {e}")))
}

/// Collect `name=value` pairs from every `Set-Cookie` header.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    (!pairs.is_empty()).then(|| pairs.join("; "))
}

/// Whether a reply opens with an XML declaration or `<?OFX ...?>` header.
pub fn is_xml_framed(body: &str) -> bool {
    body.trim_start().starts_with("<?")
}

/// Replace XML framing with the canonical SGML header.
pub fn to_sgml_framing(body: &str) -> String {
    let stripped = XML_PI_RE.replace_all(body, "");
    format!("{}{}", sgml_header("NONE"), stripped.trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofxfetch_shared::{Capability, ProtocolVersion};
    use url::Url;
    use wiremock::matchers::{header as has_header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID: &str = "OFXHEADER:100\r\nDATA:OFXSGML\r\n\r\n<OFX>\r\n<SIGNONMSGSRSV1><SONRS>\
        <STATUS><CODE>0<SEVERITY>INFO</STATUS></SONRS></SIGNONMSGSRSV1>\r\n</OFX>";

    fn site(url: &str, version: &str) -> Site {
        Site {
            name: "Mock Bank".into(),
            url: Url::parse(url).unwrap(),
            fi_org: "MOCK".into(),
            fid: "999".into(),
            bank_id: Some("123456789".into()),
            broker_id: None,
            version: ProtocolVersion::parse(version).unwrap(),
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

    fn transport() -> Transport {
        Transport::new(&TransportOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn first_attempt_succeeds_with_bare_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ofx"))
            .and(has_header("content-type", "application/x-ofx"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID))
            .mount(&server)
            .await;

        let s = site(&format!("{}/ofx", server.uri()), "102");
        let exchange = transport().exchange(&s, "REQUEST").await.unwrap();

        assert!(exchange.is_valid());
        assert_eq!(exchange.response.attempt, Attempt::Plain);
        assert_eq!(exchange.response.body, VALID);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert!(req.headers.get("user-agent").is_none());
        assert!(req.headers.get("cookie").is_none());
        assert_eq!(req.headers.get("content-length").unwrap(), "7");
        assert_eq!(req.body, b"REQUEST");
    }

    #[tokio::test]
    async fn second_attempt_forwards_cookie_and_agent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(has_header("user-agent", USER_AGENT))
            .and(has_header("cookie", "SESSION=abc123; LB=7"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "SESSION=abc123; Path=/; Secure")
                    .append_header("set-cookie", "LB=7")
                    .set_body_string("<html>please retry</html>"),
            )
            .mount(&server)
            .await;

        let s = site(&server.uri(), "102");
        let exchange = transport().exchange(&s, "REQUEST").await.unwrap();

        assert!(exchange.is_valid());
        assert_eq!(exchange.response.attempt, Attempt::WithAgent);
        assert_eq!(exchange.response.cookie.as_deref(), Some("SESSION=abc123; LB=7"));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn legacy_fallback_is_last_resort() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(has_header("accept", "application/x-ofx"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(""))
            .mount(&server)
            .await;

        let s = site(&server.uri(), "102");
        let exchange = transport().exchange(&s, "REQUEST").await.unwrap();

        assert!(exchange.is_valid());
        assert_eq!(exchange.response.attempt, Attempt::Legacy);
        assert_eq!(exchange.response.cookie, None);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].headers.get("user-agent").is_none());
    }

    #[tokio::test]
    async fn exhausted_ladder_returns_last_failure() {
        let server = MockServer::start().await;
        let error_reply = VALID.replace("<SEVERITY>INFO", "<SEVERITY>ERROR");
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(error_reply.clone()))
            .expect(3)
            .mount(&server)
            .await;

        let s = site(&server.uri(), "102");
        let exchange = transport().exchange(&s, "REQUEST").await.unwrap();

        assert!(!exchange.is_valid());
        assert_eq!(exchange.response.attempt, Attempt::Legacy);
        assert_eq!(exchange.response.body, error_reply);
        assert_eq!(exchange.validation.reason(), Some(ERROR_CONDITION));
    }

    #[tokio::test]
    async fn xml_reply_gets_sgml_header() {
        let server = MockServer::start().await;
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n\
            <?OFX OFXHEADER=\"200\" VERSION=\"220\" SECURITY=\"NONE\" OLDFILEUID=\"NONE\" NEWFILEUID=\"NONE\"?>\n\
            <OFX><SIGNONMSGSRSV1><SONRS><STATUS><CODE>0</CODE><SEVERITY>INFO</SEVERITY></STATUS>\
            </SONRS></SIGNONMSGSRSV1></OFX>";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(xml))
            .mount(&server)
            .await;

        let s = site(&server.uri(), "220");
        let exchange = transport().exchange(&s, "<?xml?>REQUEST").await.unwrap();

        assert!(exchange.is_valid());
        let body = &exchange.response.body;
        assert!(body.starts_with("OFXHEADER:100\r\nDATA:OFXSGML\r\n"));
        assert!(body.contains("NEWFILEUID:NONE\r\n\r\n<OFX><SIGNONMSGSRSV1>"));
        assert!(!body.contains("<?"));
    }

    #[tokio::test]
    async fn empty_reply_from_xml_site_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let s = site(&server.uri(), "220");
        let exchange = transport().exchange(&s, "<?xml?>REQUEST").await.unwrap();

        assert!(!exchange.is_valid());
        assert_eq!(exchange.validation.reason(), Some(NO_STATEMENT));
        assert!(exchange.response.body.is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn html_error_page_from_xml_site_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_string("<html><body>Service Unavailable</body></html>"),
            )
            .mount(&server)
            .await;

        let s = site(&server.uri(), "220");
        let exchange = transport().exchange(&s, "<?xml?>REQUEST").await.unwrap();

        assert!(!exchange.is_valid());
        assert_eq!(exchange.validation.reason(), Some(INVALID_STATEMENT));
        assert!(!exchange.response.body.starts_with("OFXHEADER:"));
    }

    #[tokio::test]
    async fn slow_reply_times_out_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let opts = TransportOptions {
            read_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(200),
            ..TransportOptions::default()
        };
        let s = site(&server.uri(), "102");
        let err = Transport::new(&opts)
            .unwrap()
            .exchange(&s, "REQUEST")
            .await
            .unwrap_err();

        assert!(matches!(err, OfxError::Transport(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[test]
    fn xml_framing_is_detected_from_the_body() {
        assert!(is_xml_framed("\r\n<?xml version=\"1.0\"?><OFX>"));
        assert!(is_xml_framed("<?OFX OFXHEADER=\"200\"?>"));
        assert!(!is_xml_framed(""));
        assert!(!is_xml_framed("<html><body>down</body></html>"));
        assert!(!is_xml_framed(VALID));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let s = site("http://127.0.0.1:1/ofx", "102");
        let err = transport().exchange(&s, "REQUEST").await.unwrap_err();
        assert!(matches!(err, OfxError::Transport(_)));
    }

    #[test]
    fn session_cookie_ignores_attributes() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_cookie(&headers), None);
        headers.append(header::SET_COOKIE, HeaderValue::from_static("A=1; HttpOnly"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("B=2"));
        assert_eq!(session_cookie(&headers).as_deref(), Some("A=1; B=2"));
    }
}
