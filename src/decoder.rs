//! Decoding of the non-JSON responses.
//!
//! The login and long-poll endpoints answer with JavaScript assignments
//! (`window.QRLogin.uuid = "..."`, `window.synccheck={retcode:"0",selector:"2"}`)
//! or a small XML document. The [`ResultDecoder`] trait isolates that parsing
//! so the strategy can change without touching the login or poll logic.
//!
//! # Example
//!
//! ```
//! use webwx_sync::decoder::{LiteralDecoder, ResultDecoder};
//!
//! let decoder = LiteralDecoder::new();
//! let result = decoder
//!     .poll_result(r#"window.synccheck={retcode:"0",selector:"2"}"#)
//!     .unwrap();
//! assert_eq!(result.selector, "2");
//! ```

use crate::error::{Error, Result};
use crate::model::{LoginInfo, PollResult};
use regex::Regex;
use std::sync::LazyLock;

/// Extracts protocol values from response bodies.
pub trait ResultDecoder: Send + Sync + std::fmt::Debug {
    /// Extracts the login UUID from the issuance page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolMismatch`] if the assignment is absent.
    fn uuid(&self, body: &str) -> Result<String>;

    /// Extracts the redirect URI from the scan-status page, if the scan was confirmed.
    fn redirect_uri(&self, body: &str) -> Option<String>;

    /// Extracts the scan status code (`201` scanned, `408` waiting), if present.
    fn scan_code(&self, body: &str) -> Option<String>;

    /// Extracts the long-poll result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolMismatch`] if either field is missing.
    fn poll_result(&self, body: &str) -> Result<PollResult>;

    /// Extracts the bootstrap result and credentials.
    ///
    /// Absent credential tags decode as empty strings; a rejected login
    /// carries none. The login flow requires all of them when `ret` is `0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolMismatch`] if the `<ret>` tag is missing.
    fn login_info(&self, body: &str) -> Result<LoginInfo>;

    /// Human-readable description used in logs.
    fn description(&self) -> &str;
}

/// A single-capture regex.
///
/// ```
/// use webwx_sync::decoder::Pattern;
///
/// let pattern = Pattern::new(r#"code:\s*(\d+)"#).unwrap();
/// assert_eq!(pattern.capture("code: 42"), Some("42"));
/// ```
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    /// Compiles a pattern. The first capture group is the extracted value.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn new(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    /// Returns the first capture group of the first match.
    #[must_use]
    pub fn capture<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

fn literal(pattern: &str) -> Pattern {
    Pattern::new(pattern).expect("valid regex")
}

static UUID: LazyLock<Pattern> = LazyLock::new(|| literal(r#"window\.QRLogin\.uuid\s*=\s*"([^"]+)""#));
static REDIRECT: LazyLock<Pattern> = LazyLock::new(|| literal(r#"window\.redirect_uri\s*=\s*"([^"]+)""#));
static SCAN_CODE: LazyLock<Pattern> = LazyLock::new(|| literal(r"window\.code\s*=\s*(\d+)"));
static RETCODE: LazyLock<Pattern> = LazyLock::new(|| literal(r#"retcode\s*:\s*"(\d+)""#));
static SELECTOR: LazyLock<Pattern> = LazyLock::new(|| literal(r#"selector\s*:\s*"(\d+)""#));

/// Extracts `<tag>value</tag>` from the bootstrap XML.
fn xml_field<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let len = body[start..].find(&close)?;
    Some(&body[start..start + len])
}

/// The default decoder: regex matches over the embedded literals.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralDecoder;

impl LiteralDecoder {
    /// Creates the decoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ResultDecoder for LiteralDecoder {
    fn uuid(&self, body: &str) -> Result<String> {
        UUID.capture(body)
            .map(str::to_string)
            .ok_or_else(|| Error::ProtocolMismatch {
                endpoint: "jslogin",
                detail: format!("no uuid assignment in {}", excerpt(body)),
            })
    }

    fn redirect_uri(&self, body: &str) -> Option<String> {
        REDIRECT.capture(body).map(str::to_string)
    }

    fn scan_code(&self, body: &str) -> Option<String> {
        SCAN_CODE.capture(body).map(str::to_string)
    }

    fn poll_result(&self, body: &str) -> Result<PollResult> {
        let missing = |field: &str| Error::ProtocolMismatch {
            endpoint: "synccheck",
            detail: format!("no {field} in {}", excerpt(body)),
        };
        let retcode = RETCODE.capture(body).ok_or_else(|| missing("retcode"))?;
        let selector = SELECTOR.capture(body).ok_or_else(|| missing("selector"))?;
        Ok(PollResult {
            retcode: retcode.to_string(),
            selector: selector.to_string(),
        })
    }

    fn login_info(&self, body: &str) -> Result<LoginInfo> {
        let ret = xml_field(body, "ret").ok_or_else(|| Error::ProtocolMismatch {
            endpoint: "webwxnewloginpage",
            detail: format!("no <ret> in {} byte response", body.len()),
        })?;
        let field = |tag: &str| xml_field(body, tag).map(str::to_string).unwrap_or_default();

        Ok(LoginInfo {
            ret: ret.to_string(),
            message: field("message"),
            skey: field("skey"),
            wxsid: field("wxsid"),
            wxuin: field("wxuin"),
            pass_ticket: field("pass_ticket"),
            isgrayscale: field("isgrayscale"),
        })
    }

    fn description(&self) -> &str {
        "embedded literal decoder"
    }
}

/// First 200 characters of a body, for error messages.
pub(crate) fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
