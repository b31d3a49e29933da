//! Error types for the webwx-sync crate.
//!
//! Errors are grouped into the categories the session loop cares about:
//! transient transport failures, protocol mismatches (the upstream API
//! changed), fatal session invalidation, and the user-action timeout of the
//! QR handshake. See [`Error::category`] and [`Error::is_retryable`].

use crate::transport::redact_url;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while logging in or syncing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// A notification recipient is not a valid email address.
    #[error("invalid notification recipient: {address}")]
    InvalidRecipient {
        /// The rejected address.
        address: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    BuildClient {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Transport errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// The request could not be sent or its body could not be read.
    #[error("request to {url} failed")]
    Request {
        /// The request URL.
        url: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success HTTP status.
    #[error("HTTP status {status} from {url}")]
    HttpStatus {
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The request did not complete in time.
    #[error("request to {url} timed out after {timeout:?}")]
    RequestTimeout {
        /// The request URL.
        url: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Protocol mismatch (NOT retryable - the upstream API changed)
    // ─────────────────────────────────────────────────────────────────────────
    /// The response does not carry the expected literal or field.
    #[error("unexpected response from {endpoint}: {detail}")]
    ProtocolMismatch {
        /// The logical endpoint name.
        endpoint: &'static str,
        /// What was missing or malformed.
        detail: String,
    },

    /// The JSON response does not match the expected schema.
    #[error("failed to decode {endpoint} response")]
    Decode {
        /// The logical endpoint name.
        endpoint: &'static str,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The server answered with a status other than the one the protocol requires.
    #[error("expected HTTP {expected} from {url}, got {actual}")]
    UnexpectedStatus {
        /// The request URL.
        url: String,
        /// The status the protocol requires.
        expected: u16,
        /// The status actually received.
        actual: u16,
    },

    /// A JSON endpoint answered with a nonzero `BaseResponse.Ret`.
    #[error("{endpoint} rejected the request: Ret={ret} {message}")]
    ServerRejected {
        /// The logical endpoint name.
        endpoint: &'static str,
        /// The returned code.
        ret: i64,
        /// The returned error message, possibly empty.
        message: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Session errors (FATAL)
    // ─────────────────────────────────────────────────────────────────────────
    /// The long-poll reported a nonzero return code (logged out, or logged in elsewhere).
    #[error("session invalidated by {host}: retcode={retcode} selector={selector}")]
    SessionInvalid {
        /// The push host that reported the code.
        host: String,
        /// The returned code.
        retcode: String,
        /// The returned selector.
        selector: String,
    },

    /// The bootstrap step returned credentials with a nonzero `ret`.
    #[error("login rejected: ret={ret} {message}")]
    LoginRejected {
        /// The returned code.
        ret: String,
        /// The returned message, possibly empty.
        message: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // User-action timeout (recoverable by issuing a new QR code)
    // ─────────────────────────────────────────────────────────────────────────
    /// The QR code was not scanned and confirmed in time.
    #[error("QR code not confirmed after {attempts} status checks")]
    ScanTimeout {
        /// Number of status checks performed.
        attempts: u32,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Degradation (never terminates the session)
    // ─────────────────────────────────────────────────────────────────────────
    /// The contact directory could not be fetched.
    #[error("contact directory unavailable")]
    DirectoryUnavailable {
        /// Why the fetch failed.
        #[source]
        source: Box<Error>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Delivery errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A delivery collaborator failed.
    #[error("delivery via {channel} failed: {message}")]
    Delivery {
        /// The delivery channel description.
        channel: String,
        /// Why delivery failed.
        message: String,
    },

    /// No contact carries the requested display name.
    #[error("no contact named '{name}'")]
    ContactNotFound {
        /// The requested display name.
        name: String,
    },

    /// Several contacts carry the requested display name.
    #[error("{matches} contacts are named '{name}'")]
    AmbiguousContact {
        /// The requested display name.
        name: String,
        /// How many contacts matched.
        matches: usize,
    },
}

impl Error {
    /// Strips query strings from any request URL this error carries.
    ///
    /// See [`redact_url`].
    #[must_use]
    pub fn redacted(self) -> Self {
        match self {
            Error::Request { url, source } => Error::Request {
                url: redact_url(&url),
                source: source.without_url(),
            },
            Error::HttpStatus { url, status } => Error::HttpStatus {
                url: redact_url(&url),
                status,
            },
            Error::RequestTimeout { url, timeout } => Error::RequestTimeout {
                url: redact_url(&url),
                timeout,
            },
            Error::UnexpectedStatus {
                url,
                expected,
                actual,
            } => Error::UnexpectedStatus {
                url: redact_url(&url),
                expected,
                actual,
            },
            other => other,
        }
    }

    /// Returns `true` if this error represents a transient failure that might
    /// succeed on the next host or the next loop iteration.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Request { .. }
            | Error::HttpStatus { .. }
            | Error::RequestTimeout { .. }
            | Error::DirectoryUnavailable { .. }
            | Error::Delivery { .. } => true,

            Error::InvalidConfig { .. }
            | Error::InvalidRecipient { .. }
            | Error::BuildClient { .. }
            | Error::ProtocolMismatch { .. }
            | Error::Decode { .. }
            | Error::UnexpectedStatus { .. }
            | Error::ServerRejected { .. }
            | Error::SessionInvalid { .. }
            | Error::LoginRejected { .. }
            | Error::ScanTimeout { .. }
            | Error::ContactNotFound { .. }
            | Error::AmbiguousContact { .. } => false,
        }
    }

    /// Returns `true` if the session can no longer be used and a new login is required.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Session
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig { .. }
            | Error::InvalidRecipient { .. }
            | Error::BuildClient { .. } => ErrorCategory::Configuration,

            Error::Request { .. } | Error::HttpStatus { .. } | Error::RequestTimeout { .. } => {
                ErrorCategory::Transport
            }

            Error::ProtocolMismatch { .. }
            | Error::Decode { .. }
            | Error::UnexpectedStatus { .. }
            | Error::ServerRejected { .. } => ErrorCategory::Protocol,

            Error::SessionInvalid { .. } | Error::LoginRejected { .. } => ErrorCategory::Session,

            Error::ScanTimeout { .. } => ErrorCategory::UserTimeout,

            Error::DirectoryUnavailable { .. } => ErrorCategory::Degraded,

            Error::Delivery { .. }
            | Error::ContactNotFound { .. }
            | Error::AmbiguousContact { .. } => ErrorCategory::Delivery,
        }
    }
}

/// Error categories for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network or HTTP-status failures.
    Transport,
    /// Response shape deviates from the expected literal or schema.
    Protocol,
    /// The session was invalidated by the server.
    Session,
    /// The user did not complete the QR scan in time.
    UserTimeout,
    /// Non-fatal degradation.
    Degraded,
    /// Notification delivery failures.
    Delivery,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::UserTimeout => write!(f, "user_timeout"),
            ErrorCategory::Degraded => write!(f, "degraded"),
            ErrorCategory::Delivery => write!(f, "delivery"),
        }
    }
}
