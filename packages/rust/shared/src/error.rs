//! Error types for ofxfetch.
//!
//! Library crates use [`OfxError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ofxfetch operations.
///
/// The first three variants map onto the account-level failure classes:
/// a `Config` error never reaches the network, a `Transport` error aborts the
/// attempt ladder, and a `Protocol` error means the institution answered with
/// something unusable (the raw answer is kept on disk when possible).
#[derive(Debug, thiserror::Error)]
pub enum OfxError {
    /// A required site or account field is missing or malformed.
    #[error("config error: {message}")]
    Config { message: String },

    /// Connect failure, timeout, or socket fault during an exchange.
    #[error("transport error: {0}")]
    Transport(String),

    /// The institution's response was rejected by the validator.
    #[error("protocol error: {reason}")]
    Protocol {
        reason: String,
        /// Raw response preserved for diagnosis, if one was written.
        artifact: Option<PathBuf>,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed local input (config values, key table contents).
    #[error("parse error: {message}")]
    Parse { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, OfxError>;

impl OfxError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a protocol error with no preserved artifact.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
            artifact: None,
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the path of a preserved raw response to a protocol error.
    pub fn with_artifact(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::Protocol { reason, .. } => Self::Protocol {
                reason,
                artifact: Some(path.into()),
            },
            other => other,
        }
    }

    /// Whether this failure involved talking to the institution.
    ///
    /// Only these failures count against a (site, user) credential pair.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol { .. })
    }
}
