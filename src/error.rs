//! Error taxonomy shared by the credential store, authorization broker and
//! resource gateway.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The provider redirected back without a `code` query parameter
    #[error("authorization code missing from callback")]
    MissingAuthorizationCode,

    /// The callback `state` does not match the pending authorization request
    #[error("authorization state mismatch")]
    StateMismatch,

    /// Token exchange failed (invalid/expired code, network or provider error)
    #[error("authorization code exchange failed: {0}")]
    AuthExchange(String),

    /// The persisted credential exists but is not a well-formed record
    #[error("stored credential is corrupt: {0}")]
    StoreCorrupt(String),

    /// The credential could not be persisted
    #[error("failed to persist credential: {0}")]
    StoreWrite(String),

    /// No credential is installed in the session
    #[error("not authenticated - visit /auth to authorize access")]
    Unauthenticated,

    /// The provider does not know the requested file
    #[error("file not found: {file_id}")]
    NotFound { file_id: String },

    /// Any other failure reported by (or while talking to) the storage provider
    #[error("{}", provider_error_text(.status, .message))]
    Provider {
        status: Option<u16>,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Writing downloaded bytes to the caller's sink failed
    #[error("output sink failed: {0}")]
    Sink(#[from] std::io::Error),
}

fn provider_error_text(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("provider error (status {}): {}", code, message),
        None => format!("provider error: {}", message),
    }
}

impl Error {
    pub(crate) fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::Provider {
            status,
            message: message.into(),
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingAuthorizationCode => "missing_code",
            Error::StateMismatch => "state_mismatch",
            Error::AuthExchange(_) => "exchange_failed",
            Error::StoreCorrupt(_) => "store_corrupt",
            Error::StoreWrite(_) => "store_write",
            Error::Unauthenticated => "unauthenticated",
            Error::NotFound { .. } => "not_found",
            Error::Provider { .. } => "provider_error",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Sink(_) => "sink",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::provider(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
