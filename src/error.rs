//! Error types for openphone-archiver
//!
//! Fatal errors abort an export run and surface as a single terminal message.
//! Per-asset failures are modelled separately by [`AssetError`]; they are
//! logged and reported as events but never abort a run.

use thiserror::Error;

/// Result type alias for openphone-archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for openphone-archiver
#[derive(Debug, Error)]
pub enum Error {
    /// No credential has been observed yet
    #[error("credential not yet available")]
    CredentialUnavailable,

    /// The activity endpoint rejected the credential with 401
    ///
    /// The held credential has already been discarded when this is returned.
    #[error("credential expired")]
    CredentialExpired,

    /// The activity endpoint answered with a non-success status other than 401
    #[error("API request failed with status {status}: {url}")]
    Transport {
        /// HTTP status code returned by the server
        status: u16,
        /// The request URL (without credentials)
        url: String,
    },

    /// No conversation identifier could be resolved from the input
    #[error("could not find a conversation identifier in {0:?}")]
    MissingConversationIdentifier(String),

    /// An activity record could not be interpreted
    #[error("invalid activity {id}: {reason}")]
    InvalidActivity {
        /// Identifier of the offending record (or "<unknown>")
        id: String,
        /// What was wrong with it
        reason: String,
    },

    /// Another export is already running on this archiver
    #[error("an export is already in progress")]
    ExportInProgress,

    /// The run was cancelled
    #[error("export cancelled")]
    Cancelled,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "api.base_url")
        key: Option<String>,
    },

    /// Network error talking to the activity endpoint
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP encoding failed
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Two writes targeted the same archive path
    #[error("duplicate archive entry: {0}")]
    DuplicateEntry(String),
}

impl Error {
    /// The single human-readable message shown to the user when a run fails
    pub fn user_message(&self) -> String {
        match self {
            Error::CredentialUnavailable => "Auth token not yet captured. Interact with the \
                conversation (e.g. open a message) and try again."
                .to_string(),
            Error::CredentialExpired => "Auth token expired. Interact with the conversation \
                to refresh it and try again."
                .to_string(),
            Error::Transport { status, .. } => format!("API request failed: {}", status),
            Error::MissingConversationIdentifier(_) => {
                "Could not find a conversation ID.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Failure of a single media fetch
///
/// Tolerated by the materializer: the file is omitted from the archive.
#[derive(Debug, Error)]
pub enum AssetError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The media server answered with a non-success status
    #[error("media request returned status {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// The run was cancelled before the fetch started
    #[error("cancelled")]
    Cancelled,
}
