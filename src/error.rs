use thiserror::Error;

/// Type alias for Result with EwsError
pub type Result<T> = std::result::Result<T, EwsError>;

/// Error types for the retention tag sweeper
#[derive(Error, Debug)]
pub enum EwsError {
    /// Session establishment failed (endpoint unreachable, bad credentials)
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Autodiscovery could not resolve an EWS endpoint for the mailbox
    #[error("Autodiscover failed: {0}")]
    Autodiscover(String),

    /// Transport-level failure (page fetch, folder bind, path resolution)
    #[error("Transport error: {0}")]
    Transport(String),

    /// EWS reported an error response for an otherwise successful call
    #[error("EWS error {code}: {message}")]
    Soap { code: String, message: String },

    /// Response payload could not be parsed
    #[error("Malformed EWS response: {0}")]
    Xml(String),

    /// An in-memory tag clear could not be staged; non-fatal per tag slot
    #[error("Failed to stage tag removal on folder {folder_id}: {message}")]
    TagMutation { folder_id: String, message: String },

    /// UpdateFolder failed after tag clears were staged. The folder may hold
    /// cleared tag fields client-side that were never saved, so this always
    /// escalates to a failed run.
    #[error("Failed to persist folder {folder_id} (path: {path}): {message}")]
    Persist {
        folder_id: String,
        path: String,
        message: String,
    },

    /// Missing or invalid command-line usage (e.g. no mailbox given)
    #[error("{0}")]
    Usage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (config file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EwsError {
    /// Whether this error aborts the whole run. Only tag-slot staging
    /// failures are swallowed locally; everything else surfaces.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EwsError::TagMutation { .. })
    }

    /// Process exit code observed by callers: 1 for usage errors, 2 for
    /// connection, enumeration, path-resolution and persist failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            EwsError::Usage(_) => 1,
            _ => 2,
        }
    }
}

impl From<reqwest::Error> for EwsError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            EwsError::Connection(error.to_string())
        } else {
            EwsError::Transport(error.to_string())
        }
    }
}

impl From<quick_xml::Error> for EwsError {
    fn from(error: quick_xml::Error) -> Self {
        EwsError::Xml(error.to_string())
    }
}

/// Map a non-success HTTP status from the EWS endpoint to an error
pub fn status_error(status: reqwest::StatusCode) -> EwsError {
    match status.as_u16() {
        401 | 403 => EwsError::Connection(format!(
            "endpoint rejected credentials (HTTP {})",
            status.as_u16()
        )),
        code => EwsError::Transport(format!(
            "HTTP {}: {}",
            code,
            status.canonical_reason().unwrap_or("Unknown")
        )),
    }
}
