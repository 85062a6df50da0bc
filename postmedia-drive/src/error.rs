use thiserror::Error;

/// Result type for remote store operations
pub type DriveResult<T> = Result<T, DriveError>;

/// Errors that can occur while talking to the remote object store
#[derive(Error, Debug)]
pub enum DriveError {
    /// The store answered with a non-2xx status
    #[error("Remote store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },

    #[error("Malformed response: {source}")]
    Decode {
        #[from]
        source: serde_json::Error,
    },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl DriveError {
    /// Create a status error
    pub fn status<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// HTTP status code, when the failure came from a response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { source } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the store rejected the credential (401/403)
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status_code(), Some(401) | Some(403))
    }

    /// Message suitable for showing to a user
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
