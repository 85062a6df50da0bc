use thiserror::Error;

use postmedia_drive::DriveError;

/// Result type for pipeline setup
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised while assembling the pipeline.
///
/// Upload and load operations never return these: their failures are
/// reported through [`WorkflowOutcome`](crate::WorkflowOutcome) and
/// [`LoadObserver`](crate::LoadObserver).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration for {key}: {message}")]
    Config { key: String, message: String },

    #[error("Remote store error: {source}")]
    Drive {
        #[from]
        source: DriveError,
    },
}

impl PipelineError {
    /// Create a configuration error
    pub fn config<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Why a media item could not be displayed
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("credential required")]
    CredentialRequired,

    #[error("download failed: {}", .source.user_message())]
    Download {
        #[from]
        source: DriveError,
    },
}

impl LoadError {
    /// Whether signing in again could fix this
    pub fn needs_reauth(&self) -> bool {
        match self {
            Self::CredentialRequired => true,
            Self::Download { source } => source.is_auth_failure(),
        }
    }
}
