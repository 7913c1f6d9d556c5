//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] clusterprobe_common::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },

    /// The cluster behaved differently from what the scenario asserts
    #[error("scenario failed: {message}")]
    ScenarioFailed { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    pub fn scenario_failed(message: impl Into<String>) -> Self {
        Error::ScenarioFailed {
            message: message.into(),
        }
    }
}

impl From<clusterprobe_common::poll::WaitError> for Error {
    fn from(e: clusterprobe_common::poll::WaitError) -> Self {
        Error::Common(e.into())
    }
}
