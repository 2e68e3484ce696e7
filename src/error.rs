//! Error types for the admission window

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating a window or an admission queue
///
/// Backpressure is not an error: a full window is reported through the
/// `Ok(false)` return of `put`/`enqueue`.
#[derive(Error, Debug)]
pub enum Error {
    /// Window used before `start()` was called
    #[error("Window '{name}' has not been started; call start() before use")]
    NotStarted { name: String },

    /// Window used after `stop()` was called
    #[error("Window '{name}' has been stopped")]
    Stopped { name: String },

    /// `start()` called outside of a tokio runtime
    #[error("Window '{name}' must be started from within a tokio runtime")]
    NoRuntime { name: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The delivery queue was closed underneath the admission queue
    #[error("Admission queue '{name}' is closed")]
    QueueClosed { name: String },

    /// The caller-supplied sender failed
    #[error("Message send failed: {0}")]
    Send(#[source] anyhow::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the error is caused by calling the window in the wrong
    /// lifecycle state.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::NotStarted { .. } | Error::Stopped { .. } | Error::NoRuntime { .. }
        )
    }
}
