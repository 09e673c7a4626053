use thiserror::Error;

/// Result type for ordered pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while setting up or tearing down a stage
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Stage has already been started
    #[error("Stage '{0}' has already been started")]
    AlreadyStarted(String),

    /// Invalid stage configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A stage thread could not be spawned
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Thread join error
    #[error("Thread join error: {0}")]
    ThreadError(String),

    /// The input queue has no reader left
    #[error("Input queue is closed")]
    QueueClosed,
}
