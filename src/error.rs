use thiserror::Error;

/// Errors that can occur when handing a notification to a mail transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to send mail: {0}")]
    SendFailed(String),

    #[error("Message has no recipients")]
    NoRecipients,

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur while building or running the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to start flush timer")]
    TimerSpawn(#[source] std::io::Error),

    #[error("Flush timer terminated unexpectedly")]
    TimerTerminated,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors reported by a context provider while describing the acting user
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Context unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    TomlError(#[from] toml::de::Error),
}

/// Rejection of user input by form handling
///
/// Form and field validators return this error when a submitted value is
/// refused. The pipeline treats it as expected behavior and never reports it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value: {0}")]
pub struct ValidationRejection(pub String);
