//! Error types for the action worker.

use std::path::PathBuf;

/// Boxed error returned by step handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for the worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors. All of them are fatal and surface before
/// any network activity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid token format: {reason}")]
    InvalidTokenFormat { reason: String },

    #[error("Token is missing required claim '{claim}'")]
    MissingClaim { claim: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration file {}: {message}", path.display())]
    ParseError { path: PathBuf, message: String },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the transport to the dispatch service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("Worker registration rejected: {reason}")]
    RegistrationRejected { reason: String },

    #[error("Listen channel failed: {reason}")]
    Channel { reason: String },

    #[error("Failed to send {event} event: {reason}")]
    SendFailed { event: String, reason: String },

    #[error("Dispatcher unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors scoped to a single execution. They are reported upstream as a
/// `failed` event and never stop the worker.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Failed to decode action payload: {0}")]
    Decode(String),

    #[error("No output recorded for parent step '{step}'")]
    NotFound { step: String },

    #[error("Step handler failed: {0}")]
    Handler(String),

    #[error("Step handler panicked: {0}")]
    Panicked(String),

    #[error("Step run cancelled")]
    Cancelled,

    #[error("Invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },
}

/// Protocol mismatches with the dispatch service. Logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("No handler registered for action '{action_id}'")]
    UnknownAction { action_id: String },

    #[error("Step run {step_run_id} is already in flight")]
    DuplicateStepRun { step_run_id: String },
}

/// Worker lifecycle errors returned from `start()`.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {name} was already started")]
    AlreadyStarted { name: String },

    #[error("Worker {name} failed to register: {source}")]
    Registration {
        name: String,
        #[source]
        source: DispatchError,
    },

    #[error("Worker {name} could not reconnect after {attempts} attempts: {source}")]
    ReconnectExhausted {
        name: String,
        attempts: u32,
        #[source]
        source: DispatchError,
    },
}

/// Result type alias for the worker.
pub type Result<T> = std::result::Result<T, Error>;
