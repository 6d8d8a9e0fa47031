use thiserror::Error;

/// Typed errors for the query core. All variants are fatal for the attempt
/// that produced them; no variant is retried internally.
#[derive(Error, Debug)]
pub enum QbError {
    /// A channel to QuickBooks could not be opened.
    #[error("connection error: {0}")]
    Connection(String),

    /// Session creation failed or returned an empty ticket.
    #[error("session error: {0}")]
    Session(String),

    /// Programmer misuse: empty request batch, reading an unset result.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The response set does not line up with the submitted batch. Indicates
    /// an inconsistency on the QuickBooks side; unretryable at this layer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A response payload did not have the expected shape.
    #[error("mapping error in {label}: {message}")]
    Mapping { label: String, message: String },
}

impl QbError {
    pub fn mapping(label: impl Into<String>, message: impl Into<String>) -> Self {
        QbError::Mapping {
            label: label.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QbError>;
