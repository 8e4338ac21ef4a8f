//! Error taxonomy for the convergence engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConvergeError>;

#[derive(Error, Debug)]
pub enum ConvergeError {
    /// Malformed CIDR, prefix or parameter. Never retried.
    #[error("Invalid input '{input}': {reason}")]
    Validation { input: String, reason: String },

    /// Live resource does not match the desired value under an Exact policy.
    #[error("{resource}: {attribute} expected '{expected}' but found '{actual}'")]
    Conflict {
        resource: String,
        attribute: String,
        expected: String,
        actual: String,
    },

    #[error("No free /24 between {start} and third octet {max_third_octet}")]
    Exhaustion { start: String, max_third_octet: u8 },

    /// Remote call failed; eligible for retry.
    #[error("{operation} failed (status {status:?}): {message}")]
    Transient {
        operation: String,
        status: Option<i32>,
        message: String,
    },

    #[error("{operation} gave up after {attempts} attempt(s): {source}")]
    Fatal {
        operation: String,
        attempts: u32,
        source: Box<ConvergeError>,
    },

    #[error("Snapshot error for stage '{stage}': {reason}")]
    Snapshot { stage: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvergeError {
    pub fn validation(input: impl Into<String>, reason: impl Into<String>) -> Self {
        ConvergeError::Validation {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn transient(operation: impl Into<String>, status: Option<i32>, message: impl Into<String>) -> Self {
        ConvergeError::Transient {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }
}
