//! Error types for the global optimizer
//!
//! Optimization never produces wrong code; failures only mean the function has to be
//! compiled differently. A [`Error::Rejit`] asks the caller to retry with one
//! heuristic switched off, [`Error::OperationAborted`] means the function cannot be
//! optimized at this tier at all.

use std::fmt;
use thiserror::Error;

/// Heuristic to switch off before compiling the function again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejitReason {
    /// An int32 loop value turned out to need a lossless float-to-int conversion
    AggressiveIntTypeSpecDisabled,
    /// A multiplication overflowed under aggressive int specialization
    AggressiveMulIntTypeSpecDisabled,
    /// A lossy int value was required to be lossless on a back edge
    LossyIntTypeSpecDisabled,
    /// Division int specialization produced non-int results
    DivIntTypeSpecDisabled,
    /// A hoisted array check failed
    ArrayCheckHoistDisabled,
    /// A hoisted bound check failed
    BoundCheckHoistDisabled,
    /// A bulk memory rewrite bailed out
    MemOpDisabled,
}

impl fmt::Display for RejitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejitReason::AggressiveIntTypeSpecDisabled => write!(f, "AggressiveIntTypeSpecDisabled"),
            RejitReason::AggressiveMulIntTypeSpecDisabled => {
                write!(f, "AggressiveMulIntTypeSpecDisabled")
            }
            RejitReason::LossyIntTypeSpecDisabled => write!(f, "LossyIntTypeSpecDisabled"),
            RejitReason::DivIntTypeSpecDisabled => write!(f, "DivIntTypeSpecDisabled"),
            RejitReason::ArrayCheckHoistDisabled => write!(f, "ArrayCheckHoistDisabled"),
            RejitReason::BoundCheckHoistDisabled => write!(f, "BoundCheckHoistDisabled"),
            RejitReason::MemOpDisabled => write!(f, "MemOpDisabled"),
        }
    }
}

/// Main error type for the optimizer
#[derive(Error, Debug)]
pub enum Error {
    /// Compile again with the named heuristic disabled
    #[error("Rejit: {reason}")]
    Rejit { reason: RejitReason },

    /// The function cannot be optimized at this tier
    #[error("OperationAborted: {0}")]
    OperationAborted(String),

    /// The input flow graph is malformed
    #[error("InvalidIr: {0}")]
    InvalidIr(String),

    /// Invalid optimizer configuration
    #[error("ConfigError: {0}")]
    Config(String),

    /// Internal optimizer error
    #[error("InternalError: {0}")]
    Internal(String),

    /// IO error
    #[error("IOError: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// IR or config file could not be (de)serialized
    #[error("JsonError: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create a malformed-input error
    pub fn invalid_ir(message: impl Into<String>) -> Self {
        Error::InvalidIr(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// Ask for the function to be compiled again without `reason`'s heuristic
    pub fn rejit(reason: RejitReason) -> Self {
        Error::Rejit { reason }
    }

    /// The heuristic a rejit asks to disable, if this is a rejit
    pub fn rejit_reason(&self) -> Option<RejitReason> {
        match self {
            Error::Rejit { reason } => Some(*reason),
            _ => None,
        }
    }
}

/// Result type alias for the optimizer
pub type Result<T> = std::result::Result<T, Error>;
