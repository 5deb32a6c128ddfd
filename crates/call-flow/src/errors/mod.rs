//! Error types for call-flow
//!
//! Every failure of an INVITE, BYE or serve operation is returned to the
//! caller as a [`CallFlowError`]. None of them clear the endpoint's dialog,
//! so the owner can inspect it and retry.

use thiserror::Error;

use crate::message::HeaderName;
use crate::transaction::TransactionError;

/// A type alias for handling `Result`s with [`CallFlowError`]
pub type CallFlowResult<T> = std::result::Result<T, CallFlowError>;

/// Errors produced by the call-flow controllers and the endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallFlowError {
    /// The remote side answered with a final status of 300 or above.
    #[error("callee sent negative response code {status} ({reason})")]
    NegativeResponse {
        status: u16,
        reason: String,
    },

    /// The transaction layer reported a failure on the error source.
    #[error("transaction failure: {0}")]
    Transport(#[from] TransactionError),

    /// A header the controller cannot do without was absent.
    #[error("missing required header: {0}")]
    MissingHeader(HeaderName),

    /// The caller cancelled the wait.
    #[error("operation cancelled while {0}")]
    Cancelled(&'static str),

    /// A configured deadline elapsed.
    #[error("timed out while {0}")]
    Timeout(&'static str),

    /// Both event sources of an exchange closed without a final outcome.
    #[error("exchange closed before a final response")]
    ExchangeClosed,

    /// The endpoint has no transaction layer bound yet.
    #[error("endpoint not started")]
    NotStarted,

    /// `start` was called twice.
    #[error("endpoint already started")]
    AlreadyStarted,

    /// The dialog has used up its CSeq space.
    #[error("sequence number space exhausted")]
    SequenceExhausted,

    /// Invalid endpoint configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CallFlowError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Status code of a negative response, if this is one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NegativeResponse { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the owner may reasonably retry the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NegativeResponse { .. } | Self::Timeout(_) | Self::Cancelled(_)
        )
    }
}
