//! Error taxonomy reported by exchanges.

use thiserror::Error;

use crate::supervisor::SpawnError;
use crate::transport::TransportError;
use crate::wire::{FieldMismatch, ProtocolError, TypeTag, MIN_RESPONSE_FIELD_BYTES};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn child: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Child could not start the program (exit code {0})")]
    ChildLaunch(i32),

    #[error("Exchange cancelled by shutdown")]
    TransportCancelled,

    #[error("Exchange deadline expired")]
    TransportTimeout,

    #[error("Pipe transport failed: {0}")]
    Transport(TransportError),

    #[error("Protocol error: {0}")]
    ProtocolDecode(#[from] ProtocolError),

    #[error("Output slot {slot}: expected {expected}, child sent {actual}")]
    FieldTypeMismatch {
        slot: usize,
        expected: TypeTag,
        actual: TypeTag,
    },

    #[error("Output slot {slot}: expected {expected} elements, child sent {actual}")]
    FieldCountMismatch { slot: usize, expected: u32, actual: u32 },

    #[error("Waiting for the child failed")]
    WaitAnomaly,

    #[error("Child sent {0} field bytes; more than {MIN} required", MIN = MIN_RESPONSE_FIELD_BYTES)]
    InsufficientData(u64),
}

impl ExecError {
    /// Fatal errors abort the exchange; field mismatches are only reported.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ExecError::FieldTypeMismatch { .. } | ExecError::FieldCountMismatch { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::TransportTimeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::TransportCancelled)
    }
}

impl From<TransportError> for ExecError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => ExecError::TransportCancelled,
            TransportError::TimedOut => ExecError::TransportTimeout,
            other => ExecError::Transport(other),
        }
    }
}

impl From<&FieldMismatch> for ExecError {
    fn from(m: &FieldMismatch) -> Self {
        match *m {
            FieldMismatch::Type {
                slot,
                expected,
                actual,
                ..
            } => ExecError::FieldTypeMismatch {
                slot,
                expected,
                actual,
            },
            FieldMismatch::Count {
                slot,
                expected,
                actual,
            } => ExecError::FieldCountMismatch {
                slot,
                expected,
                actual,
            },
        }
    }
}
