use crate::command::{CommandId, LogicalCommand, ProtocolVersion};
use crate::constants::errno;
use crate::status::ModemStatus;
use thiserror::Error;

/// The primary error type for the `altcom-lib` library.
#[derive(Error, Debug)]
pub enum AltcomError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Modem is not powered on (status: {0})")]
    NotOperational(ModemStatus),

    #[error("{command} is not supported by protocol {version}")]
    Unresolvable {
        command: LogicalCommand,
        version: ProtocolVersion,
    },

    #[error("Failed to allocate {size}-byte command buffer")]
    AllocationFailure { size: usize },

    #[error("Transport error: {code}")]
    Transport { code: i32 },

    #[error("Timeout waiting for modem response: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Unexpected response length: expected {expected} bytes, got {actual}")]
    ProtocolMismatch { expected: usize, actual: usize },

    #[error("Modem returned result code {0}")]
    Remote(i32),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("A request for command {0} is already pending")]
    AlreadyPending(CommandId),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AltcomError {
    /// Negative local result code for this error.
    ///
    /// Transport failures keep the gateway's own code.
    pub fn errno(&self) -> i32 {
        match self {
            AltcomError::InvalidArgument(_) => -errno::EINVAL,
            AltcomError::NotOperational(_) => -errno::EPERM,
            AltcomError::Unresolvable { .. } => -errno::ENETDOWN,
            AltcomError::AllocationFailure { .. } => -errno::ENOMEM,
            AltcomError::Transport { code } => *code,
            AltcomError::Timeout(_) => -errno::ETIMEDOUT,
            AltcomError::ProtocolMismatch { .. } => -errno::EPROTO,
            AltcomError::Remote(_) => -errno::EPROTO,
            AltcomError::Validation(_) => -errno::EFAULT,
            AltcomError::AlreadyPending(_) => -errno::EALREADY,
            AltcomError::Internal(_) => -errno::EFAULT,
        }
    }
}

/// Collapse a call outcome into the zero / negative result code convention.
pub fn result_code<T>(result: &Result<T, AltcomError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.errno(),
    }
}
