//! Error types for the wire protocol

use thiserror::Error;

/// Failure while decoding fields out of a framed message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("short read: needed {needed} bytes, {remaining} remaining")]
    ShortRead { needed: usize, remaining: usize },
    #[error("field `{field}` has invalid value {value}")]
    InvalidField { field: &'static str, value: u64 },
    #[error("record encoding failed: {0}")]
    Record(String),
    /// A variable-length message longer than its length prefix can state
    #[error("{packet} is {len} bytes, over the 65535 byte limit")]
    Oversize { packet: &'static str, len: usize },
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        CodecError::Record(err.to_string())
    }
}

/// Failure while splitting the inbound stream into messages.
///
/// Both variants leave the stream position unknown, so the connection
/// discards whatever it has buffered and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),
    #[error("opcode {opcode:#06x} declares invalid length {declared}")]
    InvalidLength { opcode: u16, declared: usize },
}

/// Outcome of a handler that did not complete normally
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("malformed {packet}: {source}")]
    Malformed {
        packet: &'static str,
        #[source]
        source: CodecError,
    },
    /// The message is not valid in the session's current state
    #[error("{packet} rejected: {reason}")]
    Rejected { packet: &'static str, reason: String },
    /// The session cannot continue; the connection is closed
    #[error("{packet} fatal: {reason}")]
    Fatal { packet: &'static str, reason: String },
}

impl HandleError {
    pub fn rejected(packet: &'static str, reason: impl Into<String>) -> Self {
        HandleError::Rejected {
            packet,
            reason: reason.into(),
        }
    }

    pub fn fatal(packet: &'static str, reason: impl Into<String>) -> Self {
        HandleError::Fatal {
            packet,
            reason: reason.into(),
        }
    }

    pub fn closes_connection(&self) -> bool {
        matches!(self, HandleError::Fatal { .. })
    }
}

/// Error from routing one framed message
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Handle(#[from] HandleError),
}
