//! Errors for the transport, codec and session layers

use thiserror::Error;

use crate::session::SessionState;
use crate::types::NackReason;

/// Channel level failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("serial port is closed")]
    PortClosed,
    #[error("no data within the receive timeout")]
    Timeout,
    #[error("I/O failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
            ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => TransportError::PortClosed,
            _ => TransportError::Io(e.to_string()),
        }
    }
}

/// Framing level failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer bytes than the frame header declares
    #[error("truncated frame")]
    Truncated,
    #[error("checksum mismatch: frame carries 0x{expected:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },
    /// Well-formed frame with a command code missing from the command table
    #[error("unknown command echo 0x{0:02X}")]
    UnknownCommandEcho(u8),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    /// The reader rejected the request
    #[error("NACK: {0}")]
    Nack(NackReason),
    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLong(usize),
}

/// Result of every public session operation that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("device rejected the command: {0}")]
    DeviceRejected(NackReason),
    #[error("device did not answer in time")]
    Timeout,
    /// Fatal for the session; a new handshake is required
    #[error("channel lost: {0}")]
    ChannelLost(TransportError),
    /// Caller bug: the operation is not legal in the current state
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => SessionError::Timeout,
            other => SessionError::ChannelLost(other),
        }
    }
}

impl From<CodecError> for SessionError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Nack(reason) => SessionError::DeviceRejected(reason),
            other => SessionError::InvalidParameter(other.to_string()),
        }
    }
}
