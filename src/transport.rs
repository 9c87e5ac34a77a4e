use std::time::Duration;

use crate::error::TransportError;

/// Trait for reader communication backends.
/// Implement this trait for different transports (serial port, UART, etc.)
///
/// Implementations are thin: no retries, no framing. The session serializes
/// all traffic, so a transport only ever has one request in flight.
pub trait ReaderTransport {
    /// Write all of `data` to the channel
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Return the bytes that arrived within `timeout` (at least one),
    /// or [`TransportError::Timeout`] if none did
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Discard stale input before a new request
    fn clear_input(&mut self) -> Result<(), TransportError>;
}

impl<T: ReaderTransport + ?Sized> ReaderTransport for Box<T> {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).send(data)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).receive(timeout)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        (**self).clear_input()
    }
}
