//! Serial port transport for desktop using serialport crate

use crate::error::TransportError;
use crate::transport::ReaderTransport;
use crate::types::BaudRate;
use log::{debug, info};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Open `port_name` with 8-N-1 framing and no flow control
    pub fn open(port_name: &str, baud_rate: BaudRate) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud_rate.bits_per_second())
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;
        port.clear(ClearBuffer::All)?;
        info!("Opened {} at {}", port_name, baud_rate);

        Ok(Self { port: Some(port) })
    }

    /// Wrap a port the caller already opened
    pub fn from_port(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port: Some(port) }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Release the port; later calls report [`TransportError::PortClosed`]
    pub fn close(&mut self) {
        if let Some(port) = self.port.take() {
            debug!("Closing {}", port.name().unwrap_or_default());
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::PortClosed)
    }
}

impl ReaderTransport for SerialTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let port = self.port()?;
        port.set_timeout(timeout)?;

        let mut buf = [0u8; 256];
        match port.read(&mut buf) {
            Ok(0) => Err(TransportError::Timeout),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortClosed,
            serialport::ErrorKind::Io(kind) => std::io::Error::new(kind, e.description).into(),
            _ => TransportError::Io(e.to_string()),
        }
    }
}
