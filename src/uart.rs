//! UART transport for ESP32 using esp-idf-svc

use crate::error::TransportError;
use crate::transport::ReaderTransport;
use crate::types::BaudRate;
use esp_idf_hal::delay::TickType;
use esp_idf_svc::hal::gpio::{self, InputPin, OutputPin};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{self, UartDriver};
use esp_idf_svc::sys::EspError;
use std::time::Duration;

pub struct UartTransport<'a> {
    uart: UartDriver<'a>,
}

impl<'a> UartTransport<'a> {
    pub fn new(
        uart: impl Peripheral<P = impl uart::Uart> + 'a,
        tx: impl Peripheral<P = impl OutputPin> + 'a,
        rx: impl Peripheral<P = impl InputPin> + 'a,
        baud_rate: BaudRate,
    ) -> Result<Self, EspError> {
        let config = uart::config::Config::default().baudrate(baud_rate.bits_per_second().into());
        let uart = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<gpio::Gpio0>::None,
            Option::<gpio::Gpio0>::None,
            &config,
        )?;
        uart.clear_rx()?;

        Ok(Self { uart })
    }
}

fn esp_failure(e: EspError) -> TransportError {
    TransportError::Io(e.to_string())
}

impl ReaderTransport for UartTransport<'_> {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut written = 0;
        while written < data.len() {
            written += self.uart.write(&data[written..]).map_err(esp_failure)?;
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; 256];
        let n = self
            .uart
            .read(&mut buf, TickType::from(timeout).ticks())
            .map_err(esp_failure)?;
        if n == 0 {
            return Err(TransportError::Timeout);
        }
        Ok(buf[..n].to_vec())
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.uart.clear_rx().map_err(esp_failure)
    }
}
