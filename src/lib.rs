//! Host-side protocol engine for TR3 series HF RFID reader/writers.
//!
//! The reader must be identified, have its mode record read, and be
//! switched to command mode before it accepts tag commands. [`Session`]
//! enforces that order; [`Controller`] runs repeated inventories with
//! buzzer feedback on top of it.
//!
//! # Features
//!
//! - `serial` - Serial port transport for desktop using serialport crate
//! - `uart-esp32` - UART transport for ESP32 using esp-idf-svc
//!
//! # Example
//!
//! ```ignore
//! use tr3_rfid::{to_hex, BaudRate, CancelToken, Controller, FrameDirection, SerialTransport, Session};
//!
//! let transport = SerialTransport::open("/dev/ttyACM0", BaudRate::B19200)?;
//! let mut session = Session::new(transport);
//! session.set_observer(|dir: FrameDirection, bytes: &[u8]| println!("[{}] {}", dir, to_hex(bytes)));
//!
//! let report = session.handshake()?;
//! println!("ROM {}, {}", report.version, report.mode);
//!
//! let run = Controller::default().run(&mut session, 10, &CancelToken::new())?;
//! for tag in run.unique_tags() {
//!     println!("Found tag: {}", tag);
//! }
//! ```

mod codec;
mod config;
mod controller;
mod error;
mod observer;
mod session;
mod transport;
mod types;

#[cfg(feature = "uart-esp32")]
mod uart;

#[cfg(feature = "serial")]
mod serial;

// Re-exports
pub use codec::{
    additive_checksum, xor_checksum, AssembledFrame, ChecksumFn, CommandTable, Frame,
    FrameAssembler, FrameCodec,
};
pub use config::SessionConfig;
pub use controller::{CancelToken, Controller, TagReader};
pub use error::{CodecError, SessionError, TransportError};
pub use observer::{FrameDirection, FrameObserver};
pub use session::{HandshakeReport, Session, SessionState, SharedSession};
pub use transport::ReaderTransport;
pub use types::{
    to_hex, BaudRate, BuzzerPattern, DeviceMode, InventoryFailure, InventoryResult, NackReason,
    OperatingMode, RomVersion, RunResult, TagInfo,
};

#[cfg(feature = "uart-esp32")]
pub use uart::UartTransport;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
