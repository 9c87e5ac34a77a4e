use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::codec::{AssembledFrame, Frame, FrameAssembler, FrameCodec};
use crate::config::SessionConfig;
use crate::error::{CodecError, SessionError, TransportError};
use crate::observer::{FrameDirection, FrameObserver};
use crate::transport::ReaderTransport;
use crate::types::{
    to_hex, BuzzerPattern, DeviceMode, InventoryFailure, InventoryResult, OperatingMode,
    RomVersion, TagInfo,
};

/// Handshake progress of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Disconnected,
    /// ROM version read
    Identified,
    /// Mode record read and cached
    ModeConfigured,
    /// Reader switched to command mode; tag operations allowed
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the handshake learned about the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReport {
    pub version: RomVersion,
    /// Mode record as written back (command mode, other settings unchanged)
    pub mode: DeviceMode,
}

/// Protocol session with one reader over one channel.
///
/// Every operation is a complete request/response exchange; `&mut self`
/// keeps a single request in flight. Use [`SharedSession`] to share a
/// session between threads.
pub struct Session<T: ReaderTransport> {
    transport: T,
    codec: FrameCodec,
    config: SessionConfig,
    state: SessionState,
    version: Option<RomVersion>,
    mode: Option<DeviceMode>,
    observer: Option<Box<dyn FrameObserver + Send>>,
}

impl<T: ReaderTransport> Session<T> {
    /// Create a session with the TR3 defaults
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            codec: config.codec(),
            config,
            state: SessionState::Disconnected,
            version: None,
            mode: None,
            observer: None,
        }
    }

    /// Report every sent and received frame to `observer`
    pub fn set_observer<O>(&mut self, observer: O)
    where
        O: FrameObserver + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn rom_version(&self) -> Option<&RomVersion> {
        self.version.as_ref()
    }

    /// Cached mode record, if read and not invalidated by a failed write
    pub fn device_mode(&self) -> Option<&DeviceMode> {
        self.mode.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Forget the handshake; the next user must identify the reader again
    pub fn close(&mut self) {
        if self.state != SessionState::Disconnected {
            info!("Session closed in state {}", self.state);
        }
        self.reset();
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Version query, mode read, then mode write.
    ///
    /// Stops at the first failing step; the state stays at the last stage
    /// reached.
    pub fn handshake(&mut self) -> Result<HandshakeReport, SessionError> {
        let version = self.get_version()?;
        self.read_mode()?;
        self.write_mode()?;

        let mode = self
            .mode
            .clone()
            .ok_or_else(|| SessionError::UnexpectedResponse("mode record missing after write".into()))?;
        Ok(HandshakeReport { version, mode })
    }

    /// Read the ROM version. Legal in every state.
    pub fn get_version(&mut self) -> Result<RomVersion, SessionError> {
        let commands = *self.codec.commands();
        let detail = commands.rom_version_detail;
        let ack = self.request(
            commands.rom_version,
            &[detail],
            Some(detail),
            self.config.response_timeout,
        )?;

        let version = RomVersion::from_bytes(&ack.payload[1..]);
        info!("ROM version: {}", version);
        self.version = Some(version.clone());
        self.advance(SessionState::Identified);
        Ok(version)
    }

    /// Read and cache the mode record
    pub fn read_mode(&mut self) -> Result<DeviceMode, SessionError> {
        self.check_state(
            "read_mode",
            &[
                SessionState::Identified,
                SessionState::ModeConfigured,
                SessionState::Ready,
            ],
        )?;

        let commands = *self.codec.commands();
        let detail = commands.read_mode_detail;
        let ack = self.request(
            commands.read_mode,
            &[detail],
            Some(detail),
            self.config.response_timeout,
        )?;

        let mode = DeviceMode::from_bytes(&ack.payload[1..]).ok_or_else(|| {
            SessionError::UnexpectedResponse(format!(
                "mode record too short: {}",
                to_hex(&ack.payload)
            ))
        })?;
        info!("Reader mode: {}", mode);
        self.mode = Some(mode.clone());
        self.advance(SessionState::ModeConfigured);
        Ok(mode)
    }

    /// Write the cached mode record back with the operating mode set to
    /// command mode.
    ///
    /// After a failed write the cache is invalid, so the next call reads the
    /// record again before writing.
    pub fn write_mode(&mut self) -> Result<(), SessionError> {
        self.check_state(
            "write_mode",
            &[SessionState::ModeConfigured, SessionState::Ready],
        )?;

        let current = match self.mode.clone() {
            Some(mode) => mode,
            None => self.read_mode()?,
        };
        let record = current.with_operating_mode(OperatingMode::Command);
        let commands = *self.codec.commands();

        info!("Switching reader to command mode, other settings kept");
        let written = self.request(
            commands.write_mode,
            &record.write_payload(DeviceMode::STORE_RAM),
            Some(commands.write_mode),
            self.config.response_timeout,
        );

        match written {
            Ok(_) => {
                self.mode = Some(record);
                self.advance(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                if self.state != SessionState::Disconnected {
                    warn!("Mode write failed ({}), cached mode discarded", e);
                    self.mode = None;
                    self.state = SessionState::ModeConfigured;
                }
                Err(e)
            }
        }
    }

    /// Run one inventory.
    ///
    /// No tag, NACK and timeout are ordinary outcomes reported through the
    /// result; only a lost channel or a call outside `Ready` is an error.
    pub fn inventory(&mut self) -> Result<InventoryResult, SessionError> {
        self.check_state("inventory", &[SessionState::Ready])?;

        let commands = *self.codec.commands();
        match self.transmit(commands.inventory, &commands.inventory_args) {
            Ok(()) => {}
            Err(SessionError::Timeout) => return Ok(InventoryResult::failed(InventoryFailure::Timeout)),
            Err(e) => return Err(e),
        }

        let hard_deadline = Instant::now() + self.config.inventory_timeout;
        let mut assembler = FrameAssembler::new();
        let mut result = InventoryResult::default();
        let mut records = 0usize;
        let mut last_uid: Option<Instant> = None;

        loop {
            if let Some(expected) = result.expected_count {
                if records >= expected as usize {
                    break;
                }
            }

            let deadline = match last_uid {
                Some(at) => hard_deadline.min(at + self.config.settle_window),
                None => hard_deadline,
            };

            match self.receive_frame(&mut assembler, deadline) {
                Ok(frame) if frame.command == commands.ack => {
                    if frame.detail() == Some(commands.inventory_detail()) {
                        let count = frame.payload.get(1).copied().unwrap_or(0);
                        info!("Reader reports {} tag(s)", count);
                        result.expected_count = Some(count);
                    } else {
                        debug!("Ignoring ACK {} during inventory", to_hex(&frame.payload));
                    }
                }
                Ok(frame) if frame.command == commands.uid => {
                    match TagInfo::from_uid_record(&frame.payload) {
                        Some(tag) => {
                            records += 1;
                            last_uid = Some(Instant::now());
                            info!("UID {}", tag);
                            result.insert(tag);
                        }
                        None => warn!("Short UID record: {}", to_hex(&frame.payload)),
                    }
                }
                Ok(frame) => debug!("Ignoring frame 0x{:02X} during inventory", frame.command),
                Err(SessionError::DeviceRejected(reason)) => {
                    return Ok(InventoryResult::failed(InventoryFailure::Rejected(reason)));
                }
                Err(SessionError::Timeout) if records == 0 => {
                    debug!("Inventory timed out without UIDs");
                    result.failure = Some(InventoryFailure::Timeout);
                    return Ok(result);
                }
                Err(SessionError::Timeout) => break,
                Err(e) => return Err(e),
            }
        }

        if let Some(expected) = result.expected_count {
            if records < expected as usize {
                warn!("Reader announced {} tag(s), received {}", expected, records);
            }
        }
        result.success = true;
        Ok(result)
    }

    /// Sound the buzzer
    pub fn buzzer(&mut self, pattern: BuzzerPattern) -> Result<(), SessionError> {
        self.check_state("buzzer", &[SessionState::Ready])?;

        let commands = *self.codec.commands();
        debug!("Buzzer {:?}", pattern);
        self.request(
            commands.buzzer,
            &[commands.buzzer_response, pattern.sound_code()],
            Some(commands.buzzer),
            self.config.response_timeout,
        )
        .map(|_| ())
    }

    fn check_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        error!("{} called in state {}", operation, self.state);
        Err(SessionError::InvalidState {
            operation,
            state: self.state,
        })
    }

    fn advance(&mut self, to: SessionState) {
        if to > self.state {
            info!("Session {} -> {}", self.state, to);
            self.state = to;
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::Disconnected;
        self.version = None;
        self.mode = None;
    }

    fn channel_lost(&mut self, e: TransportError) -> SessionError {
        error!("Channel lost in state {}: {}", self.state, e);
        self.reset();
        SessionError::ChannelLost(e)
    }

    fn transport_failure(&mut self, e: TransportError) -> SessionError {
        match e {
            TransportError::Timeout => SessionError::Timeout,
            other => self.channel_lost(other),
        }
    }

    fn observe(&mut self, direction: FrameDirection, bytes: &[u8]) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_frame(direction, bytes);
        }
    }

    fn transmit(&mut self, command: u8, payload: &[u8]) -> Result<(), SessionError> {
        let bytes = self.codec.encode_command(command, payload)?;

        self.transport
            .clear_input()
            .map_err(|e| self.transport_failure(e))?;
        debug!("Sending: {}", to_hex(&bytes));
        self.observe(FrameDirection::Sent, &bytes);
        self.transport
            .send(&bytes)
            .map_err(|e| self.transport_failure(e))
    }

    /// Next accepted frame before `deadline`. A NACK ends the exchange.
    fn receive_frame(&mut self, assembler: &mut FrameAssembler, deadline: Instant) -> Result<Frame, SessionError> {
        loop {
            while let Some(AssembledFrame { raw, decoded }) = assembler.next_frame(&self.codec) {
                debug!("Received: {}", to_hex(&raw));
                self.observe(FrameDirection::Received, &raw);
                match decoded {
                    Ok(frame) => return Ok(frame),
                    Err(CodecError::Nack(reason)) => {
                        warn!("NACK: {}", reason);
                        return Err(SessionError::DeviceRejected(reason));
                    }
                    Err(e) => warn!("Ignoring frame: {}", e),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::Timeout);
            }

            match self.transport.receive(deadline - now) {
                Ok(bytes) => assembler.push(&bytes),
                Err(TransportError::Timeout) => {}
                Err(e) => return Err(self.channel_lost(e)),
            }
        }
    }

    /// Send a request and wait for its ACK, skipping unrelated frames.
    ///
    /// An ACK whose detail byte is not `expect_detail` belongs to another
    /// exchange and is skipped too; if nothing better arrives before the
    /// deadline it is reported as [`SessionError::UnexpectedResponse`].
    fn request(
        &mut self,
        command: u8,
        payload: &[u8],
        expect_detail: Option<u8>,
        timeout: Duration,
    ) -> Result<Frame, SessionError> {
        self.transmit(command, payload)?;

        let ack = self.codec.commands().ack;
        let deadline = Instant::now() + timeout;
        let mut assembler = FrameAssembler::new();
        let mut stray: Option<Option<u8>> = None;

        loop {
            let frame = match self.receive_frame(&mut assembler, deadline) {
                Ok(frame) => frame,
                Err(SessionError::Timeout) => {
                    return Err(match stray {
                        Some(detail) => SessionError::UnexpectedResponse(format!(
                            "ACK for 0x{:02X} carries detail {:02X?}, expected {:02X?}",
                            command, detail, expect_detail
                        )),
                        None => SessionError::Timeout,
                    });
                }
                Err(e) => return Err(e),
            };
            if frame.command != ack {
                debug!("Skipping frame 0x{:02X} while waiting for ACK", frame.command);
                continue;
            }

            match expect_detail {
                Some(detail) if frame.detail() != Some(detail) => {
                    warn!(
                        "Skipping ACK {} while waiting for 0x{:02X}",
                        to_hex(&frame.payload),
                        command
                    );
                    stray = Some(frame.detail());
                }
                _ => return Ok(frame),
            }
        }
    }
}

/// A [`Session`] behind a mutex.
///
/// Each call holds the lock for a whole request/response exchange, so
/// callers on different threads never interleave frames.
pub struct SharedSession<T: ReaderTransport> {
    inner: Arc<Mutex<Session<T>>>,
}

impl<T: ReaderTransport> Clone for SharedSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ReaderTransport> SharedSession<T> {
    pub fn new(session: Session<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Exclusive access for a sequence of operations
    pub fn lock(&self) -> MutexGuard<'_, Session<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Session<T>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn handshake(&self) -> Result<HandshakeReport, SessionError> {
        self.lock().handshake()
    }

    pub fn inventory(&self) -> Result<InventoryResult, SessionError> {
        self.lock().inventory()
    }

    pub fn buzzer(&self, pattern: BuzzerPattern) -> Result<(), SessionError> {
        self.lock().buzzer(pattern)
    }

    pub fn close(&self) {
        self.lock().close()
    }
}
