//! Types for reader operations

use std::fmt;

/// Information about a detected ISO15693 tag
#[derive(Debug, Clone)]
pub struct TagInfo {
    /// UID, most significant byte first
    pub uid: [u8; 8],
    pub dsfid: u8,
}

impl TagInfo {
    /// Parse the payload of a UID record: `[dsfid, uid LSB first x8]`.
    pub(crate) fn from_uid_record(payload: &[u8]) -> Option<Self> {
        if payload.len() < 9 {
            return None;
        }

        let mut uid = [0u8; 8];
        uid.copy_from_slice(&payload[1..9]);
        uid.reverse();

        Some(Self {
            uid,
            dsfid: payload[0],
        })
    }

    /// UID as an uppercase hex string, MSB first
    pub fn uid_hex(&self) -> String {
        bytes_to_hex(&self.uid)
    }
}

impl PartialEq for TagInfo {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for TagInfo {}

impl fmt::Display for TagInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (DSFID {:02X})", self.uid_hex(), self.dsfid)
    }
}

/// Reason code carried by a NACK response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    /// The reader computed a different SUM for our frame
    ChecksumError,
    /// Bad frame format or parameter
    FormatError,
    Other(u8),
}

impl NackReason {
    /// Reported when a NACK frame carries no reason byte
    pub const MISSING: u8 = 0xFF;

    pub fn from_code(code: u8) -> Self {
        match code {
            0x42 => NackReason::ChecksumError,
            0x44 => NackReason::FormatError,
            other => NackReason::Other(other),
        }
    }

    /// Reason byte of a NACK payload; the first byte echoes the rejected command.
    pub(crate) fn from_payload(payload: &[u8]) -> Self {
        Self::from_code(payload.get(1).copied().unwrap_or(Self::MISSING))
    }

    pub fn code(&self) -> u8 {
        match self {
            NackReason::ChecksumError => 0x42,
            NackReason::FormatError => 0x44,
            NackReason::Other(code) => *code,
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackReason::ChecksumError => write!(f, "SUM_ERROR (0x42): checksum mismatch"),
            NackReason::FormatError => write!(f, "FORMAT_ERROR (0x44): bad format or parameter"),
            NackReason::Other(code) => write!(f, "unknown NACK error (0x{:02X})", code),
        }
    }
}

/// Link speeds the reader supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BaudRate {
    B9600,
    #[default]
    B19200,
    B38400,
    B115200,
}

impl BaudRate {
    pub fn bits_per_second(&self) -> u32 {
        match self {
            BaudRate::B9600 => 9_600,
            BaudRate::B19200 => 19_200,
            BaudRate::B38400 => 38_400,
            BaudRate::B115200 => 115_200,
        }
    }

    pub fn from_bits_per_second(bps: u32) -> Option<Self> {
        match bps {
            9_600 => Some(BaudRate::B9600),
            19_200 => Some(BaudRate::B19200),
            38_400 => Some(BaudRate::B38400),
            115_200 => Some(BaudRate::B115200),
            _ => None,
        }
    }

    /// Decode bits 7..6 of the mode record's speed byte
    fn from_speed_byte(byte: u8) -> Self {
        match (byte >> 6) & 0x03 {
            0b00 => BaudRate::B19200,
            0b01 => BaudRate::B9600,
            0b10 => BaudRate::B38400,
            _ => BaudRate::B115200,
        }
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.bits_per_second())
    }
}

/// Reader operating mode (byte 0 of the mode record)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Command,
    AutoScan,
    Trigger,
    Polling,
    Eas,
    ContinuousInventory,
    RdLoop,
    RdLoopRunning,
    EpcInventory,
    EpcInventoryRead,
    Unknown(u8),
}

impl OperatingMode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => OperatingMode::Command,
            0x01 => OperatingMode::AutoScan,
            0x02 => OperatingMode::Trigger,
            0x03 => OperatingMode::Polling,
            0x24 => OperatingMode::Eas,
            0x50 => OperatingMode::ContinuousInventory,
            0x58 => OperatingMode::RdLoop,
            0x59 => OperatingMode::RdLoopRunning,
            0x63 => OperatingMode::EpcInventory,
            0x64 => OperatingMode::EpcInventoryRead,
            other => OperatingMode::Unknown(other),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            OperatingMode::Command => 0x00,
            OperatingMode::AutoScan => 0x01,
            OperatingMode::Trigger => 0x02,
            OperatingMode::Polling => 0x03,
            OperatingMode::Eas => 0x24,
            OperatingMode::ContinuousInventory => 0x50,
            OperatingMode::RdLoop => 0x58,
            OperatingMode::RdLoopRunning => 0x59,
            OperatingMode::EpcInventory => 0x63,
            OperatingMode::EpcInventoryRead => 0x64,
            OperatingMode::Unknown(byte) => *byte,
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Command => write!(f, "command mode"),
            OperatingMode::AutoScan => write!(f, "auto-scan mode"),
            OperatingMode::Trigger => write!(f, "trigger mode"),
            OperatingMode::Polling => write!(f, "polling mode"),
            OperatingMode::Eas => write!(f, "EAS mode"),
            OperatingMode::ContinuousInventory => write!(f, "continuous inventory mode"),
            OperatingMode::RdLoop => write!(f, "RDLOOP mode"),
            OperatingMode::RdLoopRunning => write!(f, "RDLOOP mode (running)"),
            OperatingMode::EpcInventory => write!(f, "EPC inventory mode"),
            OperatingMode::EpcInventoryRead => write!(f, "EPC inventory-read mode"),
            OperatingMode::Unknown(byte) => write!(f, "unknown (0x{:02X})", byte),
        }
    }
}

/// Raw mode record as read from the reader.
///
/// The write-mode command overwrites the whole record, so changes are made
/// by copying the record and replacing a single field, never by building a
/// fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMode {
    bytes: Vec<u8>,
}

impl DeviceMode {
    /// Shortest record that carries mode, flags and speed
    pub const MIN_LEN: usize = 4;

    const MODE: usize = 0;
    const FLAGS: usize = 2;
    const SPEED: usize = 3;

    const FLAG_ANTI_COLLISION: u8 = 1 << 2;
    const FLAG_CONTINUOUS_READ: u8 = 1 << 3;
    const FLAG_BUZZER: u8 = 1 << 4;
    const FLAG_UID_WITH_DATA: u8 = 1 << 5;

    /// Storage selector for the write-mode command: RAM only
    pub const STORE_RAM: u8 = 0x00;

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::MIN_LEN {
            return None;
        }
        Some(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn operating_mode(&self) -> OperatingMode {
        OperatingMode::from_byte(self.bytes[Self::MODE])
    }

    pub fn flags(&self) -> u8 {
        self.bytes[Self::FLAGS]
    }

    pub fn anti_collision(&self) -> bool {
        self.flags() & Self::FLAG_ANTI_COLLISION != 0
    }

    pub fn continuous_read(&self) -> bool {
        self.flags() & Self::FLAG_CONTINUOUS_READ != 0
    }

    pub fn buzzer_enabled(&self) -> bool {
        self.flags() & Self::FLAG_BUZZER != 0
    }

    /// Whether the reader sends user data together with the UID
    pub fn uid_with_user_data(&self) -> bool {
        self.flags() & Self::FLAG_UID_WITH_DATA != 0
    }

    pub fn baud_rate(&self) -> BaudRate {
        BaudRate::from_speed_byte(self.bytes[Self::SPEED])
    }

    /// Copy of this record with only the operating mode replaced
    pub fn with_operating_mode(&self, mode: OperatingMode) -> Self {
        let mut bytes = self.bytes.clone();
        bytes[Self::MODE] = mode.to_byte();
        Self { bytes }
    }

    /// Payload for the write-mode command
    pub(crate) fn write_payload(&self, storage: u8) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.bytes.len() + 1);
        payload.push(storage);
        payload.extend_from_slice(&self.bytes);
        payload
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |flag: bool| if flag { "on" } else { "off" };
        write!(
            f,
            "{}, anti-collision {}, {} read, buzzer {}, {}, {}",
            self.operating_mode(),
            on_off(self.anti_collision()),
            if self.continuous_read() { "continuous" } else { "single" },
            on_off(self.buzzer_enabled()),
            if self.uid_with_user_data() { "user data + UID" } else { "user data only" },
            self.baud_rate()
        )
    }
}

/// ROM version string reported by the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomVersion {
    raw: String,
}

impl RomVersion {
    /// Keeps only printable ASCII from the version payload
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let raw = bytes
            .iter()
            .filter(|b| (0x20..=0x7E).contains(*b))
            .map(|&b| b as char)
            .collect();
        Self { raw }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for RomVersion {
    /// `1230ABC` is shown as `1.23 0ABC`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.len() >= 4 {
            write!(f, "{}.{} {}", &self.raw[..1], &self.raw[1..3], &self.raw[3..])
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

/// Buzzer sound selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuzzerPattern {
    /// Single tone, played when a tag was read
    Short,
    /// Three short tones, played when nothing was read
    Triple,
}

impl BuzzerPattern {
    pub fn sound_code(&self) -> u8 {
        match self {
            BuzzerPattern::Short => 0x00,
            BuzzerPattern::Triple => 0x01,
        }
    }

    /// Feedback for one inventory cycle
    pub fn for_result(result: &InventoryResult) -> Self {
        if result.has_tags() {
            BuzzerPattern::Short
        } else {
            BuzzerPattern::Triple
        }
    }
}

/// Why an inventory cycle produced no data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryFailure {
    Timeout,
    Rejected(NackReason),
}

impl fmt::Display for InventoryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryFailure::Timeout => write!(f, "no response (timeout / no tag in range)"),
            InventoryFailure::Rejected(reason) => write!(f, "NACK: {}", reason),
        }
    }
}

/// Outcome of one inventory call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryResult {
    /// Unique tags, in the order the reader reported them
    pub tags: Vec<TagInfo>,
    /// Tag count announced by the reader, if the ACK arrived
    pub expected_count: Option<u8>,
    pub success: bool,
    pub failure: Option<InventoryFailure>,
}

impl InventoryResult {
    pub(crate) fn failed(failure: InventoryFailure) -> Self {
        Self {
            tags: Vec::new(),
            expected_count: None,
            success: false,
            failure: Some(failure),
        }
    }

    pub fn has_tags(&self) -> bool {
        !self.tags.is_empty()
    }

    /// Adds a tag unless its UID is already present
    pub(crate) fn insert(&mut self, tag: TagInfo) -> bool {
        if self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }
}

/// Per-cycle results of a controller run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub cycles: Vec<InventoryResult>,
    /// The session lost its channel before all cycles ran
    pub truncated: bool,
    /// The run was cancelled before all cycles ran
    pub cancelled: bool,
}

impl RunResult {
    pub fn completed(&self) -> usize {
        self.cycles.len()
    }

    pub fn cycles_with_tags(&self) -> usize {
        self.cycles.iter().filter(|c| c.has_tags()).count()
    }

    /// Every distinct tag seen during the run, first sighting order
    pub fn unique_tags(&self) -> Vec<TagInfo> {
        let mut tags: Vec<TagInfo> = Vec::new();
        for tag in self.cycles.iter().flat_map(|c| c.tags.iter()) {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        tags
    }
}

/// Convert bytes to uppercase hex string
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Render a frame as space separated uppercase hex, e.g. `02 00 4F 01 90 03 E5 0D`
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
