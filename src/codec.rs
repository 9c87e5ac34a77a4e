//! TR3 frame encoding and decoding.
//!
//! ```text
//! STX | ADDR | CMD | LEN | DATA[LEN] | ETX | SUM | CR
//! ```
//!
//! `SUM` covers every byte from `STX` through `ETX`.

use log::warn;

use crate::error::CodecError;
use crate::types::{to_hex, NackReason};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const CR: u8 = 0x0D;

/// STX, address, command, length
pub const HEADER_LEN: usize = 4;
/// ETX, SUM, CR
pub const FOOTER_LEN: usize = 3;
pub const MIN_FRAME_LEN: usize = HEADER_LEN + FOOTER_LEN;
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Checksum over the bytes preceding the SUM field
pub type ChecksumFn = fn(&[u8]) -> u8;

/// Sum of all bytes, modulo 256 (TR3)
pub fn additive_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Command codes of the reader.
///
/// Requests that share a command code are told apart by the first payload
/// byte (the "detail" byte), which the reader echoes back in its ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTable {
    pub rom_version: u8,
    pub rom_version_detail: u8,
    pub read_mode: u8,
    pub read_mode_detail: u8,
    pub write_mode: u8,
    pub inventory: u8,
    /// Inventory2 arguments; the first byte is the detail echoed in the ACK
    pub inventory_args: [u8; 3],
    pub buzzer: u8,
    /// Response type byte sent with every buzzer request
    pub buzzer_response: u8,
    pub ack: u8,
    pub nack: u8,
    pub uid: u8,
}

impl CommandTable {
    pub const TR3: CommandTable = CommandTable {
        rom_version: 0x4F,
        rom_version_detail: 0x90,
        read_mode: 0x4F,
        read_mode_detail: 0x00,
        write_mode: 0x4E,
        inventory: 0x78,
        // F0h: read UIDs only
        inventory_args: [0xF0, 0x40, 0x01],
        buzzer: 0x42,
        buzzer_response: 0x01,
        ack: 0x30,
        nack: 0x31,
        uid: 0x49,
    };

    pub fn inventory_detail(&self) -> u8 {
        self.inventory_args[0]
    }

    /// Whether `code` is a command or response this table knows about
    pub fn is_known(&self, code: u8) -> bool {
        [
            self.rom_version,
            self.read_mode,
            self.write_mode,
            self.inventory,
            self.buzzer,
            self.ack,
            self.nack,
            self.uid,
        ]
        .contains(&code)
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::TR3
    }
}

/// One decoded command or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(address: u8, command: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            command,
            payload: payload.into(),
        }
    }

    /// First payload byte; echoes the request detail in ACK frames
    pub fn detail(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    address: u8,
    commands: CommandTable,
    checksum: ChecksumFn,
}

impl FrameCodec {
    pub fn new(address: u8, commands: CommandTable, checksum: ChecksumFn) -> Self {
        Self {
            address,
            commands,
            checksum,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, CodecError> {
        if frame.payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLong(frame.payload.len()));
        }

        let mut bytes = Vec::with_capacity(MIN_FRAME_LEN + frame.payload.len());
        bytes.extend_from_slice(&[STX, frame.address, frame.command, frame.payload.len() as u8]);
        bytes.extend_from_slice(&frame.payload);
        bytes.push(ETX);
        bytes.push((self.checksum)(&bytes));
        bytes.push(CR);
        Ok(bytes)
    }

    /// Encode a frame addressed with the codec's device address
    pub fn encode_command(&self, command: u8, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.encode(&Frame::new(self.address, command, payload))
    }

    /// Decode exactly one frame.
    ///
    /// A NACK response decodes to [`CodecError::Nack`] so callers cannot
    /// mistake a rejection for data.
    ///
    /// A buffer that ends in `ETX ?? CR` is judged by its checksum even when
    /// it is shorter than its length byte says, so a corrupted length byte
    /// reads as [`CodecError::ChecksumMismatch`]. The same applies to a cut
    /// that happens to end on such bytes inside the payload.
    /// [`FrameAssembler`] waits for the declared length and never decodes a
    /// short buffer.
    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, CodecError> {
        let len = bytes.len();
        if len < MIN_FRAME_LEN {
            return Err(CodecError::Truncated);
        }

        let declared = declared_frame_len(bytes).unwrap_or(MIN_FRAME_LEN);
        let terminated = bytes[len - 1] == CR && bytes[len - 3] == ETX;
        if len < declared && !terminated {
            return Err(CodecError::Truncated);
        }

        let expected = bytes[len - 2];
        let computed = (self.checksum)(&bytes[..len - 2]);
        if expected != computed {
            return Err(CodecError::ChecksumMismatch { expected, computed });
        }

        if bytes[0] != STX {
            return Err(CodecError::Malformed("missing STX"));
        }
        if !terminated {
            return Err(CodecError::Malformed("missing ETX/CR"));
        }
        if len != declared {
            return Err(CodecError::Malformed("length byte disagrees with frame size"));
        }

        let frame = Frame::new(bytes[1], bytes[2], &bytes[HEADER_LEN..len - FOOTER_LEN]);
        if frame.command == self.commands.nack {
            return Err(CodecError::Nack(NackReason::from_payload(&frame.payload)));
        }
        if !self.commands.is_known(frame.command) {
            return Err(CodecError::UnknownCommandEcho(frame.command));
        }

        Ok(frame)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(0x00, CommandTable::TR3, additive_checksum)
    }
}

/// Total frame size announced by a header
pub fn declared_frame_len(bytes: &[u8]) -> Option<usize> {
    bytes
        .get(HEADER_LEN - 1)
        .map(|&len| HEADER_LEN + len as usize + FOOTER_LEN)
}

/// A frame cut out of the receive stream, with its raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFrame {
    pub raw: Vec<u8>,
    /// `Ok`, `Nack` or `UnknownCommandEcho`; corrupt candidates are never returned
    pub decoded: Result<Frame, CodecError>,
}

/// Reassembles frames from arbitrarily split receive chunks
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet part of a complete frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Next complete frame, or `None` until more bytes arrive.
    ///
    /// Garbage before STX is skipped. A corrupt candidate costs one byte and
    /// the search restarts from the next STX.
    pub fn next_frame(&mut self, codec: &FrameCodec) -> Option<AssembledFrame> {
        loop {
            let start = match self.buffer.iter().position(|&b| b == STX) {
                Some(start) => start,
                None => {
                    self.buffer.clear();
                    return None;
                }
            };
            self.buffer.drain(..start);

            let need = declared_frame_len(&self.buffer)?;
            if self.buffer.len() < need {
                return None;
            }

            match codec.decode(&self.buffer[..need]) {
                Err(CodecError::ChecksumMismatch { .. })
                | Err(CodecError::Malformed(_))
                | Err(CodecError::Truncated) => {
                    warn!("Discarding corrupt frame candidate: {}", to_hex(&self.buffer[..need]));
                    self.buffer.drain(..1);
                }
                decoded => {
                    let raw: Vec<u8> = self.buffer.drain(..need).collect();
                    return Some(AssembledFrame { raw, decoded });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec::default()
    }

    // ===================
    // encode tests
    // ===================

    #[test]
    fn test_encode_rom_version_request() {
        let result = codec().encode_command(0x4F, &[0x90]).unwrap();
        assert_eq!(result, [0x02, 0x00, 0x4F, 0x01, 0x90, 0x03, 0xE5, 0x0D]);
    }

    #[test]
    fn test_encode_read_mode_request() {
        let result = codec().encode_command(0x4F, &[0x00]).unwrap();
        assert_eq!(result, [0x02, 0x00, 0x4F, 0x01, 0x00, 0x03, 0x55, 0x0D]);
    }

    #[test]
    fn test_encode_write_mode_request() {
        // RAM, command mode, reserved, flags 1Ch, speed, polling time
        let payload = [0x00, 0x00, 0x00, 0x1C, 0x00, 0x00, 0x00];
        let result = codec().encode_command(0x4E, &payload).unwrap();
        assert_eq!(
            result,
            [0x02, 0x00, 0x4E, 0x07, 0x00, 0x00, 0x00, 0x1C, 0x00, 0x00, 0x00, 0x03, 0x76, 0x0D]
        );
    }

    #[test]
    fn test_encode_inventory_request() {
        let result = codec().encode_command(0x78, &CommandTable::TR3.inventory_args).unwrap();
        assert_eq!(result, [0x02, 0x00, 0x78, 0x03, 0xF0, 0x40, 0x01, 0x03, 0xB1, 0x0D]);
    }

    #[test]
    fn test_encode_buzzer_short() {
        let result = codec().encode_command(0x42, &[0x01, 0x00]).unwrap();
        assert_eq!(result, [0x02, 0x00, 0x42, 0x02, 0x01, 0x00, 0x03, 0x4A, 0x0D]);
    }

    #[test]
    fn test_encode_buzzer_triple() {
        let result = codec().encode_command(0x42, &[0x01, 0x01]).unwrap();
        assert_eq!(result, [0x02, 0x00, 0x42, 0x02, 0x01, 0x01, 0x03, 0x4B, 0x0D]);
    }

    #[test]
    fn test_encode_empty_payload() {
        let result = codec().encode_command(0x30, &[]).unwrap();
        assert_eq!(result, [0x02, 0x00, 0x30, 0x00, 0x03, 0x35, 0x0D]);
    }

    #[test]
    fn test_encode_payload_too_long() {
        let payload = vec![0u8; 256];
        assert_eq!(
            codec().encode_command(0x4E, &payload),
            Err(CodecError::PayloadTooLong(256))
        );
    }

    #[test]
    fn test_encode_uses_configured_address() {
        let codec = FrameCodec::new(0x05, CommandTable::TR3, additive_checksum);
        let result = codec.encode_command(0x42, &[0x01, 0x00]).unwrap();
        assert_eq!(result[1], 0x05);
        assert_eq!(result[6], 0x4F);
    }

    #[test]
    fn test_xor_checksum_is_pluggable() {
        let codec = FrameCodec::new(0x00, CommandTable::TR3, xor_checksum);
        let bytes = codec.encode_command(0x42, &[0x01, 0x00]).unwrap();
        assert_eq!(bytes[6], 0x02 ^ 0x42 ^ 0x02 ^ 0x01 ^ 0x03);
        assert_eq!(codec.decode(&bytes).unwrap().payload, vec![0x01, 0x00]);
        // an additive codec rejects the same bytes
        assert!(matches!(
            FrameCodec::default().decode(&bytes),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    // ===================
    // decode tests
    // ===================

    #[test]
    fn test_round_trip_known_commands() {
        let codec = codec();
        let cases: Vec<(u8, Vec<u8>)> = vec![
            (0x4F, vec![0x90]),
            (0x4F, vec![0x00]),
            (0x4E, vec![0x00, 0x00, 0x00, 0x1C, 0x00, 0x00, 0x00]),
            (0x78, vec![0xF0, 0x40, 0x01]),
            (0x42, vec![0x01, 0x01]),
            (0x30, vec![]),
            (0x49, vec![0x00, 1, 2, 3, 4, 5, 6, 7, 0xE0]),
            (0x30, vec![0xAB; 255]),
        ];
        for (command, payload) in cases {
            let bytes = codec.encode_command(command, &payload).unwrap();
            assert_eq!(codec.decode(&bytes), Ok(Frame::new(0x00, command, payload)));
        }
    }

    #[test]
    fn test_decode_write_mode_ack() {
        let ack = [0x02, 0x00, 0x30, 0x01, 0x4E, 0x03, 0x84, 0x0D];
        let frame = codec().decode(&ack).unwrap();
        assert_eq!(frame.command, 0x30);
        assert_eq!(frame.detail(), Some(0x4E));
    }

    #[test]
    fn test_decode_buzzer_ack() {
        let ack = codec().encode_command(0x30, &[0x42]).unwrap();
        let frame = codec().decode(&ack).unwrap();
        assert_eq!(frame.command, 0x30);
        assert_eq!(frame.payload, vec![0x42]);
    }

    #[test]
    fn test_decode_nack_is_first_class() {
        // NACK echoing write-mode with a format error
        let nack = codec().encode_command(0x31, &[0x4E, 0x44]).unwrap();
        assert_eq!(codec().decode(&nack), Err(CodecError::Nack(NackReason::FormatError)));

        let nack = codec().encode_command(0x31, &[0x42, 0x42]).unwrap();
        assert_eq!(codec().decode(&nack), Err(CodecError::Nack(NackReason::ChecksumError)));

        let bare = codec().encode_command(0x31, &[]).unwrap();
        assert_eq!(codec().decode(&bare), Err(CodecError::Nack(NackReason::Other(0xFF))));
    }

    #[test]
    fn test_decode_unknown_command_echo() {
        let bytes = codec().encode_command(0x99, &[0x01]).unwrap();
        assert_eq!(codec().decode(&bytes), Err(CodecError::UnknownCommandEcho(0x99)));
    }

    #[test]
    fn test_decode_truncated() {
        let bytes = codec().encode_command(0x4E, &[0x00, 0x00, 0x00, 0x1C]).unwrap();
        for cut in 0..bytes.len() - 1 {
            assert_eq!(codec().decode(&bytes[..cut]), Err(CodecError::Truncated), "cut at {cut}");
        }
    }

    #[test]
    fn test_decode_cut_ending_like_a_trailer() {
        let bytes = codec().encode_command(0x30, &[0x03, 0x00, 0x0D, 0x11, 0x22]).unwrap();

        assert_eq!(
            codec().decode(&bytes[..7]),
            Err(CodecError::ChecksumMismatch {
                expected: 0x00,
                computed: 0x3A
            })
        );

        let mut assembler = FrameAssembler::new();
        assembler.push(&bytes[..7]);
        assert_eq!(assembler.next_frame(&codec()), None);
        assembler.push(&bytes[7..]);
        assert_eq!(assembler.next_frame(&codec()).unwrap().raw, bytes);
    }

    #[test]
    fn test_decode_checksum_sensitivity() {
        let codec = codec();
        let bytes = codec.encode_command(0x4E, &[0x00, 0x00, 0x00, 0x1C, 0x00, 0x00, 0x00]).unwrap();
        let sum_index = bytes.len() - 2;

        for index in 0..sum_index {
            for flip in [0x01u8, 0x80, 0xFF] {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= flip;
                assert!(
                    matches!(codec.decode(&corrupted), Err(CodecError::ChecksumMismatch { .. })),
                    "byte {index} flipped by {flip:02X}"
                );
            }
        }
    }

    #[test]
    fn test_decode_wrong_sum_byte() {
        let mut bytes = codec().encode_command(0x42, &[0x01, 0x00]).unwrap();
        bytes[6] = 0x00;
        assert_eq!(
            codec().decode(&bytes),
            Err(CodecError::ChecksumMismatch { expected: 0x00, computed: 0x4A })
        );
    }

    #[test]
    fn test_decode_missing_cr() {
        let mut bytes = codec().encode_command(0x42, &[0x01, 0x00]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0x0A;
        assert_eq!(codec().decode(&bytes), Err(CodecError::Malformed("missing ETX/CR")));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut bytes = codec().encode_command(0x42, &[0x01, 0x00]).unwrap();
        bytes.extend_from_slice(&[0x02, 0x00]);
        assert!(codec().decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_never_panics_on_garbage() {
        let codec = codec();
        let samples: [&[u8]; 6] = [
            &[],
            &[0x02],
            &[0x02, 0x00, 0x30, 0xFF, 0x03, 0x35, 0x0D],
            &[0xFF; 7],
            &[0x0D, 0x03, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00],
            &[0x02, 0x00, 0x30, 0x00, 0x03],
        ];
        for sample in samples {
            assert!(codec.decode(sample).is_err());
        }
    }

    // ===================
    // assembler tests
    // ===================

    #[test]
    fn test_assembler_split_chunks() {
        let codec = codec();
        let bytes = codec.encode_command(0x30, &[0x90, b'1', b'2', b'3', b'0']).unwrap();
        let mut assembler = FrameAssembler::new();

        assembler.push(&bytes[..3]);
        assert!(assembler.next_frame(&codec).is_none());
        assembler.push(&bytes[3..8]);
        assert!(assembler.next_frame(&codec).is_none());
        assembler.push(&bytes[8..]);

        let frame = assembler.next_frame(&codec).unwrap();
        assert_eq!(frame.raw, bytes);
        assert_eq!(frame.decoded.unwrap().payload, vec![0x90, b'1', b'2', b'3', b'0']);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_assembler_skips_noise_and_corrupt_frames() {
        let codec = codec();
        let good = codec.encode_command(0x30, &[0x42]).unwrap();
        let mut bad = codec.encode_command(0x30, &[0x4E]).unwrap();
        bad[4] = 0x4F;

        let mut assembler = FrameAssembler::new();
        assembler.push(&[0xFF, 0x00, 0x13]);
        assembler.push(&bad);
        assembler.push(&good);

        let frame = assembler.next_frame(&codec).unwrap();
        assert_eq!(frame.raw, good);
        assert!(assembler.next_frame(&codec).is_none());
    }

    #[test]
    fn test_assembler_yields_back_to_back_frames() {
        let codec = codec();
        let ack = codec.encode_command(0x30, &[0xF0, 0x01]).unwrap();
        let uid = codec.encode_command(0x49, &[0x00, 1, 2, 3, 4, 5, 6, 7, 0xE0]).unwrap();
        let nack = codec.encode_command(0x31, &[0x78, 0x44]).unwrap();

        let mut assembler = FrameAssembler::new();
        assembler.push(&[ack.clone(), uid.clone(), nack].concat());

        assert_eq!(assembler.next_frame(&codec).unwrap().decoded.unwrap().command, 0x30);
        assert_eq!(assembler.next_frame(&codec).unwrap().decoded.unwrap().command, 0x49);
        assert_eq!(
            assembler.next_frame(&codec).unwrap().decoded,
            Err(CodecError::Nack(NackReason::FormatError))
        );
        assert!(assembler.next_frame(&codec).is_none());
    }
}
