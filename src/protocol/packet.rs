//! packet.rs
//! PNP (Piano Network Protocol) packet classification, decoding and encoding.
//!
//! Wire layout, all packets:
//! ```text
//! byte 0      reserved, ignored
//! byte 1      bits 5..2 = board id (0-15), bits 1..0 = packet type
//! byte 2..    payload, by packet type
//! ```
//! - Type 3 (data): 8 hammer samples, 3 bytes each, big-endian 24-bit. 26 bytes total.
//! - Type 2 (event): 8 keys, 2 bytes each: state in the low 2 bits, then velocity. 18 bytes total.
//! - Types 0 and 1 are not defined by the protocol.
//!
//! Length is validated before any field access; a short buffer is a `DecodeError`, never a panic.

use log::debug;

use crate::error::DecodeError;

pub const HEADER_LEN: usize = 2;
pub const KEYS_PER_BOARD: usize = 8;
pub const DATA_PACKET_LEN: usize = HEADER_LEN + 3 * KEYS_PER_BOARD;
pub const EVENT_PACKET_LEN: usize = HEADER_LEN + 2 * KEYS_PER_BOARD;
pub const MAX_BOARD_ID: u8 = 0x0F;
/// Largest value a 24-bit sample can hold.
pub const SAMPLE_MAX: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Event = 2,
    Data = 3,
}

impl PacketType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x3 {
            2 => Some(PacketType::Event),
            3 => Some(PacketType::Data),
            _ => None,
        }
    }

    /// Total packet length including the header.
    pub fn wire_len(self) -> usize {
        match self {
            PacketType::Event => EVENT_PACKET_LEN,
            PacketType::Data => DATA_PACKET_LEN,
        }
    }
}

/// Per-key state carried in an event packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyState {
    #[default]
    NoEvent,
    KeyRelease,
    KeyStrike,
    /// Value 3, reserved by the protocol. Never produces a note.
    Reserved,
}

impl KeyState {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => KeyState::NoEvent,
            1 => KeyState::KeyRelease,
            2 => KeyState::KeyStrike,
            _ => KeyState::Reserved,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            KeyState::NoEvent => 0,
            KeyState::KeyRelease => 1,
            KeyState::KeyStrike => 2,
            KeyState::Reserved => 3,
        }
    }
}

/// One decoded packet. A fresh value is built per call; nothing is shared between packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPacket {
    /// Nothing received this cycle, or the bytes could not be decoded.
    Invalid,
    Event {
        board_id: u8,
        states: [KeyState; KEYS_PER_BOARD],
        velocities: [u8; KEYS_PER_BOARD],
    },
    Data {
        board_id: u8,
        samples: [u32; KEYS_PER_BOARD],
    },
}

impl DecodedPacket {
    pub fn board_id(&self) -> Option<u8> {
        match self {
            DecodedPacket::Invalid => None,
            DecodedPacket::Event { board_id, .. } | DecodedPacket::Data { board_id, .. } => {
                Some(*board_id)
            }
        }
    }

    #[inline]
    pub fn is_data_packet(&self) -> bool {
        matches!(self, DecodedPacket::Data { .. })
    }

    #[inline]
    pub fn is_event_packet(&self) -> bool {
        matches!(self, DecodedPacket::Event { .. })
    }

    pub fn samples(&self) -> Option<&[u32; KEYS_PER_BOARD]> {
        match self {
            DecodedPacket::Data { samples, .. } => Some(samples),
            _ => None,
        }
    }

    pub fn key_state(&self, key: usize) -> KeyState {
        match self {
            DecodedPacket::Event { states, .. } => {
                states.get(key).copied().unwrap_or_default()
            }
            _ => KeyState::NoEvent,
        }
    }

    pub fn is_note_on(&self, key: usize) -> bool {
        self.key_state(key) == KeyState::KeyStrike
    }

    pub fn is_note_off(&self, key: usize) -> bool {
        self.key_state(key) == KeyState::KeyRelease
    }

    /// Velocity of `key`, 0 for anything but an event packet.
    pub fn velocity(&self, key: usize) -> u8 {
        match self {
            DecodedPacket::Event { velocities, .. } => velocities.get(key).copied().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Transport-facing entry point: a timeout or undecodable bytes both yield `Invalid`.
pub fn decode(received: bool, bytes: &[u8]) -> DecodedPacket {
    if !received {
        return DecodedPacket::Invalid;
    }
    match try_decode(bytes) {
        Ok(packet) => packet,
        Err(e) => {
            debug!("[Decoder] dropping packet: {}", e);
            DecodedPacket::Invalid
        }
    }
}

/// Decode one received datagram, reporting why it was rejected.
pub fn try_decode(bytes: &[u8]) -> Result<DecodedPacket, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::MalformedHeader { got: bytes.len() });
    }

    let header = bytes[1];
    let board_id = (header >> 2) & MAX_BOARD_ID;
    let type_bits = header & 0x3;

    let packet_type = PacketType::from_bits(type_bits).ok_or(DecodeError::UnknownPacketType {
        packet_type: type_bits,
        board_id,
    })?;

    let needed = packet_type.wire_len();
    if bytes.len() < needed {
        return Err(DecodeError::ShortPacket {
            packet_type: type_bits,
            needed,
            got: bytes.len(),
        });
    }

    let payload = &bytes[HEADER_LEN..needed];
    let packet = match packet_type {
        PacketType::Data => {
            let mut samples = [0u32; KEYS_PER_BOARD];
            for (sample, field) in samples.iter_mut().zip(payload.chunks_exact(3)) {
                *sample = (u32::from(field[0]) << 16)
                    | (u32::from(field[1]) << 8)
                    | u32::from(field[2]);
            }
            DecodedPacket::Data { board_id, samples }
        }
        PacketType::Event => {
            let mut states = [KeyState::NoEvent; KEYS_PER_BOARD];
            let mut velocities = [0u8; KEYS_PER_BOARD];
            for (k, field) in payload.chunks_exact(2).enumerate() {
                states[k] = KeyState::from_bits(field[0]);
                velocities[k] = field[1];
            }
            DecodedPacket::Event {
                board_id,
                states,
                velocities,
            }
        }
    };

    Ok(packet)
}

#[inline]
fn header_byte(board_id: u8, packet_type: PacketType) -> u8 {
    ((board_id & MAX_BOARD_ID) << 2) | packet_type as u8
}

/// Board-side encoder for a data packet. Samples are masked to 24 bits.
pub fn encode_data_packet(board_id: u8, samples: &[u32; KEYS_PER_BOARD]) -> [u8; DATA_PACKET_LEN] {
    let mut out = [0u8; DATA_PACKET_LEN];
    out[1] = header_byte(board_id, PacketType::Data);
    for (field, &sample) in out[HEADER_LEN..].chunks_exact_mut(3).zip(samples) {
        let s = sample & SAMPLE_MAX;
        field[0] = (s >> 16) as u8;
        field[1] = (s >> 8) as u8;
        field[2] = s as u8;
    }
    out
}

/// Board-side encoder for an event packet.
pub fn encode_event_packet(
    board_id: u8,
    states: &[KeyState; KEYS_PER_BOARD],
    velocities: &[u8; KEYS_PER_BOARD],
) -> [u8; EVENT_PACKET_LEN] {
    let mut out = [0u8; EVENT_PACKET_LEN];
    out[1] = header_byte(board_id, PacketType::Event);
    for (k, field) in out[HEADER_LEN..].chunks_exact_mut(2).enumerate() {
        field[0] = states[k].bits();
        field[1] = velocities[k];
    }
    out
}
