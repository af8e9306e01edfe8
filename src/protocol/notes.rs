//! notes.rs
//! Key event → note translation for the external sound module.
//!
//! Pitch = base note + key index within the packet. Release is checked before strike;
//! a key carries exactly one state, so this only fixes the evaluation order.

use crate::protocol::packet::{DecodedPacket, KEYS_PER_BOARD};

/// Highest valid MIDI pitch / velocity.
pub const MIDI_MAX: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEvent {
    On { pitch: u8, velocity: u8 },
    Off { pitch: u8, velocity: u8 },
}

impl NoteEvent {
    pub fn pitch(&self) -> u8 {
        match self {
            NoteEvent::On { pitch, .. } | NoteEvent::Off { pitch, .. } => *pitch,
        }
    }

    pub fn velocity(&self) -> u8 {
        match self {
            NoteEvent::On { velocity, .. } | NoteEvent::Off { velocity, .. } => *velocity,
        }
    }

    /// Raw 3-byte MIDI channel message.
    pub fn to_midi(&self, channel: u8) -> [u8; 3] {
        let status = match self {
            NoteEvent::On { .. } => 0x90,
            NoteEvent::Off { .. } => 0x80,
        };
        [
            status | (channel & 0x0F),
            self.pitch() & MIDI_MAX,
            self.velocity() & MIDI_MAX,
        ]
    }
}

/// Notes carried by an event packet, in key order. Anything else yields nothing.
pub fn note_events(packet: &DecodedPacket, base_note: u8) -> Vec<NoteEvent> {
    if !packet.is_event_packet() {
        return Vec::new();
    }

    (0..KEYS_PER_BOARD)
        .filter_map(|key| {
            let pitch = base_note.saturating_add(key as u8);
            let velocity = packet.velocity(key);
            if packet.is_note_off(key) {
                Some(NoteEvent::Off { pitch, velocity })
            } else if packet.is_note_on(key) {
                Some(NoteEvent::On { pitch, velocity })
            } else {
                None
            }
        })
        .collect()
}
