//! config.rs
//! Explicit ingest configuration, loaded from TOML. Every field has a default, so an empty
//! file (or no file) gives the stock two-board setup:
//!
//! ```toml
//! data_dir = "data"
//!
//! [transport]
//! group = "239.1.1.1"
//! port = 5007
//! timeout_ms = 50
//!
//! [notes]
//! enabled = true
//! base_note = 60
//! device = "/dev/snd/midiC1D0"
//!
//! [[boards]]
//! board_id = 0
//! sample_rate = 500
//! rows_per_file = 4000
//! ```
//!
//! `timeout_ms` is the loop's only timing control. It bounds both the gap-fill resolution
//! (one timeout = `timeout * sample_rate` zero rows) and the latency of reacting to a stop
//! request. Larger values cost resolution and shutdown latency together.

use std::{
    collections::HashSet,
    fs,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::packet::{DATA_PACKET_LEN, KEYS_PER_BOARD, MAX_BOARD_ID};
use crate::protocol::notes::MIDI_MAX;

pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 1);
pub const DEFAULT_PORT: u16 = 5007;
pub const DEFAULT_TIMEOUT_MS: u64 = 50;
/// Larger than any PNP packet.
pub const DEFAULT_MAX_PACKET_LEN: usize = 32;
/// Middle C.
pub const DEFAULT_BASE_NOTE: u8 = 60;

/// One board stream: which board feeds it, its cadence, and the rotation size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    pub board_id: u8,
    /// Rows per second of this board's data.
    pub sample_rate: u32,
    /// Rows per ping-pong file before rotating.
    pub rows_per_file: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Local interface used to join the group.
    pub interface: Ipv4Addr,
    pub timeout_ms: u64,
    pub max_packet_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
        }
    }
}

impl TransportConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoteConfig {
    pub enabled: bool,
    pub base_note: u8,
    pub channel: u8,
    /// Raw MIDI device to write note messages to. Notes are only logged when unset.
    pub device: Option<PathBuf>,
    pub queue_capacity: usize,
}

impl Default for NoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_note: DEFAULT_BASE_NOTE,
            channel: 0,
            device: None,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub data_dir: PathBuf,
    /// Pin the ingest thread to this core.
    pub pin_core: Option<usize>,
    /// Append a run summary here on shutdown.
    pub summary_csv: Option<PathBuf>,
    pub transport: TransportConfig,
    pub notes: NoteConfig,
    pub boards: Vec<BoardConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            pin_core: None,
            summary_csv: None,
            transport: TransportConfig::default(),
            notes: NoteConfig::default(),
            boards: vec![
                BoardConfig {
                    board_id: 0,
                    sample_rate: 500,
                    rows_per_file: 4000,
                },
                BoardConfig {
                    board_id: 1,
                    sample_rate: 1000,
                    rows_per_file: 8000,
                },
            ],
        }
    }
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.boards.is_empty() {
            return invalid("at least one board stream is required".into());
        }

        let mut seen = HashSet::new();
        for b in &self.boards {
            if b.board_id > MAX_BOARD_ID {
                return invalid(format!("board_id {} exceeds {}", b.board_id, MAX_BOARD_ID));
            }
            if !seen.insert(b.board_id) {
                return invalid(format!("board_id {} configured twice", b.board_id));
            }
            if b.sample_rate == 0 {
                return invalid(format!("board {}: sample_rate must be > 0", b.board_id));
            }
            if b.rows_per_file == 0 {
                return invalid(format!("board {}: rows_per_file must be > 0", b.board_id));
            }
        }

        let t = &self.transport;
        if t.timeout_ms == 0 {
            return invalid("transport.timeout_ms must be > 0".into());
        }
        if t.max_packet_len < DATA_PACKET_LEN {
            return invalid(format!(
                "transport.max_packet_len {} is below the {}-byte data packet",
                t.max_packet_len, DATA_PACKET_LEN
            ));
        }

        let n = &self.notes;
        if n.channel > 0x0F {
            return invalid(format!("notes.channel {} exceeds 15", n.channel));
        }
        if u16::from(n.base_note) + (KEYS_PER_BOARD as u16 - 1) > u16::from(MIDI_MAX) {
            return invalid(format!("notes.base_note {} leaves keys above pitch 127", n.base_note));
        }
        if n.enabled && n.queue_capacity == 0 {
            return invalid("notes.queue_capacity must be > 0".into());
        }

        Ok(())
    }
}

fn invalid(message: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(message))
}
