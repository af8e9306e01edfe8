//! error.rs
//! Error taxonomy for the ingest pipeline, one enum per layer.
//!
//! - `DecodeError`: a packet was present but cannot be decoded. Local to one packet, never fatal.
//! - `StoreError`: a ping-pong cache file could not be opened, written or flushed. Always carries the path.
//! - `TransportError`: socket setup or a non-timeout receive failure.
//! - `ConfigError`: configuration file missing, unparsable or semantically invalid.
//!
//! A receive timeout is not an error: it surfaces as a `Reception` with `received == false`.

use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Fewer bytes than the declared packet type requires.
    #[error("short packet: type {packet_type} needs {needed} bytes, got {got}")]
    ShortPacket {
        packet_type: u8,
        needed: usize,
        got: usize,
    },

    /// Not even the two header bytes are present.
    #[error("malformed header: need 2 bytes, got {got}")]
    MalformedHeader { got: usize },

    /// Type bits outside the two types the protocol defines.
    #[error("unknown packet type {packet_type} from board {board_id}")]
    UnknownPacketType { packet_type: u8, board_id: u8 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache file I/O failed on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache file {path:?} line {line}: {message}")]
    BadRow {
        path: PathBuf,
        line: u64,
        message: String,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Anything that ends the ingest loop.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
