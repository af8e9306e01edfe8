//! reader.rs
//! Reader side of the ping-pong cache: parse a cache file back into rows.
//!
//! A concurrent consumer (plotting, analytics) should only read the inactive slot,
//! see `stable_window`. The active slot may be mid-append.

use std::path::{Path, PathBuf};

use csv::ReaderBuilder;

use crate::error::StoreError;
use crate::protocol::packet::KEYS_PER_BOARD;
use crate::storage::ping_pong::{Row, cache_file_path};

/// Parses a whole cache file. Every line must hold exactly 8 unsigned integers.
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<Row>, StoreError> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let line = idx as u64 + 1;

        if record.len() != KEYS_PER_BOARD {
            return Err(StoreError::BadRow {
                path: path.to_path_buf(),
                line,
                message: format!("expected {} fields, got {}", KEYS_PER_BOARD, record.len()),
            });
        }

        let mut row: Row = [0; KEYS_PER_BOARD];
        for (value, field) in row.iter_mut().zip(record.iter()) {
            *value = field.parse().map_err(|e| StoreError::BadRow {
                path: path.to_path_buf(),
                line,
                message: format!("{:?}: {}", field, e),
            })?;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Rows of the slot the writer is not touching.
pub fn stable_window(dir: &Path, board_id: u8, active_slot: usize) -> Result<Vec<Row>, StoreError> {
    read_rows(inactive_path(dir, board_id, active_slot))
}

pub fn inactive_path(dir: &Path, board_id: u8, active_slot: usize) -> PathBuf {
    cache_file_path(dir, board_id, 1 - (active_slot & 1))
}

fn csv_error(path: &Path, e: csv::Error) -> StoreError {
    let line = e.position().map(|p| p.line()).unwrap_or(0);
    let message = e.to_string();
    match e.into_kind() {
        csv::ErrorKind::Io(source) => StoreError::io(path, source),
        _ => StoreError::BadRow {
            path: path.to_path_buf(),
            line,
            message,
        },
    }
}
