//! ping_pong.rs
//! Two-file rotating sample store, one instance per board stream.
//!
//! Rows are appended to the active slot until it holds `rows_per_file` rows. The next row
//! closes it, truncates the other slot and continues there. The inactive slot therefore always
//! holds a complete, finalized window (or is empty right after construction), which a reader
//! can consume while the writer keeps appending to the active one.
//!
//! - At most one file is open at any time.
//! - Rows are buffered only for the duration of one append call; every call ends with a flush.
//! - Row format: 8 unsigned decimals separated by single spaces, newline terminated.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    iter,
    path::{Path, PathBuf},
};

use log::{debug, error, info};

use crate::config::BoardConfig;
use crate::error::StoreError;
use crate::protocol::packet::KEYS_PER_BOARD;
use crate::storage::gap_fill::{RowPlan, RowSource};

/// One line of a cache file: a sample per hammer.
pub type Row = [u32; KEYS_PER_BOARD];

pub const ZERO_ROW: Row = [0; KEYS_PER_BOARD];

/// `cache{board}_{slot}.txt`
pub fn cache_file_name(board_id: u8, slot: usize) -> String {
    format!("cache{}_{}.txt", board_id, slot)
}

pub fn cache_file_path(dir: &Path, board_id: u8, slot: usize) -> PathBuf {
    dir.join(cache_file_name(board_id, slot))
}

/// Outcome of one append call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppendReport {
    pub rows: usize,
    pub rotations: u32,
}

pub struct BoardStream {
    board_id: u8,
    sample_rate: u32,
    rows_per_file: usize,
    dir: PathBuf,
    active_slot: usize,
    row_cursor: usize,
    writer: Option<BufWriter<File>>,
    rotations: u64,
}

impl BoardStream {
    /// Truncates both slots and opens slot 0 as the active file.
    /// Constructing twice against the same directory leaves no rows from the first run.
    pub fn create(dir: impl AsRef<Path>, board: &BoardConfig) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();

        let standby = cache_file_path(&dir, board.board_id, 1);
        File::create(&standby).map_err(|e| StoreError::io(&standby, e))?;

        let active = cache_file_path(&dir, board.board_id, 0);
        let file = File::create(&active).map_err(|e| StoreError::io(&active, e))?;

        info!(
            "[Store] board {} stream ready: {} rows/s, {} rows per file, {:?}",
            board.board_id, board.sample_rate, board.rows_per_file, dir
        );

        Ok(Self {
            board_id: board.board_id,
            sample_rate: board.sample_rate,
            rows_per_file: board.rows_per_file,
            dir,
            active_slot: 0,
            row_cursor: 0,
            writer: Some(BufWriter::new(file)),
            rotations: 0,
        })
    }

    #[inline]
    pub fn board_id(&self) -> u8 {
        self.board_id
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn rows_per_file(&self) -> usize {
        self.rows_per_file
    }

    #[inline]
    pub fn active_slot(&self) -> usize {
        self.active_slot
    }

    #[inline]
    pub fn inactive_slot(&self) -> usize {
        1 - self.active_slot
    }

    /// Rows already written into the active slot.
    #[inline]
    pub fn row_cursor(&self) -> usize {
        self.row_cursor
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn slot_path(&self, slot: usize) -> PathBuf {
        cache_file_path(&self.dir, self.board_id, slot)
    }

    pub fn append_rows(&mut self, rows: &[Row]) -> Result<AppendReport, StoreError> {
        self.append_iter(rows.iter())
    }

    /// Appends `count` copies of `row` without materializing them.
    pub fn append_repeated(&mut self, row: &Row, count: usize) -> Result<AppendReport, StoreError> {
        self.append_iter(iter::repeat_n(row, count))
    }

    /// Writes what the gap-fill policy decided. `samples` is only read for `RowSource::Samples`.
    pub fn write_plan(&mut self, plan: RowPlan, samples: &Row) -> Result<AppendReport, StoreError> {
        match plan.source {
            RowSource::Samples => self.append_repeated(samples, plan.count),
            RowSource::Zeros => self.append_repeated(&ZERO_ROW, plan.count),
        }
    }

    fn append_iter<'a, I>(&mut self, mut rows: I) -> Result<AppendReport, StoreError>
    where
        I: ExactSizeIterator<Item = &'a Row>,
    {
        let mut report = AppendReport::default();
        let mut remaining = rows.len();
        if remaining == 0 {
            return Ok(report);
        }

        while remaining > 0 {
            // Active slot is full: finalize it before the next row.
            if self.row_cursor >= self.rows_per_file {
                self.rotate()?;
                report.rotations += 1;
            }

            let take = remaining.min(self.rows_per_file - self.row_cursor);
            let path = self.slot_path(self.active_slot);
            let writer = self.active_writer()?;
            let written = rows
                .by_ref()
                .take(take)
                .try_for_each(|row| write_row(writer, row));
            if let Err(e) = written {
                self.abandon();
                return Err(StoreError::io(path, e));
            }

            self.row_cursor += take;
            remaining -= take;
            report.rows += take;
        }

        self.flush_active()?;
        Ok(report)
    }

    /// Closes the full active slot and reopens the other one truncated.
    fn rotate(&mut self) -> Result<(), StoreError> {
        self.flush_active()?;
        self.writer = None;

        let next_slot = self.inactive_slot();
        let path = self.slot_path(next_slot);
        let file = File::create(&path).map_err(|e| StoreError::io(&path, e))?;

        self.writer = Some(BufWriter::new(file));
        self.active_slot = next_slot;
        self.row_cursor = 0;
        self.rotations += 1;

        debug!(
            "[Store] board {} rotated to slot {} (rotation #{})",
            self.board_id, self.active_slot, self.rotations
        );
        Ok(())
    }

    fn active_writer(&mut self) -> Result<&mut BufWriter<File>, StoreError> {
        let path = self.slot_path(self.active_slot);
        self.writer
            .as_mut()
            .ok_or_else(|| StoreError::io(path, io::Error::other("stream is closed")))
    }

    fn flush_active(&mut self) -> Result<(), StoreError> {
        let path = self.slot_path(self.active_slot);
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                self.abandon();
                return Err(StoreError::io(path, e));
            }
        }
        Ok(())
    }

    /// Drops the handle after a failed write; the stream stays closed.
    fn abandon(&mut self) {
        if let Some(writer) = self.writer.take() {
            // BufWriter would retry the flush on drop; release the file without it.
            let _ = writer.into_parts();
        }
    }

    /// Flushes and closes the active file. Further appends fail.
    pub fn close(&mut self) -> Result<(), StoreError> {
        self.flush_active()?;
        if self.writer.take().is_some() {
            debug!(
                "[Store] board {} closed at slot {} row {}",
                self.board_id, self.active_slot, self.row_cursor
            );
        }
        Ok(())
    }
}

impl Drop for BoardStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("[Store] board {} close on drop failed: {}", self.board_id, e);
        }
    }
}

fn write_row<W: Write>(w: &mut W, row: &Row) -> io::Result<()> {
    writeln!(
        w,
        "{} {} {} {} {} {} {} {}",
        row[0], row[1], row[2], row[3], row[4], row[5], row[6], row[7]
    )
}
