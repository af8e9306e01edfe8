//! receiver.rs
//! The ingestion loop: receive → decode → notes → per-stream gap-fill and append.
//!
//! One thread owns the source and every `BoardStream`; nothing here is shared except the
//! metrics. Each stream sees every cycle, so a board's time axis keeps advancing while only
//! other boards are transmitting event packets.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use log::{error, info, warn};

use crate::config::IngestConfig;
use crate::error::{IngestError, StoreError};
use crate::ingest::transmitter::NoteTransmitter;
use crate::ingest::transport::PacketSource;
use crate::protocol::notes::note_events;
use crate::protocol::packet::{DecodedPacket, try_decode};
use crate::storage::gap_fill::{RowSource, plan_for_packet};
use crate::storage::ping_pong::{BoardStream, ZERO_ROW};
use crate::utils::metrics::{SharedMetrics, push_capped_u64};

/// Note output attached to the loop.
pub struct NoteOutput {
    pub transmitter: NoteTransmitter,
    pub base_note: u8,
}

pub struct IngestLoop<S: PacketSource> {
    source: S,
    streams: Vec<BoardStream>,
    notes: Option<NoteOutput>,
    metrics: SharedMetrics,
}

impl<S: PacketSource> IngestLoop<S> {
    pub fn new(
        source: S,
        streams: Vec<BoardStream>,
        notes: Option<NoteOutput>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            source,
            streams,
            notes,
            metrics,
        }
    }

    pub fn streams(&self) -> &[BoardStream] {
        &self.streams
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// One receive cycle. Only a store or transport failure is an error; bad packets are
    /// counted and treated like a timeout.
    pub fn step(&mut self) -> Result<(), IngestError> {
        let reception = self.source.receive()?;
        let cycle_start = Instant::now();
        let received = reception.received;
        let elapsed_ns = reception.elapsed_ns;

        let packet = if received {
            match try_decode(reception.bytes) {
                Ok(packet) => packet,
                Err(e) => {
                    let seen = self.metrics.lock().record_decode_error(&e);
                    if seen <= 5 || seen % 1000 == 0 {
                        warn!("[Ingest] dropped packet ({} of this kind): {}", seen, e);
                    }
                    DecodedPacket::Invalid
                }
            }
        } else {
            DecodedPacket::Invalid
        };

        if let Some(notes) = &self.notes {
            for event in note_events(&packet, notes.base_note) {
                notes.transmitter.transmit(event);
            }
        }

        let samples = packet.samples().copied().unwrap_or(ZERO_ROW);
        let mut sample_rows = 0u64;
        let mut zero_rows = 0u64;
        let mut rotations = 0u64;
        let mut per_board = Vec::with_capacity(self.streams.len());

        for stream in &mut self.streams {
            let plan = plan_for_packet(&packet, stream.board_id(), elapsed_ns, stream.sample_rate());
            if plan.is_empty() {
                continue;
            }
            let report = stream.write_plan(plan, &samples)?;

            match plan.source {
                RowSource::Samples => sample_rows += report.rows as u64,
                RowSource::Zeros => zero_rows += report.rows as u64,
            }
            rotations += u64::from(report.rotations);
            per_board.push((stream.board_id(), report.rows as u64));
        }

        let mut m = self.metrics.lock();
        if received {
            m.receptions += 1;
        } else {
            m.timeouts += 1;
        }
        match packet {
            DecodedPacket::Data { .. } => m.data_packets += 1,
            DecodedPacket::Event { .. } => m.event_packets += 1,
            DecodedPacket::Invalid => {}
        }
        m.sample_rows += sample_rows;
        m.zero_rows += zero_rows;
        m.rotations += rotations;
        for (board, rows) in per_board {
            *m.rows_per_board.entry(board).or_insert(0) += rows;
        }
        push_capped_u64(&mut m.receive_gap_us, elapsed_ns / 1_000);
        push_capped_u64(&mut m.cycle_us, cycle_start.elapsed().as_micros() as u64);

        Ok(())
    }

    /// Repeats `step` until `running` clears, then closes every stream.
    /// A failed cycle also closes the streams before the error is returned.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), IngestError> {
        info!("[Ingest] running with {} board stream(s)", self.streams.len());

        while running.load(Ordering::Acquire) {
            if let Err(e) = self.step() {
                error!("[Ingest] stopping: {}", e);
                if let Err(close_err) = self.close_streams() {
                    error!("[Ingest] close after failure: {}", close_err);
                }
                return Err(e);
            }
        }

        self.close_streams()?;
        info!("[Ingest] stopped");
        Ok(())
    }

    /// Flushes and closes every stream; reports the first failure after trying all of them.
    pub fn close_streams(&mut self) -> Result<(), StoreError> {
        let mut first_err = None;
        for stream in &mut self.streams {
            if let Err(e) = stream.close() {
                error!("[Ingest] board {} close failed: {}", stream.board_id(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// One stream per configured board, truncating both cache files of each.
pub fn open_streams(config: &IngestConfig) -> Result<Vec<BoardStream>, StoreError> {
    let mut streams: Vec<BoardStream> = Vec::with_capacity(config.boards.len());
    for board in &config.boards {
        match BoardStream::create(&config.data_dir, board) {
            Ok(stream) => streams.push(stream),
            Err(e) => {
                for opened in &mut streams {
                    if let Err(close_err) = opened.close() {
                        error!("[Ingest] board {} close failed: {}", opened.board_id(), close_err);
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoardConfig;
    use crate::ingest::transport::{ScriptedReception, ScriptedSource};
    use crate::protocol::packet::{KeyState, encode_data_packet, encode_event_packet};
    use crate::storage::reader::read_rows;
    use crate::utils::metrics::shared_metrics;
    use crossbeam::channel::bounded;

    fn config(dir: &std::path::Path, boards: &[(u8, u32, usize)]) -> IngestConfig {
        IngestConfig {
            data_dir: dir.to_path_buf(),
            boards: boards
                .iter()
                .map(|&(board_id, sample_rate, rows_per_file)| BoardConfig {
                    board_id,
                    sample_rate,
                    rows_per_file,
                })
                .collect(),
            ..IngestConfig::default()
        }
    }

    #[test]
    fn step_writes_samples_and_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &[(0, 1000, 100)]);
        let source = ScriptedSource::new(vec![
            ScriptedReception::packet(0, &encode_data_packet(0, &[5; 8])),
            ScriptedReception::timeout(10_000_000),
        ]);
        let mut ingest = IngestLoop::new(source, open_streams(&cfg).unwrap(), None, shared_metrics());

        ingest.step().unwrap();
        ingest.step().unwrap();

        let rows = read_rows(ingest.streams()[0].slot_path(0)).unwrap();
        assert_eq!(rows.len(), 11);
        assert_eq!(rows[0], [5; 8]);
        assert!(rows[1..].iter().all(|r| *r == ZERO_ROW));

        let m = ingest.metrics().lock();
        assert_eq!(m.receptions, 1);
        assert_eq!(m.timeouts, 1);
        assert_eq!(m.sample_rows, 1);
        assert_eq!(m.zero_rows, 10);
        assert_eq!(m.rows_per_board.get(&0), Some(&11));
    }

    #[test]
    fn events_become_notes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &[(0, 500, 100)]);
        let metrics = shared_metrics();
        let (tx, rx) = bounded(8);
        let notes = NoteOutput {
            transmitter: NoteTransmitter::new(tx, metrics.clone()),
            base_note: 60,
        };

        let mut states = [KeyState::NoEvent; 8];
        states[2] = KeyState::KeyStrike;
        states[5] = KeyState::KeyRelease;
        let mut velocities = [0u8; 8];
        velocities[2] = 90;
        let source = ScriptedSource::new(vec![ScriptedReception::packet(
            4_000_000,
            &encode_event_packet(0, &states, &velocities),
        )]);

        let mut ingest = IngestLoop::new(source, open_streams(&cfg).unwrap(), Some(notes), metrics);
        ingest.step().unwrap();

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                crate::protocol::notes::NoteEvent::On { pitch: 62, velocity: 90 },
                crate::protocol::notes::NoteEvent::Off { pitch: 65, velocity: 0 },
            ]
        );
        // the event packet still advances the time axis: 4 ms at 500 rows/s
        assert_eq!(ingest.streams()[0].row_cursor(), 2);
        assert_eq!(ingest.metrics().lock().event_packets, 1);
    }

    #[test]
    fn run_stops_and_closes_when_flag_is_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &[(0, 500, 10), (1, 500, 10)]);
        let mut ingest = IngestLoop::new(
            ScriptedSource::default(),
            open_streams(&cfg).unwrap(),
            None,
            shared_metrics(),
        );

        let running = AtomicBool::new(false);
        ingest.run(&running).unwrap();
        assert!(ingest.streams().iter().all(|s| !s.is_open()));
    }

    #[test]
    fn open_streams_fails_on_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("absent"), &[(0, 500, 10)]);
        assert!(matches!(open_streams(&cfg), Err(StoreError::Io { .. })));
    }
}
