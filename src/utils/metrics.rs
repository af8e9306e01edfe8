//! metrics.rs
//! Counters and bounded histories for the ingest loop.
//!
//! Shared between the ingest thread and the note worker. Counters grow for the whole run;
//! the timing histories keep the 1000 most recent points.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::error::DecodeError;

#[derive(Debug, Default, Clone)]
pub struct IngestMetrics {
    /// Receive attempts that returned a datagram.
    pub receptions: u64,
    /// Receive attempts that timed out.
    pub timeouts: u64,

    pub data_packets: u64,
    pub event_packets: u64,
    pub short_packets: u64,
    pub malformed_headers: u64,
    pub unknown_types: u64,

    /// Real sample rows written, all streams.
    pub sample_rows: u64,
    /// Gap-fill rows written, all streams.
    pub zero_rows: u64,
    pub rotations: u64,
    /// Rows written per board stream.
    pub rows_per_board: BTreeMap<u8, u64>,

    pub notes_sent: u64,
    pub notes_dropped: u64,
    pub notes_failed: u64,

    /// Elapsed time reported by each receive (µs).
    pub receive_gap_us: VecDeque<u64>,
    /// Decode + write time per cycle (µs).
    pub cycle_us: VecDeque<u64>,
}

impl IngestMetrics {
    /// Counts a decode failure; returns how many of that kind have been seen so far.
    pub fn record_decode_error(&mut self, err: &DecodeError) -> u64 {
        let counter = match err {
            DecodeError::ShortPacket { .. } => &mut self.short_packets,
            DecodeError::MalformedHeader { .. } => &mut self.malformed_headers,
            DecodeError::UnknownPacketType { .. } => &mut self.unknown_types,
        };
        *counter += 1;
        *counter
    }

    pub fn invalid_packets(&self) -> u64 {
        self.short_packets + self.malformed_headers + self.unknown_types
    }

    pub fn total_rows(&self) -> u64 {
        self.sample_rows + self.zero_rows
    }
}

pub type SharedMetrics = Arc<Mutex<IngestMetrics>>;

pub fn shared_metrics() -> SharedMetrics {
    Arc::new(Mutex::new(IngestMetrics::default()))
}

pub const MAX_POINTS: usize = 1_000;

/// Appends value to a history; drops the oldest at capacity.
#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Min, max and mean of a u64 history (cast to f64).
pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_capped() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS as u64 + 10) {
            push_capped_u64(&mut buf, i);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front(), Some(&10));
    }

    #[test]
    fn stats_of_history() {
        let buf: VecDeque<u64> = [2, 4, 9].into_iter().collect();
        let stats = calculate_stats_u64(&buf).unwrap();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.count, 3);
        assert!(calculate_stats_u64(&VecDeque::new()).is_none());
    }

    #[test]
    fn decode_errors_are_counted_by_kind() {
        let mut m = IngestMetrics::default();
        let short = DecodeError::ShortPacket {
            packet_type: 3,
            needed: 26,
            got: 10,
        };
        assert_eq!(m.record_decode_error(&short), 1);
        assert_eq!(m.record_decode_error(&short), 2);
        assert_eq!(m.record_decode_error(&DecodeError::MalformedHeader { got: 1 }), 1);
        assert_eq!(m.short_packets, 2);
        assert_eq!(m.invalid_packets(), 3);
    }
}
