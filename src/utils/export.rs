//! export.rs
//! End-of-run summary: one `metric,value,description` row per figure, appended to a CSV so
//! repeated runs accumulate in one file. The header is only written when the file is new.

use std::{
    fs::OpenOptions,
    io,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use csv::WriterBuilder;
use log::info;
use serde::Serialize;

use crate::error::StoreError;
use crate::utils::metrics::{IngestMetrics, calculate_stats_u64};

#[derive(Debug, Serialize)]
struct SummaryRow {
    run_epoch_s: u64,
    metric: String,
    value: String,
    description: String,
}

/// Flattens the metrics into (metric, value, description) triples.
pub fn summary_rows(m: &IngestMetrics) -> Vec<(String, String, String)> {
    let mut rows = Vec::new();
    let mut push = |metric: &str, value: String, description: &str| {
        rows.push((metric.to_string(), value, description.to_string()));
    };

    push("receptions", m.receptions.to_string(), "Datagrams received");
    push("timeouts", m.timeouts.to_string(), "Receive timeouts");
    push("data_packets", m.data_packets.to_string(), "Decoded data packets");
    push("event_packets", m.event_packets.to_string(), "Decoded event packets");
    push("short_packets", m.short_packets.to_string(), "Packets shorter than their type requires");
    push("malformed_headers", m.malformed_headers.to_string(), "Datagrams under 2 bytes");
    push("unknown_types", m.unknown_types.to_string(), "Packets with undefined type bits");
    push("sample_rows", m.sample_rows.to_string(), "Real sample rows written");
    push("zero_rows", m.zero_rows.to_string(), "Gap-fill rows written");
    push("rotations", m.rotations.to_string(), "Ping-pong file rotations");
    for (board, rows) in &m.rows_per_board {
        push(&format!("board{}_rows", board), rows.to_string(), "Rows written for this board");
    }
    push("notes_sent", m.notes_sent.to_string(), "Note messages delivered");
    push("notes_dropped", m.notes_dropped.to_string(), "Note messages dropped on a full queue");
    push("notes_failed", m.notes_failed.to_string(), "Note messages the sink rejected");

    if let Some(s) = calculate_stats_u64(&m.receive_gap_us) {
        push("receive_gap_min_us", format!("{:.2}", s.min), "Minimum time between receives");
        push("receive_gap_max_us", format!("{:.2}", s.max), "Maximum time between receives");
        push("receive_gap_avg_us", format!("{:.2}", s.mean), "Average time between receives");
    }
    if let Some(s) = calculate_stats_u64(&m.cycle_us) {
        push("cycle_min_us", format!("{:.2}", s.min), "Minimum decode + write time");
        push("cycle_max_us", format!("{:.2}", s.max), "Maximum decode + write time");
        push("cycle_avg_us", format!("{:.2}", s.mean), "Average decode + write time");
    }

    rows
}

pub fn export_summary_csv(path: &Path, metrics: &IngestMetrics) -> Result<(), StoreError> {
    let file_exists = path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    let run_epoch_s = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    for (metric, value, description) in summary_rows(metrics) {
        writer
            .serialize(SummaryRow {
                run_epoch_s,
                metric,
                value,
                description,
            })
            .map_err(|e| StoreError::io(path, io::Error::from(e)))?;
    }
    writer.flush().map_err(|e| StoreError::io(path, e))?;

    info!("[Export] summary appended to {:?}", path);
    Ok(())
}
