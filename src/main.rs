//! # PNP Ingest Entry Point
//!
//! Joins the key boards' multicast group and records every configured board into its
//! ping-pong cache files until Enter is pressed on stdin (or, without a terminal, until signalled).
//!
//! ## Outputs
//! - `<data_dir>/cache{board}_{0,1}.txt`: 8 samples per row, one row per 1 / sample_rate s.
//! - Note events to a raw MIDI device (or the log) when `[notes] enabled = true`.
//! - Optional run summary appended to `summary_csv`.
//!
//! `RUST_LOG=debug` shows rotations and note-worker details.

use std::{
    fs::create_dir_all,
    io::{BufRead, stdin},
    path::PathBuf,
    process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use clap::Parser;
use log::{error, info, warn};

use pnp_ingest::{
    config::IngestConfig,
    error::{IngestError, StoreError},
    ingest::{
        receiver::{IngestLoop, NoteOutput, open_streams},
        transmitter::{LogSink, MidiWriter, NoteSink, note_channel},
        transport::MulticastReceiver,
    },
    utils::{
        export::export_summary_csv,
        metrics::{SharedMetrics, shared_metrics},
    },
};

#[derive(Debug, Parser)]
#[command(name = "pnp_ingest", about = "Record PNP key-board streams into ping-pong cache files")]
struct Args {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the configuration.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Disables note output even if the configuration enables it.
    #[arg(long)]
    no_notes: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    info!("=== PNP INGEST START ===");
    if let Err(e) = run(args) {
        error!("[Main] {}", e);
        process::exit(1);
    }
    info!("=== PNP INGEST FINISHED ===");
}

fn run(args: Args) -> Result<(), IngestError> {
    let mut config = match &args.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if args.no_notes {
        config.notes.enabled = false;
    }
    config.validate()?;

    create_dir_all(&config.data_dir).map_err(|e| StoreError::io(&config.data_dir, e))?;

    if let Some(core) = config.pin_core {
        pin_to_core(core);
    }

    let metrics = shared_metrics();
    let running = Arc::new(AtomicBool::new(true));
    spawn_stop_listener(running.clone());

    let source = MulticastReceiver::bind(&config.transport)?;
    let streams = open_streams(&config)?;
    let (notes, note_worker) = start_notes(&config, &metrics);

    let mut ingest = IngestLoop::new(source, streams, notes, metrics.clone());
    let result = ingest.run(&running);

    // Dropping the loop drops the last transmitter, which ends the note worker.
    drop(ingest);
    if let Some(handle) = note_worker {
        if handle.join().is_err() {
            error!("[Main] note worker panicked");
        }
    }

    let m = metrics.lock().clone();
    info!(
        "[Main] {} packets ({} data, {} event, {} invalid), {} timeouts, {} rows, {} rotations",
        m.receptions,
        m.data_packets,
        m.event_packets,
        m.invalid_packets(),
        m.timeouts,
        m.total_rows(),
        m.rotations
    );
    if let Some(path) = &config.summary_csv {
        if let Err(e) = export_summary_csv(path, &m) {
            error!("[Main] summary export failed: {}", e);
        }
    }

    result
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    if let Some(core_id) = core_ids.get(core) {
        if core_affinity::set_for_current(*core_id) {
            info!("[Main] ingest pinned to core {}", core);
        } else {
            error!("[Main] failed to pin ingest to core {}", core);
        }
    } else {
        error!("[Main] core {} not among available system cores", core);
    }
}

/// Clears `running` on Enter. Without a terminal (stdin at EOF) recording continues until
/// the process is signalled.
fn spawn_stop_listener(running: Arc<AtomicBool>) {
    println!("Recording. Press Enter to stop.");
    thread::spawn(move || {
        if wait_for_enter(stdin().lock()) {
            info!("[Main] stop requested");
            running.store(false, Ordering::Release);
        } else {
            info!("[Main] stdin closed; recording until the process is signalled");
        }
    });
}

/// True once a line is read; false on EOF or a read error.
fn wait_for_enter(mut input: impl BufRead) -> bool {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(n) => n > 0,
        Err(e) => {
            warn!("[Main] cannot read stdin: {}", e);
            false
        }
    }
}

/// Note output never stops ingest: a device that cannot be opened falls back to logging,
/// and a worker that cannot be spawned disables notes.
fn start_notes(
    config: &IngestConfig,
    metrics: &SharedMetrics,
) -> (Option<NoteOutput>, Option<JoinHandle<()>>) {
    let notes = &config.notes;
    if !notes.enabled {
        return (None, None);
    }

    let sink: Box<dyn NoteSink> = match &notes.device {
        Some(path) => match MidiWriter::open_device(path, notes.channel) {
            Ok(midi) => Box::new(midi),
            Err(e) => {
                warn!("[Main] cannot open MIDI device {:?}: {}; logging notes instead", path, e);
                Box::new(LogSink)
            }
        },
        None => Box::new(LogSink),
    };

    match note_channel(notes.queue_capacity, sink, metrics.clone()) {
        Ok((transmitter, worker)) => (
            Some(NoteOutput {
                transmitter,
                base_note: notes.base_note,
            }),
            Some(worker),
        ),
        Err(e) => {
            error!("[Main] note worker failed to start: {}; notes disabled", e);
            (None, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn enter_stops_recording() {
        assert!(wait_for_enter(Cursor::new("\n")));
        assert!(wait_for_enter(Cursor::new("q\n")));
    }

    #[test]
    fn closed_stdin_does_not_stop_recording() {
        assert!(!wait_for_enter(Cursor::new("")));
        assert!(!wait_for_enter(std::io::empty()));
    }

    #[test]
    fn cli_flags() {
        let args = Args::try_parse_from(["pnp_ingest", "--data-dir", "/tmp/pnp", "--no-notes"]).unwrap();
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/pnp")));
        assert!(args.no_notes);
        assert!(args.config.is_none());
    }
}
