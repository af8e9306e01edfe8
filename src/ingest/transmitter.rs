//! transmitter.rs
//! Hands note events from the ingest loop to a note-output worker.
//!
//! The ingest loop never blocks on note output: `NoteTransmitter::transmit` is a `try_send`
//! into a bounded channel and drops the event when the queue is full. The worker drains the
//! channel into a `NoteSink` and exits once every transmitter has been dropped.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender, bounded};
use log::{debug, error, info, warn};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::protocol::notes::NoteEvent;
use crate::utils::metrics::SharedMetrics;

/// Anything that can play a note event.
pub trait NoteSink: Send {
    fn send(&mut self, event: NoteEvent) -> io::Result<()>;
}

/// Raw 3-byte MIDI channel messages to any writer.
pub struct MidiWriter<W: Write + Send> {
    out: W,
    channel: u8,
}

impl<W: Write + Send> MidiWriter<W> {
    pub fn new(out: W, channel: u8) -> Self {
        Self { out, channel }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl MidiWriter<File> {
    /// Opens a raw MIDI character device (e.g. `/dev/snd/midiC1D0`) for writing.
    pub fn open_device(path: &Path, channel: u8) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        info!("[Notes] MIDI output on {:?}, channel {}", path, channel);
        Ok(Self::new(file, channel))
    }
}

impl<W: Write + Send> NoteSink for MidiWriter<W> {
    fn send(&mut self, event: NoteEvent) -> io::Result<()> {
        self.out.write_all(&event.to_midi(self.channel))?;
        self.out.flush()
    }
}

/// Logs notes instead of playing them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NoteSink for LogSink {
    fn send(&mut self, event: NoteEvent) -> io::Result<()> {
        match event {
            NoteEvent::On { pitch, velocity } => {
                info!("[Notes] on  pitch={} velocity={}", pitch, velocity)
            }
            NoteEvent::Off { pitch, velocity } => {
                info!("[Notes] off pitch={} velocity={}", pitch, velocity)
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct NoteTransmitter {
    tx: Sender<NoteEvent>,
    metrics: SharedMetrics,
}

impl NoteTransmitter {
    pub fn new(tx: Sender<NoteEvent>, metrics: SharedMetrics) -> Self {
        Self { tx, metrics }
    }

    /// Non-blocking; drops the event when the worker is behind or gone.
    pub fn transmit(&self, event: NoteEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let dropped = {
                let mut m = self.metrics.lock();
                m.notes_dropped += 1;
                m.notes_dropped
            };
            if dropped == 1 || dropped % 100 == 0 {
                warn!("[Notes] queue full, dropped {} note(s) so far", dropped);
            }
            debug!("[Notes] try_send failed: {:?}", err);
        }
    }
}

/// Creates the bounded channel and its worker thread.
pub fn note_channel(
    capacity: usize,
    sink: Box<dyn NoteSink>,
    metrics: SharedMetrics,
) -> io::Result<(NoteTransmitter, JoinHandle<()>)> {
    let (tx, rx) = bounded(capacity);
    let worker = spawn_note_worker(rx, sink, metrics.clone())?;
    Ok((NoteTransmitter::new(tx, metrics), worker))
}

/// Worker runs at max OS priority when permitted, default priority otherwise.
pub fn spawn_note_worker(
    rx: Receiver<NoteEvent>,
    mut sink: Box<dyn NoteSink>,
    metrics: SharedMetrics,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("note_out".to_string())
        .spawn_with_priority(ThreadPriority::Max, move |priority| {
            if let Err(e) = priority {
                debug!("[Notes] running at default priority: {:?}", e);
            }

            while let Ok(event) = rx.recv() {
                match sink.send(event) {
                    Ok(()) => metrics.lock().notes_sent += 1,
                    Err(e) => {
                        let failed = {
                            let mut m = metrics.lock();
                            m.notes_failed += 1;
                            m.notes_failed
                        };
                        if failed == 1 || failed % 100 == 0 {
                            error!("[Notes] sink failed ({} so far): {}", failed, e);
                        }
                    }
                }
            }
            debug!("[Notes] worker exiting");
        })
}
