//! End-to-end: scripted datagrams through `IngestLoop` into ping-pong files in a temp dir.

use std::{fs, sync::atomic::AtomicBool};

use pnp_ingest::{
    config::{BoardConfig, IngestConfig},
    error::{IngestError, StoreError},
    ingest::{
        receiver::{IngestLoop, open_streams},
        transport::{ScriptedReception, ScriptedSource},
    },
    protocol::packet::{KeyState, encode_data_packet, encode_event_packet},
    storage::{
        ping_pong::{ZERO_ROW, cache_file_path},
        reader::{read_rows, stable_window},
    },
    utils::metrics::shared_metrics,
};

const MS: u64 = 1_000_000;

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

fn run_script(cfg: &IngestConfig, script: Vec<ScriptedReception>) -> pnp_ingest::utils::metrics::IngestMetrics {
    let steps = script.len();
    let metrics = shared_metrics();
    let mut ingest = IngestLoop::new(
        ScriptedSource::new(script),
        open_streams(cfg).unwrap(),
        None,
        metrics.clone(),
    );
    for _ in 0..steps {
        ingest.step().unwrap();
    }
    ingest.run(&AtomicBool::new(false)).unwrap();
    let m = metrics.lock().clone();
    m
}

#[test]
fn packets_are_routed_to_their_board_only() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &[(0, 500, 100), (1, 1000, 100)]);

    run_script(
        &cfg,
        vec![
            ScriptedReception::packet(0, &encode_data_packet(0, &[10; 8])),
            ScriptedReception::packet(0, &encode_data_packet(1, &[20; 8])),
            ScriptedReception::packet(0, &encode_data_packet(1, &[21; 8])),
            ScriptedReception::packet(0, &encode_data_packet(2, &[99; 8])),
        ],
    );

    assert_eq!(read_rows(cache_file_path(dir.path(), 0, 0)).unwrap(), vec![[10; 8]]);
    assert_eq!(
        read_rows(cache_file_path(dir.path(), 1, 0)).unwrap(),
        vec![[20; 8], [21; 8]]
    );
    // board 2 has no stream and leaves no file
    assert!(!cache_file_path(dir.path(), 2, 0).exists());
}

#[test]
fn timeouts_advance_every_stream_at_its_own_rate() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &[(0, 500, 1000), (1, 1000, 1000)]);

    let m = run_script(
        &cfg,
        vec![
            ScriptedReception::timeout(50 * MS),
            ScriptedReception::timeout(50 * MS),
        ],
    );

    assert_eq!(read_rows(cache_file_path(dir.path(), 0, 0)).unwrap(), vec![ZERO_ROW; 50]);
    assert_eq!(read_rows(cache_file_path(dir.path(), 1, 0)).unwrap(), vec![ZERO_ROW; 100]);
    assert_eq!(m.timeouts, 2);
    assert_eq!(m.zero_rows, 150);
}

#[test]
fn short_and_unknown_packets_count_as_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &[(0, 1000, 1000)]);

    let data = encode_data_packet(0, &[7; 8]);
    let unknown_type = [0u8, 0b0000_0001];
    let m = run_script(
        &cfg,
        vec![
            ScriptedReception::packet(3 * MS, &data[..20]),
            ScriptedReception::packet(2 * MS, &[0x00]),
            ScriptedReception::packet(4 * MS, &unknown_type),
            ScriptedReception::packet(MS, &data),
        ],
    );

    let rows = read_rows(cache_file_path(dir.path(), 0, 0)).unwrap();
    assert_eq!(rows.len(), 3 + 2 + 4 + 1);
    assert!(rows[..9].iter().all(|r| *r == ZERO_ROW));
    assert_eq!(rows[9], [7; 8]);

    assert_eq!(m.short_packets, 1);
    assert_eq!(m.malformed_headers, 1);
    assert_eq!(m.unknown_types, 1);
    assert_eq!(m.data_packets, 1);
    assert_eq!(m.receptions, 4);
}

#[test]
fn event_packets_fill_time_but_write_no_samples() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &[(0, 500, 1000)]);

    let mut states = [KeyState::NoEvent; 8];
    states[3] = KeyState::KeyStrike;
    let m = run_script(
        &cfg,
        vec![ScriptedReception::packet(
            10 * MS,
            &encode_event_packet(0, &states, &[0, 0, 0, 64, 0, 0, 0, 0]),
        )],
    );

    assert_eq!(read_rows(cache_file_path(dir.path(), 0, 0)).unwrap(), vec![ZERO_ROW; 5]);
    assert_eq!(m.event_packets, 1);
    assert_eq!(m.sample_rows, 0);
}

#[test]
fn rotation_leaves_a_complete_stable_window() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &[(4, 1000, 10)]);

    let mut script: Vec<_> = (0..8u32)
        .map(|i| ScriptedReception::packet(0, &encode_data_packet(4, &[i; 8])))
        .collect();
    // 5 ms at 1000 rows/s: 2 rows fill slot 0, 3 spill into slot 1
    script.push(ScriptedReception::timeout(5 * MS));

    let metrics = shared_metrics();
    let mut ingest = IngestLoop::new(
        ScriptedSource::new(script),
        open_streams(&cfg).unwrap(),
        None,
        metrics.clone(),
    );
    for _ in 0..9 {
        ingest.step().unwrap();
    }

    let stream = &ingest.streams()[0];
    assert_eq!(stream.active_slot(), 1);
    assert_eq!(stream.row_cursor(), 3);

    let window = stable_window(dir.path(), 4, stream.active_slot()).unwrap();
    assert_eq!(window.len(), 10);
    assert_eq!(window[7], [7; 8]);
    assert_eq!(window[8..], [ZERO_ROW, ZERO_ROW]);
    assert_eq!(read_rows(cache_file_path(dir.path(), 4, 1)).unwrap(), vec![ZERO_ROW; 3]);
    assert_eq!(metrics.lock().rotations, 1);
}

#[test]
fn restart_discards_previous_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &[(0, 1000, 4)]);

    run_script(&cfg, vec![ScriptedReception::timeout(6 * MS)]);
    assert_eq!(read_rows(cache_file_path(dir.path(), 0, 1)).unwrap().len(), 2);

    run_script(&cfg, vec![ScriptedReception::packet(0, &encode_data_packet(0, &[1; 8]))]);
    assert_eq!(read_rows(cache_file_path(dir.path(), 0, 0)).unwrap(), vec![[1; 8]]);
    assert!(read_rows(cache_file_path(dir.path(), 0, 1)).unwrap().is_empty());
}

/// Descriptors of this process currently open on `path`.
#[cfg(target_os = "linux")]
fn open_handles(path: &std::path::Path) -> usize {
    let path = fs::canonicalize(path).unwrap();
    fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| fs::read_link(entry.path()).ok())
        .filter(|target| *target == path)
        .count()
}

#[test]
fn failed_rotation_ends_run_and_closes_every_stream() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &[(0, 1000, 4), (1, 1000, 100)]);
    let streams = open_streams(&cfg).unwrap();

    // slot 1 can no longer be reopened for writing
    let standby = cache_file_path(dir.path(), 0, 1);
    fs::remove_file(&standby).unwrap();
    fs::create_dir(&standby).unwrap();

    let mut ingest = IngestLoop::new(
        ScriptedSource::new(vec![ScriptedReception::timeout(6 * MS)]),
        streams,
        None,
        shared_metrics(),
    );

    match ingest.run(&AtomicBool::new(true)) {
        Err(IngestError::Store(StoreError::Io { path, .. })) => {
            assert!(path.ends_with("cache0_1.txt"), "unexpected path {:?}", path)
        }
        other => panic!("expected a store I/O error, got {:?}", other),
    }
    assert!(ingest.streams().iter().all(|s| !s.is_open()));
    // the full slot was flushed before the rotation failed
    assert_eq!(read_rows(cache_file_path(dir.path(), 0, 0)).unwrap(), vec![ZERO_ROW; 4]);

    #[cfg(target_os = "linux")]
    for board in 0..2 {
        assert_eq!(open_handles(&cache_file_path(dir.path(), board, 0)), 0);
    }
}

#[test]
fn failed_open_closes_streams_already_opened() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &[(0, 1000, 10), (1, 1000, 10)]);

    // board 1's standby slot cannot be created
    fs::create_dir(cache_file_path(dir.path(), 1, 1)).unwrap();

    match open_streams(&cfg) {
        Err(StoreError::Io { path, .. }) => assert!(path.ends_with("cache1_1.txt")),
        other => panic!("expected a store I/O error, got {:?}", other.map(|s| s.len())),
    }

    // board 0 was set up before the failure, then released
    for slot in 0..2 {
        let path = cache_file_path(dir.path(), 0, slot);
        assert!(read_rows(&path).unwrap().is_empty());
        #[cfg(target_os = "linux")]
        assert_eq!(open_handles(&path), 0);
    }
}
