//! # PNP Board Simulator
//!
//! Plays the key boards for bench testing without hardware. Reads the same TOML as
//! `pnp_ingest` and runs one thread per configured board, sending to the configured group:
//!
//! strike event (random key, random velocity) → burst of data packets at the board's sample
//! rate shaped like a hammer travel curve → release event → silence until the next strike.

use std::{
    error::Error,
    f64::consts::PI,
    net::{SocketAddrV4, UdpSocket},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use log::{debug, error, info};
use rand::random_range;
use socket2::{Domain, Protocol, Socket, Type};
use spin_sleep::{SpinSleeper, SpinStrategy};

use pnp_ingest::{
    config::{BoardConfig, IngestConfig},
    protocol::packet::{
        KEYS_PER_BOARD, KeyState, SAMPLE_MAX, encode_data_packet, encode_event_packet,
    },
};

#[derive(Debug, Parser)]
#[command(name = "pnp_board_sim", about = "Send simulated PNP key-board traffic")]
struct Args {
    /// Same file `pnp_ingest` uses; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(long, default_value_t = 30)]
    seconds: u64,

    /// Time between two strikes on one board.
    #[arg(long, default_value_t = 1_000)]
    strike_interval_ms: u64,

    /// Data packets per strike.
    #[arg(long, default_value_t = 100)]
    burst_rows: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    info!("=== PNP BOARD SIM START ===");
    if let Err(e) = run(args) {
        error!("[Sim] {}", e);
        std::process::exit(1);
    }
    info!("=== PNP BOARD SIM FINISHED ===");
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_multicast_if_v4(&config.transport.interface)?;
    let socket: Arc<UdpSocket> = Arc::new(socket.into());
    let target = SocketAddrV4::new(config.transport.group, config.transport.port);

    let running = Arc::new(AtomicBool::new(true));
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    info!(
        "[Sim] sending {} board(s) to {} for {} s",
        config.boards.len(),
        target,
        args.seconds
    );

    let handles: Vec<_> = config
        .boards
        .iter()
        .cloned()
        .map(|board| {
            let socket = socket.clone();
            let running = running.clone();
            let strike_interval = Duration::from_millis(args.strike_interval_ms);
            let burst_rows = args.burst_rows;
            thread::spawn(move || {
                simulate_board(&board, &socket, target, strike_interval, burst_rows, deadline, &running)
            })
        })
        .collect();

    let mut first_err: Option<Box<dyn Error>> = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                running.store(false, Ordering::Release);
                first_err.get_or_insert(Box::new(e));
            }
            Err(_) => {
                running.store(false, Ordering::Release);
                first_err.get_or_insert("board thread panicked".into());
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn simulate_board(
    board: &BoardConfig,
    socket: &UdpSocket,
    target: SocketAddrV4,
    strike_interval: Duration,
    burst_rows: u32,
    deadline: Instant,
    running: &AtomicBool,
) -> std::io::Result<()> {
    let period = Duration::from_nanos(1_000_000_000 / u64::from(board.sample_rate));
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let mut strikes = 0u64;

    while running.load(Ordering::Acquire) && Instant::now() < deadline {
        let strike_start = Instant::now();
        let key = random_range(0..KEYS_PER_BOARD);
        let velocity: u8 = random_range(20..=127);

        send_event(socket, target, board.board_id, key, KeyState::KeyStrike, velocity)?;

        let peak = f64::from(SAMPLE_MAX) * f64::from(velocity) / 127.0;
        let mut next_tick = Instant::now();
        for i in 0..burst_rows {
            let phase = PI * f64::from(i) / f64::from(burst_rows.max(1));
            let mut samples = [0u32; KEYS_PER_BOARD];
            for (k, s) in samples.iter_mut().enumerate() {
                let noise = random_range(0.0..2_000.0);
                let level = if k == key { peak * phase.sin() + noise } else { noise };
                *s = level.clamp(0.0, f64::from(SAMPLE_MAX)) as u32;
            }
            socket.send_to(&encode_data_packet(board.board_id, &samples), target)?;

            next_tick += period;
            let now = Instant::now();
            if now < next_tick {
                sleeper.sleep(next_tick - now);
            }
        }

        send_event(socket, target, board.board_id, key, KeyState::KeyRelease, 0)?;
        strikes += 1;
        debug!(
            "[Sim] board {} key {} velocity {} (strike #{})",
            board.board_id, key, velocity, strikes
        );

        let next_strike = strike_start + strike_interval;
        let now = Instant::now();
        if now < next_strike {
            sleeper.sleep(next_strike - now);
        }
    }

    info!("[Sim] board {} done after {} strike(s)", board.board_id, strikes);
    Ok(())
}

fn send_event(
    socket: &UdpSocket,
    target: SocketAddrV4,
    board_id: u8,
    key: usize,
    state: KeyState,
    velocity: u8,
) -> std::io::Result<()> {
    let mut states = [KeyState::NoEvent; KEYS_PER_BOARD];
    let mut velocities = [0u8; KEYS_PER_BOARD];
    states[key] = state;
    velocities[key] = velocity;
    socket.send_to(&encode_event_packet(board_id, &states, &velocities), target)?;
    Ok(())
}
