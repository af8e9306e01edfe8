//! gap_fill.rs
//! Decides how many rows one receive cycle contributes to a board stream.
//!
//! Boards only transmit samples while a hammer is moving. Between strikes the stream's time
//! axis is kept continuous by emitting all-zero rows at the stream's cadence: a row's position
//! in the file is its timestamp, at 1 / sample_rate second resolution.
//!
//! Row count for a gap is `elapsed_ns * sample_rate / 1e9`, rounded half-to-even, computed
//! exactly in integer arithmetic (1 ms at 500 rows/s = 0.5 → 0 rows, 3 ms = 1.5 → 2 rows).

use crate::protocol::packet::DecodedPacket;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSource {
    /// The real samples of the packet.
    Samples,
    /// All-zero filler rows.
    Zeros,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPlan {
    pub count: usize,
    pub source: RowSource,
}

impl RowPlan {
    pub const NONE: RowPlan = RowPlan {
        count: 0,
        source: RowSource::Samples,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Rows covering `elapsed_ns` at `sample_rate` rows per second, round-half-to-even.
pub fn interpolated_rows(elapsed_ns: u64, sample_rate: u32) -> usize {
    let scaled = u128::from(elapsed_ns) * u128::from(sample_rate);
    let denom = u128::from(NANOS_PER_SEC);
    let quotient = scaled / denom;
    let twice_rem = 2 * (scaled % denom);

    let rounded = if twice_rem > denom || (twice_rem == denom && quotient % 2 == 1) {
        quotient + 1
    } else {
        quotient
    };
    usize::try_from(rounded).unwrap_or(usize::MAX)
}

/// Gap-fill decision for one stream.
///
/// - no samples this cycle → zero rows covering `elapsed_ns`
/// - samples for this stream's board → exactly one real row
/// - samples for another board → nothing
pub fn rows_to_emit(
    got_samples: bool,
    matches_stream: bool,
    elapsed_ns: u64,
    sample_rate: u32,
) -> RowPlan {
    if !got_samples {
        RowPlan {
            count: interpolated_rows(elapsed_ns, sample_rate),
            source: RowSource::Zeros,
        }
    } else if matches_stream {
        RowPlan {
            count: 1,
            source: RowSource::Samples,
        }
    } else {
        RowPlan::NONE
    }
}

/// Applies `rows_to_emit` to a decoded packet. Event packets carry no samples, so like a
/// timeout they advance every stream by the elapsed time.
pub fn plan_for_packet(
    packet: &DecodedPacket,
    stream_board: u8,
    elapsed_ns: u64,
    sample_rate: u32,
) -> RowPlan {
    rows_to_emit(
        packet.is_data_packet(),
        packet.board_id() == Some(stream_board),
        elapsed_ns,
        sample_rate,
    )
}
