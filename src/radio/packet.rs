//! Wire-agnostic packet types passed between the radio driver, the channel
//! manager and the gateway core (spec.md §3 "rx_packet", "tx_packet").

/// A packet as it comes off the air, timestamped by the driver at the
/// moment `RxDone` fires (spec.md §3: "captures a monotonic microsecond
/// timestamp ... at interrupt time, not at dequeue time").
#[derive(Debug, Clone, PartialEq)]
pub struct RxPacket {
    pub payload: Vec<u8>,
    /// Microsecond timestamp latched at `RxDone`, low 32 bits of the
    /// gateway's monotonic clock.
    pub timestamp_us: u32,
    pub frequency_hz: u32,
    pub sf: u8,
    pub bw_code: u8,
    pub rssi_dbm: i16,
    pub snr_db: f32,
    pub crc_ok: bool,
    pub channel: u8,
}

/// When a scheduled transmission should key the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxTiming {
    /// Fire at the instant the sender means "now" (spec.md §4.2's
    /// "immediate" class).
    Immediate,
    /// Fire when the gateway clock's low 32 bits equal this value
    /// (spec.md §4.2's "scheduled" class, `tmst`-addressed).
    At(u32),
}

/// A packet queued for transmission (spec.md §3 "tx_packet").
#[derive(Debug, Clone, PartialEq)]
pub struct TxPacket {
    pub payload: Vec<u8>,
    pub timing: TxTiming,
    pub frequency_hz: u32,
    pub sf: u8,
    pub bw_code: u8,
    pub power_dbm: i8,
    /// Coding rate denominator, 5-8 (4/5 .. 4/8).
    pub codr_denom: u8,
    pub invert_iq: bool,
}
