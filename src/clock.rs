//! Monotonic microsecond clock shared by the radio driver, channel manager
//! and forwarder.
//!
//! spec.md §4.3: "the low 32 bits are the value visible to the protocol
//! layer (wrap is tolerated: the protocol compares with modular arithmetic
//! over 32 bits)". All timestamp comparisons in this crate that cross the
//! 32-bit wire representation go through [`wrapping_delta_us`] rather than
//! plain subtraction.

use std::time::Instant;

/// A single process-wide monotonic origin. `Instant` itself has no public
/// "epoch", so the gateway latches one at startup and measures elapsed
/// microseconds from it.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }

    /// Full-resolution elapsed microseconds since the clock was created.
    pub fn now_us64(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// The low 32 bits of [`Self::now_us64`], the value placed on the wire.
    pub fn now_us32(&self) -> u32 {
        self.now_us64() as u32
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// `target - now` interpreted as a signed 32-bit quantity, so that a
/// `target` just past a wraparound of the wire clock still compares as
/// "shortly in the future" rather than "billions of microseconds in the
/// past". spec.md §8 boundary behavior: "a target timestamp that wraps past
/// 2^32 must still compare correctly (use modular 32-bit subtraction
/// interpreted as signed)".
pub fn wrapping_delta_us(target: u32, now: u32) -> i32 {
    target.wrapping_sub(now) as i32
}
