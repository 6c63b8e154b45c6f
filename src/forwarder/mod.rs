//! Semtech UDP gateway protocol: wire framing, JSON payload shapes, and the
//! UDP client that drives them (spec.md §4.4).

pub mod client;
pub mod json;
pub mod protocol;

pub use client::{ForwarderClient, ForwarderStatus};
pub use json::{RxPk, Stat, TxPk};
pub use protocol::{Frame, MessageType, TokenCounters};
