//! Crate-wide error taxonomy.
//!
//! Each subsystem gets its own `thiserror`-derived enum, following the
//! layering in spec.md §7: hardware-init failures, transient radio errors,
//! protocol errors and transport errors are distinct types so a caller can
//! match on the layer that failed rather than a single flat enum.

use thiserror::Error;

/// Errors from the SPI/GPIO hardware abstraction layer.
#[derive(Debug, Error)]
pub enum HalError {
    #[error("SPI transfer failed: {0}")]
    Spi(String),

    #[error("GPIO operation failed: {0}")]
    Gpio(String),

    #[error("timed out waiting for hardware")]
    Timeout,
}

/// Errors from the radio driver's register-level state machine.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("hardware bus error: {0}")]
    Hal(#[from] HalError),

    #[error("unexpected chip version register 0x{0:02X}, expected 0x12")]
    VersionMismatch(u8),

    #[error("radio is in {current:?}, operation requires {required:?}")]
    WrongMode { current: &'static str, required: &'static str },

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("transmit completion timed out")]
    TxTimeout,

    #[error("clear-channel-assessment timed out")]
    CadTimeout,
}

/// Errors surfaced by the dual-radio channel manager.
#[derive(Debug, Error)]
pub enum ChannelManagerError {
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("TX queue is full")]
    TxQueueFull,
}

/// Errors from the forwarder's wire protocol and transport.
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("datagram shorter than the 4-byte header")]
    ShortFrame,

    #[error("unsupported protocol version byte 0x{0:02X}")]
    UnsupportedVersion(u8),

    #[error("txpk object missing from PULL_RESP body")]
    MissingTxpk,

    #[error("malformed datr string: {0}")]
    BadDatr(String),

    #[error("malformed codr string: {0}")]
    BadCodr(String),

    #[error("base64 payload decode failed: {0}")]
    BadPayload(#[from] base64::DecodeError),
}

/// Errors from the configuration persistence collaborator.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration record: {0}")]
    Malformed(#[from] serde_json::Error),
}
