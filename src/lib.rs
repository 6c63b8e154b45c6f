//! # lorawan-gateway — a two-radio LoRaWAN packet-forwarding gateway
//!
//! Bridges a pair of SX127x LoRa radios (one dedicated to RX, one to TX) to
//! a Semtech-protocol network server over UDP. One radio listens
//! continuously while the other services scheduled downlinks, so an
//! incoming join-accept or Class A downlink never has to preempt the
//! receiver mid-packet.
//!
//! ## Layout
//!
//! - [`radio`] — register-level SX127x driver and its `RadioBus` HAL seam.
//! - [`channel_manager`] — owns the RX/TX radio pair, the TX scheduling
//!   worker, and AU915 channel hopping.
//! - [`gateway`] — the single chokepoint between the radio world and the
//!   forwarder world; owns [`gateway::GatewayStats`].
//! - [`forwarder`] — the Semtech UDP wire protocol, its JSON payload
//!   shapes, and the UDP client that drives uplink/downlink/keepalive.
//! - [`config`] — the persisted gateway configuration record and the AU915
//!   band-plan helpers.
//! - [`net`] — the narrow network-interface capability trait consumed by
//!   the forwarder.
//! - [`clock`] — the monotonic microsecond clock shared across the crate.

pub mod channel_manager;
pub mod clock;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod gateway;
pub mod logging;
pub mod net;
pub mod radio;

pub use channel_manager::ChannelManager;
pub use clock::MonotonicClock;
pub use config::{ConfigHandle, ConfigStore, FileConfigStore, GatewayConfig};
pub use error::{ChannelManagerError, ConfigError, DriverError, ForwarderError, HalError};
pub use forwarder::{ForwarderClient, ForwarderStatus};
pub use gateway::{GatewayCore, GatewayStats};
pub use logging::{init_logger, log_debug, log_error, log_info, log_warn};
pub use net::{EthernetLink, FailoverLink, NetworkLink, WifiLink};
pub use radio::{RadioDriver, Sx127xRadio};
