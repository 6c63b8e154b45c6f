//! Register-level SX127x radio driver plus its SPI/GPIO HAL seam
//! (spec.md §4.1).

pub mod driver;
pub mod hal;
pub mod packet;
pub mod registers;

pub use driver::{ChannelSettings, RadioDriver, RadioMode, RxCallback, Sx127xRadio, TxCallback};
pub use hal::{MockBus, RadioBus};
pub use packet::{RxPacket, TxPacket, TxTiming};
