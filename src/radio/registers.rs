//! SX127x-style register map (spec.md §4.1). The addresses and bit layouts
//! below are the classic Semtech SX127x LoRa register set — the same chip
//! family the wire protocol's `datr`/`codr` vocabulary and TX-power bands
//! (spec.md §4.1 "TX power") are written against.

/// Top bit of the address byte selects write (1) vs read (0) for every
/// single-register and burst (FIFO) SPI transaction (spec.md §4.1 "FIFO
/// framing").
pub const WRITE_BIT: u8 = 0x80;

pub const REG_FIFO: u8 = 0x00;
pub const REG_OP_MODE: u8 = 0x01;
pub const REG_FRF_MSB: u8 = 0x06;
pub const REG_FRF_MID: u8 = 0x07;
pub const REG_FRF_LSB: u8 = 0x08;
pub const REG_PA_CONFIG: u8 = 0x09;
pub const REG_OCP: u8 = 0x0B;
pub const REG_FIFO_ADDR_PTR: u8 = 0x0D;
pub const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
pub const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
pub const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
pub const REG_IRQ_FLAGS_MASK: u8 = 0x11;
pub const REG_IRQ_FLAGS: u8 = 0x12;
pub const REG_RX_NB_BYTES: u8 = 0x13;
pub const REG_PKT_SNR_VALUE: u8 = 0x19;
pub const REG_PKT_RSSI_VALUE: u8 = 0x1A;
pub const REG_RSSI_VALUE: u8 = 0x1B;
pub const REG_MODEM_CONFIG_1: u8 = 0x1D;
pub const REG_MODEM_CONFIG_2: u8 = 0x1E;
pub const REG_PREAMBLE_MSB: u8 = 0x20;
pub const REG_PREAMBLE_LSB: u8 = 0x21;
pub const REG_PAYLOAD_LENGTH: u8 = 0x22;
pub const REG_MODEM_CONFIG_3: u8 = 0x26;
pub const REG_DETECT_OPTIMIZE: u8 = 0x31;
pub const REG_INVERT_IQ: u8 = 0x33;
pub const REG_DETECTION_THRESHOLD: u8 = 0x37;
pub const REG_SYNC_WORD: u8 = 0x39;
pub const REG_INVERT_IQ2: u8 = 0x3B;
pub const REG_DIO_MAPPING_1: u8 = 0x40;
pub const REG_VERSION: u8 = 0x42;
pub const REG_PA_DAC: u8 = 0x4D;

/// Expected value of [`REG_VERSION`] (spec.md §4.1 "fails if chip version
/// register does not report the expected identifier 0x12").
pub const EXPECTED_VERSION: u8 = 0x12;

/// `REG_OP_MODE` long-range (LoRa) mode bit.
pub const LONG_RANGE_MODE_BIT: u8 = 0x80;

/// `REG_OP_MODE` low 3 bits select the operating mode (spec.md §4.1 "Mode
/// state machine").
pub const MODE_SLEEP: u8 = 0x00;
pub const MODE_STANDBY: u8 = 0x01;
pub const MODE_FSTX: u8 = 0x02;
pub const MODE_TX: u8 = 0x03;
pub const MODE_FSRX: u8 = 0x04;
pub const MODE_RX_CONTINUOUS: u8 = 0x05;
pub const MODE_RX_SINGLE: u8 = 0x06;
pub const MODE_CAD: u8 = 0x07;

bitflags::bitflags! {
    /// `REG_IRQ_FLAGS` bit layout (spec.md §4.1 "Interrupt handling").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u8 {
        const RX_TIMEOUT          = 0b1000_0000;
        const RX_DONE             = 0b0100_0000;
        const PAYLOAD_CRC_ERROR   = 0b0010_0000;
        const VALID_HEADER        = 0b0001_0000;
        const TX_DONE             = 0b0000_1000;
        const CAD_DONE            = 0b0000_0100;
        const FHSS_CHANGE_CHANNEL = 0b0000_0010;
        const CAD_DETECTED        = 0b0000_0001;
    }
}
