//! Hardware abstraction layer for the radio's SPI bus and GPIO lines
//! (spec.md §3 "radio_handle": "Owns one SPI device, five GPIO references
//! (CS, RESET, DIO0, DIO1, DIO2)...").
//!
//! `RadioBus` is the SPI/GPIO seam, narrowed to the single-register /
//! burst-FIFO style of the classic SX127x SPI interface this driver targets
//! (spec.md §4.1 "FIFO framing": "a single SPI transaction beginning with
//! the register address ... followed by N payload bytes").

use crate::error::HalError;

/// SPI + GPIO seam for the radio driver. `CS` is not modeled as a separate
/// GPIO line here: on the reference Raspberry Pi backend it is the SPI
/// peripheral's own hardware chip-select, via `rppal`'s `SlaveSelect`,
/// rather than a manually toggled pin.
pub trait RadioBus: Send {
    /// Pulses the RESET line and returns once the chip is ready for
    /// register access (spec.md §4.1 "Mode state machine": "after chip
    /// reset, one write to Sleep...").
    fn reset(&mut self) -> Result<(), HalError>;

    fn read_register(&mut self, addr: u8) -> Result<u8, HalError>;

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), HalError>;

    /// Burst read of `len` bytes starting at the FIFO's current address
    /// pointer.
    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, HalError>;

    /// Burst write of the FIFO register.
    fn write_fifo(&mut self, data: &[u8]) -> Result<(), HalError>;

    /// Polls the DIO0 line level (used by `channel_free`'s CAD poll and by
    /// tests; production interrupt dispatch is edge-triggered, see
    /// [`crate::radio::driver`]).
    fn dio0_is_high(&mut self) -> Result<bool, HalError>;
}

/// In-memory register file used by unit tests and by any caller that wants
/// to drive the driver's state machine without real hardware.
pub struct MockBus {
    registers: [u8; 256],
    fifo: Vec<u8>,
    fifo_ptr: usize,
    pub dio0: bool,
}

impl MockBus {
    pub fn new() -> Self {
        let mut registers = [0u8; 256];
        registers[crate::radio::registers::REG_VERSION as usize] = crate::radio::registers::EXPECTED_VERSION;
        Self { registers, fifo: Vec::new(), fifo_ptr: 0, dio0: false }
    }

    /// Test helper: seed the FIFO as if a packet had just arrived over the
    /// air, and raise DIO0 so the next `channel_free`/driver poll observes
    /// it.
    pub fn inject_rx_payload(&mut self, payload: &[u8]) {
        self.fifo = payload.to_vec();
        self.fifo_ptr = 0;
        self.registers[crate::radio::registers::REG_RX_NB_BYTES as usize] = payload.len() as u8;
        self.registers[crate::radio::registers::REG_FIFO_RX_CURRENT_ADDR as usize] = 0;
    }

    pub fn register_raw(&self, addr: u8) -> u8 {
        self.registers[addr as usize]
    }

    pub fn set_register_raw(&mut self, addr: u8, value: u8) {
        self.registers[addr as usize] = value;
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioBus for MockBus {
    fn reset(&mut self) -> Result<(), HalError> {
        self.registers = [0u8; 256];
        self.registers[crate::radio::registers::REG_VERSION as usize] = crate::radio::registers::EXPECTED_VERSION;
        Ok(())
    }

    fn read_register(&mut self, addr: u8) -> Result<u8, HalError> {
        Ok(self.registers[addr as usize])
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), HalError> {
        self.registers[addr as usize] = value;
        if addr == crate::radio::registers::REG_FIFO_ADDR_PTR {
            self.fifo_ptr = value as usize;
        }
        Ok(())
    }

    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, HalError> {
        let start = self.fifo_ptr;
        let end = (start + len).min(self.fifo.len());
        Ok(self.fifo.get(start..end).unwrap_or(&[]).to_vec())
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), HalError> {
        self.fifo = data.to_vec();
        Ok(())
    }

    fn dio0_is_high(&mut self) -> Result<bool, HalError> {
        Ok(self.dio0)
    }
}

#[cfg(feature = "raspberry-pi")]
pub mod raspberry_pi {
    //! Real SPI/GPIO backend for Raspberry Pi 4/5 (`rppal::spi::Spi` +
    //! `rppal::gpio`), narrowed to the single-register read/write and
    //! burst-FIFO transactions of the SX127x SPI interface.

    use super::RadioBus;
    use crate::error::HalError;
    use crate::radio::registers::WRITE_BIT;
    use rppal::gpio::{Gpio, InputPin, OutputPin};
    use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
    use std::thread;
    use std::time::Duration;

    /// GPIO pin assignments for a radio's control lines (BCM numbering).
    /// CS is not present here: it is the SPI peripheral's own hardware
    /// chip-select.
    #[derive(Debug, Clone)]
    pub struct GpioPins {
        pub reset: u8,
        pub dio0: u8,
        pub dio1: Option<u8>,
        pub dio2: Option<u8>,
    }

    pub struct RaspberryPiRadioBus {
        spi: Spi,
        reset_pin: OutputPin,
        dio0_pin: InputPin,
        #[allow(dead_code)]
        dio1_pin: Option<InputPin>,
        #[allow(dead_code)]
        dio2_pin: Option<InputPin>,
    }

    impl RaspberryPiRadioBus {
        pub fn new(bus: Bus, slave_select: SlaveSelect, pins: &GpioPins) -> Result<Self, HalError> {
            let spi = Spi::new(bus, slave_select, 8_000_000, Mode::Mode0)
                .map_err(|e| HalError::Spi(e.to_string()))?;
            let gpio = Gpio::new().map_err(|e| HalError::Gpio(e.to_string()))?;
            let reset_pin = gpio
                .get(pins.reset)
                .map_err(|e| HalError::Gpio(e.to_string()))?
                .into_output();
            let dio0_pin = gpio
                .get(pins.dio0)
                .map_err(|e| HalError::Gpio(e.to_string()))?
                .into_input();
            let dio1_pin = match pins.dio1 {
                Some(p) => Some(gpio.get(p).map_err(|e| HalError::Gpio(e.to_string()))?.into_input()),
                None => None,
            };
            let dio2_pin = match pins.dio2 {
                Some(p) => Some(gpio.get(p).map_err(|e| HalError::Gpio(e.to_string()))?.into_input()),
                None => None,
            };
            Ok(Self { spi, reset_pin, dio0_pin, dio1_pin, dio2_pin })
        }

        /// Exposes DIO0 for callers that want to register an edge interrupt
        /// callback (see `radio::driver::Sx127xRadio::start_rx`).
        pub fn dio0_pin_mut(&mut self) -> &mut InputPin {
            &mut self.dio0_pin
        }
    }

    impl RadioBus for RaspberryPiRadioBus {
        fn reset(&mut self) -> Result<(), HalError> {
            self.reset_pin.set_low();
            thread::sleep(Duration::from_millis(1));
            self.reset_pin.set_high();
            thread::sleep(Duration::from_millis(10));
            Ok(())
        }

        fn read_register(&mut self, addr: u8) -> Result<u8, HalError> {
            let mut read_buf = [0u8; 2];
            let write_buf = [addr & !WRITE_BIT, 0x00];
            self.spi
                .transfer(&mut read_buf, &write_buf)
                .map_err(|e| HalError::Spi(e.to_string()))?;
            Ok(read_buf[1])
        }

        fn write_register(&mut self, addr: u8, value: u8) -> Result<(), HalError> {
            let write_buf = [addr | WRITE_BIT, value];
            self.spi.write(&write_buf).map_err(|e| HalError::Spi(e.to_string()))?;
            Ok(())
        }

        fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, HalError> {
            let mut write_buf = vec![crate::radio::registers::REG_FIFO & !WRITE_BIT];
            write_buf.extend(std::iter::repeat(0u8).take(len));
            let mut read_buf = vec![0u8; write_buf.len()];
            self.spi
                .transfer(&mut read_buf, &write_buf)
                .map_err(|e| HalError::Spi(e.to_string()))?;
            Ok(read_buf[1..].to_vec())
        }

        fn write_fifo(&mut self, data: &[u8]) -> Result<(), HalError> {
            let mut write_buf = vec![crate::radio::registers::REG_FIFO | WRITE_BIT];
            write_buf.extend_from_slice(data);
            self.spi.write(&write_buf).map_err(|e| HalError::Spi(e.to_string()))?;
            Ok(())
        }

        fn dio0_is_high(&mut self) -> Result<bool, HalError> {
            Ok(self.dio0_pin.is_high())
        }
    }
}
