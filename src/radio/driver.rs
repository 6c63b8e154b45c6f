//! SX127x-style register-level radio driver (spec.md §4.1): an async,
//! handle-oriented trait with one method per chip capability, plus a
//! bounded-channel trampoline for getting interrupt-context work off of the
//! edge-detection path.
//!
//! Every exported operation takes the driver's mutex for its whole
//! duration, matching spec.md §4.1's "every exported operation is a
//! critical section". Interrupt dispatch does not hold that mutex for the
//! edge-detection step itself: it pushes a bare [`IrqEvent`] onto a bounded
//! channel and a dedicated task drains it, takes the mutex, and does the
//! register reads the algorithm requires. That split is the "bounded
//! lock-free slot into a dedicated task" spec.md §4.1 asks for from drivers
//! that cannot do register I/O from true interrupt context — true here
//! because DIO0 is polled rather than wired to a host IRQ line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::clock::MonotonicClock;
use crate::error::DriverError;
use crate::radio::hal::RadioBus;
use crate::radio::packet::RxPacket;
use crate::radio::registers::*;

/// Mirrors the eight states in spec.md §4.1's mode state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Sleep,
    Standby,
    FsTx,
    Tx,
    FsRx,
    RxContinuous,
    RxSingle,
    Cad,
}

impl RadioMode {
    fn register_bits(self) -> u8 {
        match self {
            RadioMode::Sleep => MODE_SLEEP,
            RadioMode::Standby => MODE_STANDBY,
            RadioMode::FsTx => MODE_FSTX,
            RadioMode::Tx => MODE_TX,
            RadioMode::FsRx => MODE_FSRX,
            RadioMode::RxContinuous => MODE_RX_CONTINUOUS,
            RadioMode::RxSingle => MODE_RX_SINGLE,
            RadioMode::Cad => MODE_CAD,
        }
    }

    fn name(self) -> &'static str {
        match self {
            RadioMode::Sleep => "Sleep",
            RadioMode::Standby => "Standby",
            RadioMode::FsTx => "FsTx",
            RadioMode::Tx => "Tx",
            RadioMode::FsRx => "FsRx",
            RadioMode::RxContinuous => "RxContinuous",
            RadioMode::RxSingle => "RxSingle",
            RadioMode::Cad => "Cad",
        }
    }
}

/// A full register-level programming of one channel (spec.md §4.1
/// `apply_config`).
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    pub frequency_hz: u32,
    pub sf: u8,
    pub bw_code: u8,
    pub coding_rate: u8,
    pub tx_power_dbm: i8,
    pub sync_word: u8,
    pub rx_invert_iq: bool,
    pub tx_invert_iq: bool,
}

/// Raised by the dispatch task, never constructed or consumed inside the
/// edge-detection loop itself — just a bare tag, so pushing one never
/// allocates beyond the fixed-capacity channel slot.
#[derive(Debug, Clone, Copy)]
enum IrqEvent {
    Rx,
    Tx,
}

pub type RxCallback = Arc<dyn Fn(RxPacket) + Send + Sync>;
/// `bool` argument is transmit success, per spec.md §4.1's `on_tx_cb`.
pub type TxCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct LastRxQuality {
    rssi_dbm: i16,
    snr_db: f32,
}

/// A handle over one physical SX127x-family chip (spec.md §3 "radio_handle").
pub struct Sx127xRadio<B: RadioBus + 'static> {
    bus: Arc<Mutex<B>>,
    clock: Arc<MonotonicClock>,
    mode: Arc<Mutex<RadioMode>>,
    channel: Arc<Mutex<u8>>,
    last_rx: Arc<Mutex<Option<LastRxQuality>>>,
    transmitting: Arc<AtomicBool>,
    irq_tx: Mutex<mpsc::Sender<IrqEvent>>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<B: RadioBus + 'static> Sx127xRadio<B> {
    /// spec.md §4.1 `Init`: verifies the version register, then runs the
    /// required reset entry sequence (Sleep+LoRa bit, 10 ms, Standby, 10
    /// ms) before any other register write is allowed.
    pub async fn init(mut bus: B, clock: Arc<MonotonicClock>) -> Result<Self, DriverError> {
        bus.reset()?;
        let version = bus.read_register(REG_VERSION)?;
        if version != EXPECTED_VERSION {
            return Err(DriverError::VersionMismatch(version));
        }

        bus.write_register(REG_OP_MODE, LONG_RANGE_MODE_BIT | MODE_SLEEP)?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.write_register(REG_OP_MODE, LONG_RANGE_MODE_BIT | MODE_STANDBY)?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (irq_tx, irq_rx) = mpsc::channel(16);
        drop(irq_rx); // replaced by start_rx's own channel once RX begins

        Ok(Self {
            bus: Arc::new(Mutex::new(bus)),
            clock,
            mode: Arc::new(Mutex::new(RadioMode::Standby)),
            channel: Arc::new(Mutex::new(0)),
            last_rx: Arc::new(Mutex::new(None)),
            transmitting: Arc::new(AtomicBool::new(false)),
            irq_tx: Mutex::new(irq_tx),
            dispatch_handle: Mutex::new(None),
            poll_handle: Mutex::new(None),
        })
    }

    /// spec.md §4.1 frequency programming: `(Hz << 19) / 32_000_000`
    /// written MSB/MID/LSB.
    fn frequency_word(hz: u32) -> [u8; 3] {
        let word = ((hz as u64) << 19) / 32_000_000;
        [(word >> 16) as u8, (word >> 8) as u8, word as u8]
    }

    async fn require_not_busy(&self) -> Result<(), DriverError> {
        if self.transmitting.load(Ordering::Acquire) {
            return Err(DriverError::WrongMode { current: "Tx", required: "not transmitting" });
        }
        Ok(())
    }

    pub async fn apply_channel(&self, settings: ChannelSettings) -> Result<(), DriverError> {
        self.require_not_busy().await?;
        self.set_mode(RadioMode::Standby).await?;
        self.set_frequency(settings.frequency_hz).await?;
        self.set_spreading_factor(settings.sf).await?;
        self.set_bandwidth(settings.bw_code).await?;
        self.set_coding_rate(settings.coding_rate).await?;
        self.set_tx_power(settings.tx_power_dbm).await?;
        self.set_sync_word(settings.sync_word).await?;
        self.set_invert_iq(settings.rx_invert_iq, settings.tx_invert_iq).await?;
        Ok(())
    }

    /// Drains queued [`IrqEvent`]s, taking the driver mutex only for this
    /// task's lifetime, never from the edge-detection loop (spec.md §4.1
    /// "Interrupt handling").
    async fn spawn_dispatch_task(&self, mut irq_rx: mpsc::Receiver<IrqEvent>, rx_cb: RxCallback, tx_cb: TxCallback) {
        let bus = self.bus.clone();
        let clock = self.clock.clone();
        let mode = self.mode.clone();
        let channel = self.channel.clone();
        let last_rx = self.last_rx.clone();
        let transmitting = self.transmitting.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = irq_rx.recv().await {
                let mut bus = bus.lock().await;
                let flags = match bus.read_register(REG_IRQ_FLAGS) {
                    Ok(f) => IrqFlags::from_bits_truncate(f),
                    Err(e) => {
                        warn!("failed to read IRQ flags: {e}");
                        continue;
                    }
                };

                match event {
                    IrqEvent::Rx if flags.contains(IrqFlags::RX_DONE) => {
                        if let Err(e) = dispatch_rx_done(&mut *bus, &clock, &last_rx, *channel.lock().await, flags, &rx_cb) {
                            warn!("rx_done dispatch failed: {e}");
                        }
                        let _ = bus.write_register(REG_IRQ_FLAGS, (IrqFlags::RX_DONE | IrqFlags::PAYLOAD_CRC_ERROR).bits());
                    }
                    IrqEvent::Tx if flags.contains(IrqFlags::TX_DONE) => {
                        transmitting.store(false, Ordering::Release);
                        let _ = bus.write_register(REG_IRQ_FLAGS, IrqFlags::TX_DONE.bits());
                        let _ = bus.write_register(REG_OP_MODE, LONG_RANGE_MODE_BIT | MODE_STANDBY);
                        *mode.lock().await = RadioMode::Standby;
                        tx_cb(true);
                    }
                    _ => trace!("spurious irq event {event:?}, flags={flags:?}"),
                }
            }
        });
        *self.dispatch_handle.lock().await = Some(handle);
    }

    /// Polling stand-in for a wired DIO0 interrupt: wakes on the rising
    /// edge and pushes a bare event tag, never touching a register itself.
    async fn spawn_edge_poll_task(&self, kind_select: fn(&IrqFlags) -> Option<IrqEvent>) {
        let bus = self.bus.clone();
        let irq_tx = self.irq_tx.lock().await.clone();
        let handle = tokio::spawn(async move {
            let mut was_high = false;
            loop {
                tokio::time::sleep(Duration::from_micros(500)).await;
                let is_high = {
                    let mut bus = bus.lock().await;
                    bus.dio0_is_high().unwrap_or(false)
                };
                if is_high && !was_high {
                    let flags = {
                        let mut bus = bus.lock().await;
                        bus.read_register(REG_IRQ_FLAGS).map(IrqFlags::from_bits_truncate).unwrap_or(IrqFlags::empty())
                    };
                    if let Some(event) = kind_select(&flags) {
                        if irq_tx.try_send(event).is_err() {
                            warn!("irq event queue full, dropping edge");
                        }
                    }
                }
                was_high = is_high;
            }
        });
        *self.poll_handle.lock().await = Some(handle);
    }
}

fn dispatch_rx_done<B: RadioBus>(
    bus: &mut B,
    clock: &MonotonicClock,
    last_rx: &Arc<Mutex<Option<LastRxQuality>>>,
    channel: u8,
    flags: IrqFlags,
    rx_cb: &RxCallback,
) -> Result<(), DriverError> {
    let timestamp_us = clock.now_us32();
    let nb_bytes = bus.read_register(REG_RX_NB_BYTES)?;
    let current_addr = bus.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
    bus.write_register(REG_FIFO_ADDR_PTR, current_addr)?;
    let payload = bus.read_fifo(nb_bytes as usize)?;

    let rssi_raw = bus.read_register(REG_PKT_RSSI_VALUE)?;
    let rssi_dbm = rssi_raw as i16 - 157;
    let snr_raw = bus.read_register(REG_PKT_SNR_VALUE)? as i8;
    let snr_db = snr_raw as f32 / 4.0;
    let crc_ok = !flags.contains(IrqFlags::PAYLOAD_CRC_ERROR);

    if let Ok(mut guard) = last_rx.try_lock() {
        *guard = Some(LastRxQuality { rssi_dbm, snr_db });
    }

    let modem_config_1 = bus.read_register(REG_MODEM_CONFIG_1)?;
    let modem_config_2 = bus.read_register(REG_MODEM_CONFIG_2)?;
    let sf = modem_config_2 >> 4;
    let bw_code = modem_config_1 >> 4;

    debug!("rx_done: {} bytes, rssi={rssi_dbm}dBm snr={snr_db}dB crc_ok={crc_ok}", payload.len());

    rx_cb(RxPacket {
        payload,
        timestamp_us,
        frequency_hz: 0, // caller fills from the channel manager's channel table, which owns frequency plan
        sf,
        bw_code,
        rssi_dbm,
        snr_db,
        crc_ok,
        channel,
    });
    Ok(())
}

/// spec.md §4.1 operations other than `Init`, `apply_config` and
/// `channel_free`'s internal CAD trigger, which need owned-channel-settings
/// or polling detail not expressible on a trait object cleanly; those live
/// as inherent methods above/below. This trait is the seam the channel
/// manager programs against so it can be exercised with [`crate::radio::hal::MockBus`].
#[async_trait]
pub trait RadioDriver: Send + Sync {
    async fn deinit(&self) -> Result<(), DriverError>;
    async fn set_mode(&self, mode: RadioMode) -> Result<(), DriverError>;
    async fn get_mode(&self) -> RadioMode;
    async fn set_frequency(&self, hz: u32) -> Result<(), DriverError>;
    /// Reads back the currently programmed RF carrier frequency, inverse of
    /// [`Self::set_frequency`]'s `(Hz << 19) / 32_000_000` encoding.
    async fn get_frequency(&self) -> Result<u32, DriverError>;
    async fn set_spreading_factor(&self, sf: u8) -> Result<(), DriverError>;
    async fn set_bandwidth(&self, code: u8) -> Result<(), DriverError>;
    async fn set_coding_rate(&self, code: u8) -> Result<(), DriverError>;
    async fn set_tx_power(&self, dbm: i8) -> Result<(), DriverError>;
    async fn set_sync_word(&self, byte: u8) -> Result<(), DriverError>;
    async fn set_invert_iq(&self, rx_invert: bool, tx_invert: bool) -> Result<(), DriverError>;
    async fn start_rx(&self, on_rx_cb: RxCallback) -> Result<(), DriverError>;
    async fn stop_rx(&self) -> Result<(), DriverError>;
    async fn transmit(&self, payload: &[u8], on_tx_cb: TxCallback) -> Result<(), DriverError>;
    async fn get_packet_rssi_snr(&self) -> Option<(i16, f32)>;
    async fn get_rssi(&self) -> Result<i16, DriverError>;
    async fn channel_free(&self) -> Result<bool, DriverError>;
    async fn get_version(&self) -> Result<u8, DriverError>;
}

#[async_trait]
impl<B: RadioBus + 'static> RadioDriver for Sx127xRadio<B> {
    async fn deinit(&self) -> Result<(), DriverError> {
        self.set_mode(RadioMode::Sleep).await
    }

    async fn set_mode(&self, mode: RadioMode) -> Result<(), DriverError> {
        let mut bus = self.bus.lock().await;
        bus.write_register(REG_OP_MODE, LONG_RANGE_MODE_BIT | mode.register_bits())?;
        drop(bus);
        *self.mode.lock().await = mode;
        trace!("mode -> {}", mode.name());
        Ok(())
    }

    async fn get_mode(&self) -> RadioMode {
        *self.mode.lock().await
    }

    async fn set_frequency(&self, hz: u32) -> Result<(), DriverError> {
        let word = Self::frequency_word(hz);
        let mut bus = self.bus.lock().await;
        bus.write_register(REG_FRF_MSB, word[0])?;
        bus.write_register(REG_FRF_MID, word[1])?;
        bus.write_register(REG_FRF_LSB, word[2])?;
        Ok(())
    }

    async fn get_frequency(&self) -> Result<u32, DriverError> {
        let mut bus = self.bus.lock().await;
        let msb = bus.read_register(REG_FRF_MSB)?;
        let mid = bus.read_register(REG_FRF_MID)?;
        let lsb = bus.read_register(REG_FRF_LSB)?;
        let word = ((msb as u64) << 16) | ((mid as u64) << 8) | lsb as u64;
        Ok(((word * 32_000_000) >> 19) as u32)
    }

    async fn set_spreading_factor(&self, sf: u8) -> Result<(), DriverError> {
        if !(6..=12).contains(&sf) {
            return Err(DriverError::InvalidParam(format!("spreading factor {sf} out of range 6-12")));
        }
        let mut bus = self.bus.lock().await;
        let modem_config_2 = bus.read_register(REG_MODEM_CONFIG_2)?;
        bus.write_register(REG_MODEM_CONFIG_2, (modem_config_2 & 0x0F) | (sf << 4))?;

        if sf == 6 {
            bus.write_register(REG_DETECT_OPTIMIZE, 0xC5)?;
            bus.write_register(REG_DETECTION_THRESHOLD, 0x0C)?;
        } else {
            bus.write_register(REG_DETECT_OPTIMIZE, 0xC3)?;
            bus.write_register(REG_DETECTION_THRESHOLD, 0x0A)?;
        }

        let modem_config_1 = bus.read_register(REG_MODEM_CONFIG_1)?;
        let bw_code = modem_config_1 >> 4;
        let modem_config_3 = bus.read_register(REG_MODEM_CONFIG_3)?;
        let low_data_rate_optimize = sf >= 11 && bw_code <= 1;
        let new_config_3 = if low_data_rate_optimize { modem_config_3 | 0x08 } else { modem_config_3 & !0x08 };
        bus.write_register(REG_MODEM_CONFIG_3, new_config_3)?;
        Ok(())
    }

    async fn set_bandwidth(&self, code: u8) -> Result<(), DriverError> {
        if code > 9 {
            return Err(DriverError::InvalidParam(format!("bandwidth code {code} out of range")));
        }
        let mut bus = self.bus.lock().await;
        let modem_config_1 = bus.read_register(REG_MODEM_CONFIG_1)?;
        bus.write_register(REG_MODEM_CONFIG_1, (modem_config_1 & 0x0F) | (code << 4))?;
        Ok(())
    }

    async fn set_coding_rate(&self, code: u8) -> Result<(), DriverError> {
        if !(1..=4).contains(&code) {
            return Err(DriverError::InvalidParam(format!("coding rate code {code} out of range 1-4")));
        }
        let mut bus = self.bus.lock().await;
        let modem_config_1 = bus.read_register(REG_MODEM_CONFIG_1)?;
        bus.write_register(REG_MODEM_CONFIG_1, (modem_config_1 & 0xF1) | (code << 1))?;
        Ok(())
    }

    async fn set_tx_power(&self, dbm: i8) -> Result<(), DriverError> {
        let mut bus = self.bus.lock().await;
        const PA_BOOST: u8 = 0x80;
        bus.write_register(REG_OCP, 0x20 | 0x0B)?; // fixed 100 mA over-current limit

        let (pa_dac, value) = if dbm > 17 {
            (0x87u8, (dbm.min(20) - 5) as u8)
        } else if dbm > 14 {
            (0x84u8, (dbm - 2) as u8)
        } else {
            (0x84u8, (dbm.max(2) - 2) as u8)
        };
        bus.write_register(REG_PA_DAC, pa_dac)?;
        bus.write_register(REG_PA_CONFIG, PA_BOOST | (value & 0x0F))?;
        Ok(())
    }

    async fn set_sync_word(&self, byte: u8) -> Result<(), DriverError> {
        let mut bus = self.bus.lock().await;
        bus.write_register(REG_SYNC_WORD, byte)?;
        Ok(())
    }

    async fn set_invert_iq(&self, rx_invert: bool, tx_invert: bool) -> Result<(), DriverError> {
        let mut bus = self.bus.lock().await;
        let secondary = if rx_invert || tx_invert { 0x19 } else { 0x1D };
        let mut primary = bus.read_register(REG_INVERT_IQ)? & !0x41;
        if rx_invert {
            primary |= 0x41;
        }
        if tx_invert {
            primary |= 0x01;
        }
        bus.write_register(REG_INVERT_IQ, primary)?;
        bus.write_register(REG_INVERT_IQ2, secondary)?;
        Ok(())
    }

    async fn start_rx(&self, on_rx_cb: RxCallback) -> Result<(), DriverError> {
        let noop_tx: TxCallback = Arc::new(|_| {});
        let (irq_tx, irq_rx) = mpsc::channel(16);
        *self.irq_tx.lock().await = irq_tx;
        self.spawn_dispatch_task(irq_rx, on_rx_cb, noop_tx).await;
        self.spawn_edge_poll_task(|flags| flags.contains(IrqFlags::RX_DONE).then_some(IrqEvent::Rx)).await;
        self.set_mode(RadioMode::RxContinuous).await
    }

    async fn stop_rx(&self) -> Result<(), DriverError> {
        if let Some(handle) = self.poll_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.dispatch_handle.lock().await.take() {
            handle.abort();
        }
        self.set_mode(RadioMode::Standby).await
    }

    async fn transmit(&self, payload: &[u8], on_tx_cb: TxCallback) -> Result<(), DriverError> {
        self.require_not_busy().await?;
        self.transmitting.store(true, Ordering::Release);
        {
            let mut bus = self.bus.lock().await;
            let tx_base_addr = bus.read_register(REG_FIFO_TX_BASE_ADDR)?;
            bus.write_register(REG_FIFO_ADDR_PTR, tx_base_addr)?;
            bus.write_fifo(payload)?;
            bus.write_register(REG_PAYLOAD_LENGTH, payload.len() as u8)?;
        }
        self.set_mode(RadioMode::Tx).await?;

        let bus = self.bus.clone();
        let clock = self.clock.clone();
        let mode = self.mode.clone();
        let transmitting = self.transmitting.clone();
        let _ = clock; // timestamp of TX_DONE is not surfaced further up than tx success
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(4);
            loop {
                if tokio::time::Instant::now() > deadline {
                    transmitting.store(false, Ordering::Release);
                    on_tx_cb(false);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                let flags = {
                    let mut bus = bus.lock().await;
                    match bus.read_register(REG_IRQ_FLAGS) {
                        Ok(f) => IrqFlags::from_bits_truncate(f),
                        Err(_) => continue,
                    }
                };
                if flags.contains(IrqFlags::TX_DONE) {
                    let mut bus = bus.lock().await;
                    let _ = bus.write_register(REG_IRQ_FLAGS, IrqFlags::TX_DONE.bits());
                    let _ = bus.write_register(REG_OP_MODE, LONG_RANGE_MODE_BIT | MODE_STANDBY);
                    drop(bus);
                    *mode.lock().await = RadioMode::Standby;
                    transmitting.store(false, Ordering::Release);
                    on_tx_cb(true);
                    return;
                }
            }
        });
        Ok(())
    }

    async fn get_packet_rssi_snr(&self) -> Option<(i16, f32)> {
        self.last_rx.lock().await.as_ref().map(|q| (q.rssi_dbm, q.snr_db))
    }

    async fn get_rssi(&self) -> Result<i16, DriverError> {
        let mut bus = self.bus.lock().await;
        let raw = bus.read_register(REG_RSSI_VALUE)?;
        Ok(raw as i16 - 157)
    }

    /// spec.md §4.1 `channel_free`: a CAD with a 100 ms timeout.
    async fn channel_free(&self) -> Result<bool, DriverError> {
        self.set_mode(RadioMode::Cad).await?;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(100);
        loop {
            if tokio::time::Instant::now() > deadline {
                self.set_mode(RadioMode::Standby).await?;
                return Err(DriverError::CadTimeout);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            let flags = {
                let mut bus = self.bus.lock().await;
                IrqFlags::from_bits_truncate(bus.read_register(REG_IRQ_FLAGS)?)
            };
            if flags.contains(IrqFlags::CAD_DONE) {
                let detected = flags.contains(IrqFlags::CAD_DETECTED);
                let mut bus = self.bus.lock().await;
                bus.write_register(REG_IRQ_FLAGS, (IrqFlags::CAD_DONE | IrqFlags::CAD_DETECTED).bits())?;
                drop(bus);
                self.set_mode(RadioMode::Standby).await?;
                return Ok(!detected);
            }
        }
    }

    async fn get_version(&self) -> Result<u8, DriverError> {
        let mut bus = self.bus.lock().await;
        Ok(bus.read_register(REG_VERSION)?)
    }
}

impl<B: RadioBus + 'static> Drop for Sx127xRadio<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_handle.get_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.dispatch_handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::hal::MockBus;

    async fn radio() -> Sx127xRadio<MockBus> {
        Sx127xRadio::init(MockBus::new(), Arc::new(MonotonicClock::new())).await.unwrap()
    }

    #[tokio::test]
    async fn init_rejects_wrong_version() {
        let mut bus = MockBus::new();
        bus.set_register_raw(REG_VERSION, 0x99);
        let result = Sx127xRadio::init(bus, Arc::new(MonotonicClock::new())).await;
        assert!(matches!(result, Err(DriverError::VersionMismatch(0x99))));
    }

    #[tokio::test]
    async fn init_lands_in_standby() {
        let radio = radio().await;
        assert_eq!(radio.get_mode().await, RadioMode::Standby);
    }

    #[tokio::test]
    async fn frequency_word_matches_916_8_mhz() {
        // 916.8 MHz -> word = (916_800_000 << 19) / 32_000_000 = 0xE56666 (truncated)
        let word = Sx127xRadio::<MockBus>::frequency_word(916_800_000);
        let recombined = ((word[0] as u32) << 16) | ((word[1] as u32) << 8) | word[2] as u32;
        let hz_back = (recombined as u64 * 32_000_000) >> 19;
        assert!((hz_back as i64 - 916_800_000i64).abs() < 200);
    }

    #[tokio::test]
    async fn get_frequency_round_trips_through_set_frequency() {
        let radio = radio().await;
        radio.set_frequency(916_800_000).await.unwrap();
        let readback = radio.get_frequency().await.unwrap();
        assert!((readback as i64 - 916_800_000i64).abs() < 200);
    }

    #[tokio::test]
    async fn set_spreading_factor_11_sets_low_data_rate_optimize_at_125khz() {
        let radio = radio().await;
        radio.set_bandwidth(0).await.unwrap(); // 125 kHz
        radio.set_spreading_factor(11).await.unwrap();
        let bus = radio.bus.lock().await;
        assert_eq!(bus.register_raw(REG_MODEM_CONFIG_3) & 0x08, 0x08);
    }

    #[tokio::test]
    async fn set_spreading_factor_rejects_out_of_range() {
        let radio = radio().await;
        assert!(radio.set_spreading_factor(13).await.is_err());
    }

    #[tokio::test]
    async fn tx_power_above_17_uses_pa_dac_0x87() {
        let radio = radio().await;
        radio.set_tx_power(20).await.unwrap();
        let bus = radio.bus.lock().await;
        assert_eq!(bus.register_raw(REG_PA_DAC), 0x87);
    }

    #[tokio::test]
    async fn tx_power_below_15_uses_pa_dac_0x84_clamped() {
        let radio = radio().await;
        radio.set_tx_power(0).await.unwrap();
        let bus = radio.bus.lock().await;
        assert_eq!(bus.register_raw(REG_PA_DAC), 0x84);
        assert_eq!(bus.register_raw(REG_PA_CONFIG) & 0x0F, 0); // (2.max(0)-2)=0
    }

    #[tokio::test]
    async fn invert_iq_sets_secondary_register_when_either_direction_inverted() {
        let radio = radio().await;
        radio.set_invert_iq(true, false).await.unwrap();
        let bus = radio.bus.lock().await;
        assert_eq!(bus.register_raw(REG_INVERT_IQ2), 0x19);
    }

    #[tokio::test]
    async fn invert_iq_clears_secondary_register_when_neither_inverted() {
        let radio = radio().await;
        radio.set_invert_iq(false, false).await.unwrap();
        let bus = radio.bus.lock().await;
        assert_eq!(bus.register_raw(REG_INVERT_IQ2), 0x1D);
    }

    #[tokio::test]
    async fn channel_free_true_when_no_cad_detected() {
        let radio = radio().await;
        {
            let mut bus = radio.bus.lock().await;
            bus.set_register_raw(REG_IRQ_FLAGS, IrqFlags::CAD_DONE.bits());
        }
        assert!(radio.channel_free().await.unwrap());
    }

    #[tokio::test]
    async fn channel_free_false_when_cad_detected() {
        let radio = radio().await;
        {
            let mut bus = radio.bus.lock().await;
            bus.set_register_raw(REG_IRQ_FLAGS, (IrqFlags::CAD_DONE | IrqFlags::CAD_DETECTED).bits());
        }
        assert!(!radio.channel_free().await.unwrap());
    }
}
