//! Single chokepoint between the radio world and the forwarder world
//! (spec.md §4.3): a set of plain atomics behind a thin read API, one per
//! counter spec.md §4.3 and §4.4's statistics cadence name.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use tokio::sync::mpsc;

use crate::channel_manager::ChannelManager;
use crate::clock::MonotonicClock;
use crate::error::ChannelManagerError;
use crate::radio::driver::RadioDriver;
use crate::radio::packet::{RxPacket, TxPacket};

const RX_QUEUE_CAPACITY: usize = 32;

/// spec.md §4.3 "owner of statistics". Every counter here maps one-to-one
/// onto a key of the `stat` JSON object spec.md §4.4 sends to the server.
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub rx_total: AtomicU64,
    pub rx_ok: AtomicU64,
    pub rx_bad: AtomicU64,
    pub rx_forwarded: AtomicU64,
    pub tx_total: AtomicU64,
    pub tx_ok: AtomicU64,
    pub tx_fail: AtomicU64,
    pub tx_collision: AtomicU64,
    /// Low 32 bits of the monotonic clock at last RX/TX, `0` meaning never.
    pub last_rx_time: AtomicU32,
    pub last_tx_time: AtomicU32,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// spec.md §3 "uptime (seconds since start)": derived from the
    /// process-wide monotonic clock rather than stored, so a [`Self::reset`]
    /// never has to special-case it to "preserve start_time".
    pub fn uptime_seconds(&self, clock: &MonotonicClock) -> u64 {
        clock.now_us64() / 1_000_000
    }

    /// Ack ratio percent for the `ackr` stat field: `tx_ok / tx_total * 100`,
    /// `100` when nothing has been sent yet.
    pub fn ack_ratio_percent(&self) -> f32 {
        let total = self.tx_total.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        self.tx_ok.load(Ordering::Relaxed) as f32 / total as f32 * 100.0
    }

    /// Resets every running counter but preserves nothing time-based beyond
    /// what the caller already has (spec.md doesn't define a gateway-wide
    /// "uptime" counter reset since uptime comes from the process clock, not
    /// this struct).
    pub fn reset(&self) {
        self.rx_total.store(0, Ordering::Relaxed);
        self.rx_ok.store(0, Ordering::Relaxed);
        self.rx_bad.store(0, Ordering::Relaxed);
        self.rx_forwarded.store(0, Ordering::Relaxed);
        self.tx_total.store(0, Ordering::Relaxed);
        self.tx_ok.store(0, Ordering::Relaxed);
        self.tx_fail.store(0, Ordering::Relaxed);
        self.tx_collision.store(0, Ordering::Relaxed);
    }
}

pub type RxUserCallback = Arc<dyn Fn(RxPacket) + Send + Sync>;

/// spec.md §4.3 "Single chokepoint between the radio world and the
/// forwarder world".
pub struct GatewayCore<D: RadioDriver + 'static> {
    channel_manager: Arc<ChannelManager<D>>,
    stats: Arc<GatewayStats>,
    clock: Arc<MonotonicClock>,
    rx_tx: mpsc::Sender<RxPacket>,
    rx_rx: tokio::sync::Mutex<Option<mpsc::Receiver<RxPacket>>>,
}

impl<D: RadioDriver + 'static> GatewayCore<D> {
    pub fn new(channel_manager: Arc<ChannelManager<D>>, clock: Arc<MonotonicClock>) -> Self {
        let (rx_tx, rx_rx) = mpsc::channel(RX_QUEUE_CAPACITY);
        Self {
            channel_manager,
            stats: Arc::new(GatewayStats::new()),
            clock,
            rx_tx,
            rx_rx: tokio::sync::Mutex::new(Some(rx_rx)),
        }
    }

    pub fn stats(&self) -> Arc<GatewayStats> {
        self.stats.clone()
    }

    pub fn clock(&self) -> Arc<MonotonicClock> {
        self.clock.clone()
    }

    /// spec.md §4.3 "RX path": bumps counters synchronously, then enqueues
    /// for the dedicated drain task to hand to `on_forward`.
    pub async fn on_radio_rx(&self, packet: RxPacket) {
        self.stats.rx_total.fetch_add(1, Ordering::Relaxed);
        if packet.crc_ok {
            self.stats.rx_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.rx_bad.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.last_rx_time.store(packet.timestamp_us, Ordering::Relaxed);

        if self.rx_tx.try_send(packet).is_err() {
            warn!("rx queue full, dropping packet");
        }
    }

    /// Drains the RX queue, invoking `on_forward` only for CRC-OK packets
    /// (spec.md §4.3: "invokes any user-installed RX callback only for
    /// CRC-OK packets").
    pub async fn run_rx_drain(&self, on_forward: RxUserCallback) {
        let mut receiver = self.rx_rx.lock().await.take().expect("run_rx_drain called more than once");
        while let Some(packet) = receiver.recv().await {
            if packet.crc_ok {
                self.stats.rx_forwarded.fetch_add(1, Ordering::Relaxed);
                on_forward(packet);
            }
        }
    }

    /// spec.md §4.3 "TX path": accepts a tx_packet from the forwarder and
    /// forwards to the channel manager, updating `last_tx_time`/`tx_fail`.
    pub async fn submit_tx(&self, packet: TxPacket) -> Result<(), ChannelManagerError> {
        self.stats.tx_total.fetch_add(1, Ordering::Relaxed);
        match self.channel_manager.enqueue_tx(packet).await {
            Ok(()) => {
                self.stats.last_tx_time.store(self.clock.now_us32(), Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.tx_fail.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn record_tx_result(&self, success: bool) {
        if success {
            self.stats.tx_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.tx_fail.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_collision(&self) {
        self.stats.tx_collision.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::hal::MockBus;
    use crate::radio::driver::Sx127xRadio;

    async fn core() -> GatewayCore<Sx127xRadio<MockBus>> {
        let clock = Arc::new(MonotonicClock::new());
        let rx_radio = Arc::new(Sx127xRadio::init(MockBus::new(), clock.clone()).await.unwrap());
        let tx_radio = Arc::new(Sx127xRadio::init(MockBus::new(), clock.clone()).await.unwrap());
        let manager = Arc::new(ChannelManager::new(rx_radio, tx_radio, clock.clone(), 0x34, [0u32; 8], None));
        GatewayCore::new(manager, clock)
    }

    #[tokio::test]
    async fn rx_good_packet_increments_rx_ok_and_total() {
        let core = core().await;
        core.on_radio_rx(RxPacket {
            payload: vec![1],
            timestamp_us: 42,
            frequency_hz: 915_200_000,
            sf: 7,
            bw_code: 0,
            rssi_dbm: -50,
            snr_db: 8.0,
            crc_ok: true,
            channel: 0,
        })
        .await;
        assert_eq!(core.stats().rx_total.load(Ordering::Relaxed), 1);
        assert_eq!(core.stats().rx_ok.load(Ordering::Relaxed), 1);
        assert_eq!(core.stats().last_rx_time.load(Ordering::Relaxed), 42);
    }

    #[tokio::test]
    async fn rx_bad_crc_increments_rx_bad_not_rx_ok() {
        let core = core().await;
        core.on_radio_rx(RxPacket {
            payload: vec![],
            timestamp_us: 1,
            frequency_hz: 0,
            sf: 7,
            bw_code: 0,
            rssi_dbm: -90,
            snr_db: -5.0,
            crc_ok: false,
            channel: 0,
        })
        .await;
        assert_eq!(core.stats().rx_bad.load(Ordering::Relaxed), 1);
        assert_eq!(core.stats().rx_ok.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn ack_ratio_is_100_percent_with_no_traffic() {
        let stats = GatewayStats::new();
        assert_eq!(stats.ack_ratio_percent(), 100.0);
    }

    #[test]
    fn ack_ratio_reflects_failures() {
        let stats = GatewayStats::new();
        stats.tx_total.store(4, Ordering::Relaxed);
        stats.tx_ok.store(3, Ordering::Relaxed);
        assert_eq!(stats.ack_ratio_percent(), 75.0);
    }

    #[test]
    fn reset_clears_counters() {
        let stats = GatewayStats::new();
        stats.rx_total.store(10, Ordering::Relaxed);
        stats.reset();
        assert_eq!(stats.rx_total.load(Ordering::Relaxed), 0);
    }
}
