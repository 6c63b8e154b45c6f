//! Dual-radio scheduler composing an RX radio and a TX radio into a running
//! gateway (spec.md §4.2).
//!
//! The radio is an injectable collaborator (the [`RadioDriver`] trait) so
//! the worker loop below is exercised in tests against
//! [`crate::radio::hal::MockBus`] without real hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::clock::{wrapping_delta_us, MonotonicClock};
use crate::error::ChannelManagerError;
use crate::radio::driver::{ChannelSettings, RadioDriver, TxCallback};
use crate::radio::packet::{RxPacket, TxPacket, TxTiming};

const TX_QUEUE_CAPACITY: usize = 16;
const TX_ENQUEUE_GRACE: Duration = Duration::from_millis(100);
const TX_LATE_THRESHOLD_US: i32 = 100_000;
const TX_SPIN_WAIT_LIMIT_US: i32 = 5_000_000;
const TX_DONE_WATCHDOG: Duration = Duration::from_secs(5);
const DEQUEUE_POLL: Duration = Duration::from_millis(100);

pub type RxForwardFn = Arc<dyn Fn(RxPacket) + Send + Sync>;
pub type CollisionFn = Arc<dyn Fn() + Send + Sync>;

/// Up to 8 AU915 uplink frequencies, one per hop channel (spec.md §4.2
/// "Channel hopping").
pub type ChannelTable = [u32; 8];

/// Fixed-point EMA quality score for one channel, purely observational
/// (spec.md's hop sequence stays a pure fixed round-robin regardless of
/// these scores). Stored as `f32` bit patterns behind a CAS loop so the
/// synchronous RX callback can update it without an async lock.
type ChannelQuality = Arc<[std::sync::atomic::AtomicU32; 8]>;

fn default_channel_quality() -> ChannelQuality {
    Arc::new(std::array::from_fn(|_| std::sync::atomic::AtomicU32::new(0.0f32.to_bits())))
}

fn update_channel_quality(slot: &std::sync::atomic::AtomicU32, rssi_dbm: i16, crc_ok: bool) {
    const ALPHA: f32 = 0.2;
    let sample = if crc_ok { ((rssi_dbm as f32 + 120.0) / 90.0).clamp(0.0, 1.0) } else { 0.0 };
    let mut current = slot.load(Ordering::Relaxed);
    loop {
        let updated = (f32::from_bits(current) * (1.0 - ALPHA) + sample * ALPHA).to_bits();
        match slot.compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

pub struct ChannelManager<D: RadioDriver + 'static> {
    rx_radio: Arc<D>,
    tx_radio: Arc<D>,
    tx_tx: mpsc::Sender<TxPacket>,
    tx_rx: Mutex<Option<mpsc::Receiver<TxPacket>>>,
    clock: Arc<MonotonicClock>,
    sync_word: u8,
    channel_table: ChannelTable,
    current_channel: AtomicU8,
    hop_interval_ms: Option<u32>,
    tx_busy: Arc<AtomicBool>,
    collision_count: Arc<AtomicU64>,
    channel_quality: ChannelQuality,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    hop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<D: RadioDriver + 'static> ChannelManager<D> {
    pub fn new(
        rx_radio: Arc<D>,
        tx_radio: Arc<D>,
        clock: Arc<MonotonicClock>,
        sync_word: u8,
        channel_table: ChannelTable,
        hop_interval_ms: Option<u32>,
    ) -> Self {
        let (tx_tx, tx_rx) = mpsc::channel(TX_QUEUE_CAPACITY);
        Self {
            rx_radio,
            tx_radio,
            tx_tx,
            tx_rx: Mutex::new(Some(tx_rx)),
            clock,
            sync_word,
            channel_table,
            current_channel: AtomicU8::new(0),
            hop_interval_ms,
            tx_busy: Arc::new(AtomicBool::new(false)),
            collision_count: Arc::new(AtomicU64::new(0)),
            channel_quality: default_channel_quality(),
            worker_handle: Mutex::new(None),
            hop_handle: Mutex::new(None),
        }
    }

    pub fn collision_count(&self) -> u64 {
        self.collision_count.load(Ordering::Relaxed)
    }

    /// Exponential-moving-average quality telemetry per channel, keyed off
    /// RX outcomes. Observability only — it never feeds back into
    /// [`Self::start_hopping`]'s fixed round-robin sequence.
    pub fn note_channel_outcome(&self, channel: u8, rssi_dbm: i16, crc_ok: bool) {
        if let Some(slot) = self.channel_quality.get(channel as usize) {
            update_channel_quality(slot, rssi_dbm, crc_ok);
        }
    }

    /// Current EMA quality score for `channel`, `0.0` if never observed.
    pub fn channel_quality(&self, channel: u8) -> f32 {
        match self.channel_quality.get(channel as usize) {
            Some(slot) => f32::from_bits(slot.load(Ordering::Relaxed)),
            None => 0.0,
        }
    }

    /// spec.md §4.2 "Start": puts the TX radio in Standby, starts RX on the
    /// RX radio with a reformatting callback, spawns the TX worker, and
    /// optionally starts the hop timer.
    pub async fn start(&self, on_rx: RxForwardFn, on_collision: CollisionFn) -> Result<(), ChannelManagerError> {
        self.tx_radio.set_mode(crate::radio::driver::RadioMode::Standby).await?;

        let clock_for_rx = self.clock.clone();
        let channel_table = self.channel_table;
        let channel_quality = self.channel_quality.clone();
        self.rx_radio
            .start_rx(Arc::new(move |mut packet: RxPacket| {
                // spec.md §4.2: "stamps it with the local timestamp" — the
                // driver already latches one at RxDone, this keeps the
                // chokepoint's view consistent if the two clocks ever drift.
                packet.timestamp_us = clock_for_rx.now_us32();
                // The driver operates below the channel table and leaves
                // frequency_hz at 0; fill it in here from the channel the
                // packet was received on.
                packet.frequency_hz = channel_table[packet.channel as usize % 8];
                if let Some(slot) = channel_quality.get(packet.channel as usize) {
                    update_channel_quality(slot, packet.rssi_dbm, packet.crc_ok);
                }
                on_rx(packet);
            }))
            .await?;

        let mut rx_receiver = self.tx_rx.lock().await.take().expect("start called more than once");
        let tx_radio = self.tx_radio.clone();
        let clock = self.clock.clone();
        let sync_word = self.sync_word;
        let tx_busy = self.tx_busy.clone();
        let collision_count = self.collision_count.clone();

        let handle = tokio::spawn(async move {
            loop {
                let packet = match tokio::time::timeout(DEQUEUE_POLL, rx_receiver.recv()).await {
                    Ok(Some(p)) => p,
                    Ok(None) => return, // sender dropped, manager is shutting down
                    Err(_) => continue, // 100ms poll, nothing queued
                };

                if !schedule_packet(&clock, &packet, &collision_count, &on_collision).await {
                    continue;
                }

                tx_busy.store(true, Ordering::Release);
                if let Err(e) = program_and_transmit(&tx_radio, &packet, sync_word, &tx_busy).await {
                    warn!("tx failed: {e}");
                    tx_busy.store(false, Ordering::Release);
                }
            }
        });
        *self.worker_handle.lock().await = Some(handle);
        Ok(())
    }

    /// spec.md §4.2 "TX enqueue": non-blocking send with a 100 ms grace
    /// period; queue-full surfaces as an error the forwarder maps to
    /// `TX_FAILED`.
    pub async fn enqueue_tx(&self, packet: TxPacket) -> Result<(), ChannelManagerError> {
        tokio::time::timeout(TX_ENQUEUE_GRACE, self.tx_tx.send(packet))
            .await
            .map_err(|_| ChannelManagerError::TxQueueFull)?
            .map_err(|_| ChannelManagerError::TxQueueFull)
    }

    /// spec.md §4.2 "Channel hopping": round-robin mod 8, RX radio only.
    pub async fn start_hopping(&self) {
        let Some(interval_ms) = self.hop_interval_ms else { return };
        let rx_radio = self.rx_radio.clone();
        let channel_table = self.channel_table;
        let current_channel = AtomicU8::new(self.current_channel.load(Ordering::Relaxed));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms as u64));
            loop {
                ticker.tick().await;
                let next = (current_channel.fetch_add(1, Ordering::Relaxed) + 1) % 8;
                let freq = channel_table[next as usize];
                if let Err(e) = rx_radio.set_frequency(freq).await {
                    warn!("channel hop to {next} failed: {e}");
                } else {
                    info!("hopped to channel {next} ({freq} Hz)");
                }
            }
        });
        *self.hop_handle.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        let _ = self.rx_radio.stop_rx().await;
        if let Some(h) = self.worker_handle.lock().await.take() {
            h.abort();
        }
        if let Some(h) = self.hop_handle.lock().await.take() {
            h.abort();
        }
    }
}

/// Returns `false` if the packet was dropped (too late, collision recorded).
async fn schedule_packet(
    clock: &MonotonicClock,
    packet: &TxPacket,
    collision_count: &AtomicU64,
    on_collision: &CollisionFn,
) -> bool {
    let target = match packet.timing {
        TxTiming::Immediate => return true,
        TxTiming::At(t) => t,
    };

    let now = clock.now_us32();
    let delta = wrapping_delta_us(target, now);

    if delta < -TX_LATE_THRESHOLD_US {
        collision_count.fetch_add(1, Ordering::Relaxed);
        on_collision();
        warn!("dropping tx packet scheduled {delta}us in the past (> 100ms late)");
        return false;
    }

    if delta > 0 && delta <= TX_SPIN_WAIT_LIMIT_US {
        loop {
            let now = clock.now_us32();
            if wrapping_delta_us(target, now) <= 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    true
}

async fn program_and_transmit<D: RadioDriver>(
    tx_radio: &Arc<D>,
    packet: &TxPacket,
    sync_word: u8,
    tx_busy: &Arc<AtomicBool>,
) -> Result<(), ChannelManagerError> {
    let settings = ChannelSettings {
        frequency_hz: packet.frequency_hz,
        sf: packet.sf,
        bw_code: packet.bw_code,
        coding_rate: packet.codr_denom.saturating_sub(4).max(1),
        tx_power_dbm: packet.power_dbm,
        sync_word,
        rx_invert_iq: false,
        tx_invert_iq: packet.invert_iq,
    };
    tx_radio.set_frequency(settings.frequency_hz).await?;
    tx_radio.set_spreading_factor(settings.sf).await?;
    tx_radio.set_bandwidth(settings.bw_code).await?;
    tx_radio.set_coding_rate(settings.coding_rate).await?;
    tx_radio.set_tx_power(settings.tx_power_dbm).await?;
    tx_radio.set_sync_word(settings.sync_word).await?;
    tx_radio.set_invert_iq(settings.rx_invert_iq, settings.tx_invert_iq).await?;

    let notify = Arc::new(Notify::new());
    let notify2 = notify.clone();
    let tx_busy2 = tx_busy.clone();
    let cb: TxCallback = Arc::new(move |_ok| {
        tx_busy2.store(false, Ordering::Release);
        notify2.notify_one();
    });

    tx_radio.transmit(&packet.payload, cb).await?;

    if tokio::time::timeout(TX_DONE_WATCHDOG, notify.notified()).await.is_err() {
        warn!("tx-done watchdog fired after {TX_DONE_WATCHDOG:?}, continuing");
        tx_busy.store(false, Ordering::Release);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::radio::driver::{RadioMode, Sx127xRadio};
    use crate::radio::hal::MockBus;
    use std::sync::atomic::AtomicU32;

    async fn mock_radio() -> Arc<Sx127xRadio<MockBus>> {
        Arc::new(Sx127xRadio::init(MockBus::new(), Arc::new(MonotonicClock::new())).await.unwrap())
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_transmits_immediately() {
        let rx_radio = mock_radio().await;
        let tx_radio = mock_radio().await;
        let clock = Arc::new(MonotonicClock::new());
        let manager = Arc::new(ChannelManager::new(rx_radio, tx_radio.clone(), clock, 0x34, [0u32; 8], None));

        let seen: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        manager.start(Arc::new(move |_p| { seen2.fetch_add(1, Ordering::Relaxed); }), Arc::new(|| {})).await.unwrap();

        manager
            .enqueue_tx(TxPacket {
                payload: vec![1, 2, 3],
                timing: TxTiming::Immediate,
                frequency_hz: 915_200_000,
                sf: 7,
                bw_code: 0,
                power_dbm: 14,
                codr_denom: 5,
                invert_iq: true,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tx_radio.get_mode().await, RadioMode::Standby);
        manager.stop().await;
    }

    #[tokio::test]
    async fn late_scheduled_packet_is_dropped_as_collision() {
        let clock = MonotonicClock::new();
        let collisions = AtomicU64::new(0);
        let on_collision: CollisionFn = Arc::new(|| {});
        let now = clock.now_us32();
        let target = now.wrapping_sub(200_000); // 200ms in the past
        let packet = TxPacket {
            payload: vec![],
            timing: TxTiming::At(target),
            frequency_hz: 0,
            sf: 7,
            bw_code: 0,
            power_dbm: 14,
            codr_denom: 5,
            invert_iq: false,
        };
        let scheduled = schedule_packet(&clock, &packet, &collisions, &on_collision).await;
        assert!(!scheduled);
        assert_eq!(collisions.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn enqueue_fails_when_queue_full() {
        let rx_radio = mock_radio().await;
        let tx_radio = mock_radio().await;
        let clock = Arc::new(MonotonicClock::new());
        let manager = ChannelManager::new(rx_radio, tx_radio, clock, 0x34, [0u32; 8], None);
        // Fill the queue without a worker draining it.
        for _ in 0..TX_QUEUE_CAPACITY {
            manager
                .enqueue_tx(TxPacket {
                    payload: vec![],
                    timing: TxTiming::Immediate,
                    frequency_hz: 0,
                    sf: 7,
                    bw_code: 0,
                    power_dbm: 14,
                    codr_denom: 5,
                    invert_iq: false,
                })
                .await
                .unwrap();
        }
        let result = manager
            .enqueue_tx(TxPacket {
                payload: vec![],
                timing: TxTiming::Immediate,
                frequency_hz: 0,
                sf: 7,
                bw_code: 0,
                power_dbm: 14,
                codr_denom: 5,
                invert_iq: false,
            })
            .await;
        assert!(matches!(result, Err(ChannelManagerError::TxQueueFull)));
    }

    #[tokio::test]
    async fn channel_quality_rises_on_good_rx_and_resets_on_bad_crc() {
        let rx_radio = mock_radio().await;
        let tx_radio = mock_radio().await;
        let clock = Arc::new(MonotonicClock::new());
        let manager = ChannelManager::new(rx_radio, tx_radio, clock, 0x34, [0u32; 8], None);

        assert_eq!(manager.channel_quality(2), 0.0);
        manager.note_channel_outcome(2, -50, true);
        let after_good = manager.channel_quality(2);
        assert!(after_good > 0.0);

        manager.note_channel_outcome(2, 0, false);
        let after_bad = manager.channel_quality(2);
        assert!(after_bad < after_good);
    }

    #[test]
    fn channel_quality_out_of_range_is_a_noop() {
        // Covers the `Option::None` branch cheaply without a runtime.
        let quality = default_channel_quality();
        assert!(quality.get(8).is_none());
    }
}
