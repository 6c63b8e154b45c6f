//! Semtech UDP transport: uplink batching, keepalive/stat timers, downlink
//! decode-and-dispatch, and connection inference (spec.md §4.4).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

use crate::error::ForwarderError;
use crate::forwarder::json::{
    rxpk_from_packet, txpk_to_packet, RxPk, RxPkEnvelope, Stat, StatEnvelope, TxPkEnvelope, TxpkAck, TxpkAckBody,
};
use crate::forwarder::protocol::{Frame, MessageType, TokenCounters};
use crate::gateway::GatewayStats;
use crate::radio::packet::TxPacket;

const MAX_UPLINK_BATCH: usize = 8;
const FIRST_PACKET_GRACE: Duration = Duration::from_millis(100);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// spec.md §3 "forwarder_status".
#[derive(Debug, Default)]
pub struct ForwarderStatus {
    connected: AtomicBool,
    push_ack_count: AtomicU64,
    pull_ack_count: AtomicU64,
    last_pull_ack: Mutex<Option<tokio::time::Instant>>,
}

impl ForwarderStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn push_ack_count(&self) -> u64 {
        self.push_ack_count.load(Ordering::Relaxed)
    }

    pub fn pull_ack_count(&self) -> u64 {
        self.pull_ack_count.load(Ordering::Relaxed)
    }

    async fn on_push_ack(&self) {
        self.push_ack_count.fetch_add(1, Ordering::Relaxed);
    }

    /// spec.md §4.4 "Connection inference": a PULL_ACK received within the
    /// last 30s marks the link connected; an independent timer in
    /// [`ForwarderClient::run_connection_watchdog`] clears it after a gap.
    async fn on_pull_ack(&self) {
        self.pull_ack_count.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        *self.last_pull_ack.lock().await = Some(tokio::time::Instant::now());
    }

    async fn check_timeout(&self) {
        let last = *self.last_pull_ack.lock().await;
        let stale = match last {
            Some(t) => t.elapsed() > CONNECTION_TIMEOUT,
            None => false,
        };
        if stale {
            self.connected.store(false, Ordering::Relaxed);
        }
    }
}

pub type TxpkDispatchFn = Arc<dyn Fn(TxPacket) -> bool + Send + Sync>;

pub struct ForwarderClient {
    socket: Arc<UdpSocket>,
    gateway_eui: [u8; 8],
    tokens: Mutex<TokenCounters>,
    uplink_tx: mpsc::Sender<RxPk>,
    uplink_rx: Mutex<Option<mpsc::Receiver<RxPk>>>,
    status: Arc<ForwarderStatus>,
    stats: Arc<GatewayStats>,
    keepalive_interval: Duration,
    stat_interval: Duration,
}

impl ForwarderClient {
    pub async fn connect(
        server_addr: SocketAddr,
        gateway_eui: [u8; 8],
        stats: Arc<GatewayStats>,
        keepalive_interval: Duration,
        stat_interval: Duration,
    ) -> Result<Self, ForwarderError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server_addr).await?;
        let (uplink_tx, uplink_rx) = mpsc::channel(64);
        Ok(Self {
            socket: Arc::new(socket),
            gateway_eui,
            tokens: Mutex::new(TokenCounters::default()),
            uplink_tx,
            uplink_rx: Mutex::new(Some(uplink_rx)),
            status: Arc::new(ForwarderStatus::default()),
            stats,
            keepalive_interval,
            stat_interval,
        })
    }

    pub fn status(&self) -> Arc<ForwarderStatus> {
        self.status.clone()
    }

    /// spec.md §4.3's default wiring: the gateway core hands CRC-OK packets
    /// here to be queued for the uplink batcher.
    pub async fn enqueue_uplink(&self, rxpk: RxPk) {
        if self.uplink_tx.try_send(rxpk).is_err() {
            warn!("uplink queue full, dropping rxpk");
        }
    }

    /// spec.md §4.4 "Uplink batching": block up to 100 ms for the first
    /// packet, then greedily drain without blocking, up to 8 per datagram.
    pub async fn run_uplink_sender(&self) {
        let mut receiver = self.uplink_rx.lock().await.take().expect("run_uplink_sender called more than once");
        loop {
            let first = match tokio::time::timeout(FIRST_PACKET_GRACE, receiver.recv()).await {
                Ok(Some(p)) => p,
                Ok(None) => return,
                Err(_) => continue,
            };

            let mut batch = vec![first];
            while batch.len() < MAX_UPLINK_BATCH {
                match receiver.try_recv() {
                    Ok(p) => batch.push(p),
                    Err(_) => break,
                }
            }

            if let Err(e) = self.send_push_data(batch).await {
                warn!("failed to send PUSH_DATA: {e}");
            }
        }
    }

    async fn send_push_data(&self, rxpk: Vec<RxPk>) -> Result<(), ForwarderError> {
        let body = serde_json::to_vec(&RxPkEnvelope { rxpk })?;
        let token = self.tokens.lock().await.next_push();
        let frame = Frame { token, msg_type: MessageType::PushData, gateway_eui: Some(self.gateway_eui), body };
        self.socket.send(&frame.encode()).await?;
        Ok(())
    }

    /// spec.md §4.4 "Keepalive cadence": PULL_DATA at the configured
    /// interval, default 10s.
    pub async fn run_keepalive(&self) {
        let mut ticker = tokio::time::interval(self.keepalive_interval);
        loop {
            ticker.tick().await;
            let token = self.tokens.lock().await.next_pull();
            let frame = Frame { token, msg_type: MessageType::PullData, gateway_eui: Some(self.gateway_eui), body: vec![] };
            if let Err(e) = self.socket.send(&frame.encode()).await {
                warn!("failed to send PULL_DATA: {e}");
            }
        }
    }

    /// spec.md §4.4 "Statistics cadence": PUSH_DATA with a `stat` object,
    /// default interval 30s.
    pub async fn run_stat_reporter(&self) {
        let mut ticker = tokio::time::interval(self.stat_interval);
        loop {
            ticker.tick().await;
            let stat = Stat {
                time: Utc::now().format("%Y-%m-%d %H:%M:%S GMT").to_string(),
                rxnb: self.stats.rx_total.load(Ordering::Relaxed),
                rxok: self.stats.rx_ok.load(Ordering::Relaxed),
                rxfw: self.stats.rx_forwarded.load(Ordering::Relaxed),
                ackr: self.stats.ack_ratio_percent(),
                dwnb: self.stats.tx_total.load(Ordering::Relaxed),
                txnb: self.stats.tx_ok.load(Ordering::Relaxed),
            };
            let body = match serde_json::to_vec(&StatEnvelope { stat }) {
                Ok(b) => b,
                Err(e) => {
                    warn!("failed to encode stat object: {e}");
                    continue;
                }
            };
            let token = self.tokens.lock().await.next_push();
            let frame = Frame { token, msg_type: MessageType::PushData, gateway_eui: Some(self.gateway_eui), body };
            if let Err(e) = self.socket.send(&frame.encode()).await {
                warn!("failed to send stat PUSH_DATA: {e}");
            }
        }
    }

    /// spec.md §4.4 "Connection inference": clears `connected` after a gap,
    /// independently of the traffic-driven `on_pull_ack` path.
    pub async fn run_connection_watchdog(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            self.status.check_timeout().await;
        }
    }

    /// spec.md §4.4 "Receive loop": blocking recvfrom with a 1s timeout for
    /// cancellation checks, dispatching PUSH_ACK/PULL_ACK/PULL_RESP.
    pub async fn run_receive_loop(&self, dispatch_tx: TxpkDispatchFn) {
        let mut buf = [0u8; 2048];
        loop {
            let n = match tokio::time::timeout(RECV_TIMEOUT, self.socket.recv(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!("recv error: {e}");
                    continue;
                }
                Err(_) => continue, // timeout: just loop back to check for cancellation
            };

            let frame = match Frame::decode(&buf[..n]) {
                Ok(f) => f,
                Err(ForwarderError::ShortFrame) => {
                    debug!("dropping datagram shorter than header");
                    continue;
                }
                Err(ForwarderError::UnsupportedVersion(v)) => {
                    debug!("dropping datagram with unsupported version/type byte 0x{v:02X}");
                    continue;
                }
                Err(e) => {
                    warn!("failed to decode datagram: {e}");
                    continue;
                }
            };

            match frame.msg_type {
                MessageType::PushAck => self.status.on_push_ack().await,
                MessageType::PullAck => self.status.on_pull_ack().await,
                MessageType::PullResp => self.handle_pull_resp(frame, &dispatch_tx).await,
                other => debug!("ignoring unexpected message type {other:?} on receive loop"),
            }
        }
    }

    async fn handle_pull_resp(&self, frame: Frame, dispatch: &TxpkDispatchFn) {
        let error = self.try_handle_pull_resp(&frame.body, dispatch).await.err();
        let ack_error = match error {
            None => None,
            Some(PullRespOutcome::InvalidJson) => Some("INVALID_JSON".to_string()),
            Some(PullRespOutcome::MissingTxpk) => Some("MISSING_TXPK".to_string()),
            Some(PullRespOutcome::TxFailed) => Some("TX_FAILED".to_string()),
        };
        self.send_tx_ack(ack_error).await;
    }

    async fn try_handle_pull_resp(&self, body: &[u8], dispatch: &TxpkDispatchFn) -> Result<(), PullRespOutcome> {
        let envelope: TxPkEnvelope = serde_json::from_slice(body).map_err(|_| PullRespOutcome::InvalidJson)?;
        let packet = txpk_to_packet(&envelope.txpk).map_err(|_| PullRespOutcome::MissingTxpk)?;
        if dispatch(packet) {
            Ok(())
        } else {
            Err(PullRespOutcome::TxFailed)
        }
    }

    async fn send_tx_ack(&self, error: Option<String>) {
        let body = match &error {
            None => vec![],
            Some(msg) => match serde_json::to_vec(&TxpkAckBody { txpk_ack: TxpkAck { error: Some(msg.clone()) } }) {
                Ok(b) => b,
                Err(e) => {
                    warn!("failed to encode txpk_ack: {e}");
                    vec![]
                }
            },
        };
        let token = self.tokens.lock().await.next_push();
        let frame = Frame { token, msg_type: MessageType::TxAck, gateway_eui: Some(self.gateway_eui), body };
        if let Err(e) = self.socket.send(&frame.encode()).await {
            warn!("failed to send TX_ACK: {e}");
        }
    }
}

enum PullRespOutcome {
    InvalidJson,
    MissingTxpk,
    TxFailed,
}

pub fn rxpk_from_gateway(packet: &crate::radio::packet::RxPacket) -> Result<RxPk, ForwarderError> {
    rxpk_from_packet(packet)
}
