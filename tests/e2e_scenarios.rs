//! Black-box exercises of the literal end-to-end scenarios from spec.md §8,
//! driving the crate's public API instead of module internals.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lorawan_gateway::channel_manager::ChannelManager;
use lorawan_gateway::clock::MonotonicClock;
use lorawan_gateway::forwarder::json::{rxpk_from_packet, TxPk};
use lorawan_gateway::forwarder::protocol::{Frame, MessageType, TokenCounters};
use lorawan_gateway::forwarder::ForwarderClient;
use lorawan_gateway::gateway::GatewayCore;
use lorawan_gateway::radio::driver::{RadioDriver, RadioMode, Sx127xRadio};
use lorawan_gateway::radio::hal::MockBus;
use lorawan_gateway::radio::packet::{RxPacket, TxPacket, TxTiming};

async fn mock_radio(clock: &Arc<MonotonicClock>) -> Arc<Sx127xRadio<MockBus>> {
    Arc::new(Sx127xRadio::init(MockBus::new(), clock.clone()).await.unwrap())
}

/// Scenario 1, "Uplink echo": the rxpk built from a received packet matches
/// the literal JSON fragment spec.md §8 specifies.
#[test]
fn uplink_echo_produces_expected_rxpk_json() {
    let packet = RxPacket {
        payload: vec![0x40, 0x11, 0x22, 0x33, 0x44, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05],
        timestamp_us: 12_345,
        frequency_hz: 916_800_000,
        sf: 7,
        bw_code: 0,
        rssi_dbm: -42,
        snr_db: 7.0,
        crc_ok: true,
        channel: 0,
    };

    let rxpk = rxpk_from_packet(&packet).unwrap();
    assert_eq!(rxpk.tmst, 12_345);
    assert_eq!(rxpk.freq, 916.8);
    assert_eq!(rxpk.datr, "SF7BW125");
    assert_eq!(rxpk.codr, "4/5");
    assert_eq!(rxpk.rssi, -42);
    assert_eq!(rxpk.data, "QBEiM0QAAAECAwQF");

    let body = serde_json::to_value(&rxpk).unwrap();
    assert_eq!(body["data"], "QBEiM0QAAAECAwQF");
    assert_eq!(body["datr"], "SF7BW125");
}

/// Scenario 2, "Downlink schedule": a PULL_RESP descriptor scheduled 500 µs
/// in the future parses to the exact modulation/payload the source expects.
#[test]
fn downlink_schedule_parses_to_expected_tx_packet() {
    let txpk = TxPk {
        imme: false,
        tmst: Some(1_000_000),
        freq: 923.3,
        powe: 14,
        datr: "SF12BW500".to_string(),
        codr: "4/5".to_string(),
        ipol: true,
        data: "YIA=".to_string(),
    };

    let packet = lorawan_gateway::forwarder::json::txpk_to_packet(&txpk).unwrap();
    assert_eq!(packet.timing, TxTiming::At(1_000_000));
    assert_eq!(packet.frequency_hz, 923_300_000);
    assert_eq!(packet.sf, 12);
    assert_eq!(packet.bw_code, 2);
    assert_eq!(packet.codr_denom, 5);
    assert!(packet.invert_iq);
    assert_eq!(packet.payload, vec![0x60, 0x80]);
}

/// Scenarios 2 & 3 together, driven through the real [`ChannelManager`]
/// worker loop against mock radios: a packet scheduled 500 µs out transmits,
/// one scheduled 400 ms in the past is dropped as a collision.
#[tokio::test]
async fn channel_manager_transmits_on_time_and_drops_late_packets() {
    let clock = Arc::new(MonotonicClock::new());
    let rx_radio = mock_radio(&clock).await;
    let tx_radio = mock_radio(&clock).await;
    let manager = Arc::new(ChannelManager::new(rx_radio, tx_radio.clone(), clock.clone(), 0x34, [0u32; 8], None));
    manager.start(Arc::new(|_| {}), Arc::new(|| {})).await.unwrap();

    let near_future = clock.now_us32().wrapping_add(500);
    manager
        .enqueue_tx(TxPacket {
            payload: vec![0x60, 0x80],
            timing: TxTiming::At(near_future),
            frequency_hz: 923_300_000,
            sf: 12,
            bw_code: 2,
            power_dbm: 14,
            codr_denom: 5,
            invert_iq: true,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tx_radio.get_mode().await, RadioMode::Standby);
    assert_eq!(manager.collision_count(), 0);

    let far_past = clock.now_us32().wrapping_sub(400_000);
    manager
        .enqueue_tx(TxPacket {
            payload: vec![],
            timing: TxTiming::At(far_past),
            frequency_hz: 0,
            sf: 7,
            bw_code: 0,
            power_dbm: 14,
            codr_denom: 5,
            invert_iq: false,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.collision_count(), 1);

    manager.stop().await;
}

/// Scenario 5, "Hopping": round-robin over an 8-channel AU915 subband at a
/// 1 s interval lands back on the starting frequency after 8 hops.
#[tokio::test(start_paused = true)]
async fn channel_hopping_cycles_through_subband_and_wraps() {
    let clock = Arc::new(MonotonicClock::new());
    let rx_radio = mock_radio(&clock).await;
    let tx_radio = mock_radio(&clock).await;
    let subband = 2u8;
    let channel_table: [u32; 8] = std::array::from_fn(|ch| lorawan_gateway::config::au915_uplink_freq_hz(subband, ch as u8));
    assert_eq!(channel_table[0], 916_800_000);

    let manager = ChannelManager::new(rx_radio.clone(), tx_radio, clock, 0x34, channel_table, Some(1_000));
    manager.start_hopping().await;

    tokio::time::advance(Duration::from_millis(1_000)).await;
    tokio::task::yield_now().await;
    assert_eq!(rx_radio.get_frequency().await.unwrap(), channel_table[1]);

    for _ in 0..7 {
        tokio::time::advance(Duration::from_millis(1_000)).await;
        tokio::task::yield_now().await;
    }
    assert_eq!(rx_radio.get_frequency().await.unwrap(), channel_table[0]);

    manager.stop().await;
}

// Scenario 6, "CAD", needs to inject CAD_DONE/CAD_DETECTED into the mock
// bus's register file before `channel_free` polls it; that file is private
// to `radio::driver::Sx127xRadio`, so both the clean and busy cases are
// exercised as colocated unit tests there instead
// (`channel_free_true_when_no_cad_detected`,
// `channel_free_false_when_cad_detected`).

/// Scenario 4, "Keepalive-and-loss": connection is inferred true while
/// PULL_ACKs keep arriving, and flips false once they stop.
#[tokio::test(start_paused = true)]
async fn connection_inference_follows_pull_ack_arrival() {
    let server_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr: SocketAddr = server_socket.local_addr().unwrap();

    let stats = Arc::new(lorawan_gateway::gateway::GatewayStats::new());
    let client = Arc::new(
        ForwarderClient::connect(server_addr, [1; 8], stats, Duration::from_millis(100), Duration::from_secs(3600))
            .await
            .unwrap(),
    );

    let client_recv = client.clone();
    let dispatch: lorawan_gateway::forwarder::client::TxpkDispatchFn = Arc::new(|_| true);
    tokio::spawn(async move { client_recv.run_receive_loop(dispatch).await });
    let client_watchdog = client.clone();
    tokio::spawn(async move { client_watchdog.run_connection_watchdog().await });
    let client_keepalive = client.clone();
    tokio::spawn(async move { client_keepalive.run_keepalive().await });

    let mut tokens = TokenCounters::default();
    let mut buf = [0u8; 64];

    // Respond to keepalives with PULL_ACK for a while.
    for _ in 0..3 {
        let (n, from) = server_socket.recv_from(&mut buf).await.unwrap();
        let frame = Frame::decode(&buf[..n]).unwrap();
        assert_eq!(frame.msg_type, MessageType::PullData);
        let ack = Frame { token: frame.token, msg_type: MessageType::PullAck, gateway_eui: None, body: vec![] };
        let _ = tokens.next_pull();
        server_socket.send_to(&ack.encode(), from).await.unwrap();
        tokio::task::yield_now().await;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.status().is_connected());

    // Stop answering; after the 30s connection timeout the watchdog should
    // flip `connected` back to false even with no further traffic.
    tokio::time::advance(Duration::from_secs(31)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!client.status().is_connected());
}
