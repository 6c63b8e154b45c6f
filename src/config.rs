//! Gateway configuration record (spec.md §6) plus the AU915 band-plan
//! helper (spec.md §4.5) and the persistence collaborator contract.
//!
//! The config record is a process-wide read-mostly snapshot (spec.md §9,
//! "Process-wide configuration singleton"): callers get a cheap clone of an
//! `Arc<GatewayConfig>` via [`ConfigHandle::snapshot`] and can never obtain a
//! mutable reference to the live value; updates go through
//! [`ConfigHandle::replace`], which swaps the whole record atomically.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::ConfigError;

/// One of the 8 channels in a LoRaWAN sub-band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub frequency_hz: u32,
    pub sf_min: u8,
    pub sf_max: u8,
    pub bw_code: u8,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoraConfig {
    pub subband: u8,
    pub channels: [ChannelConfig; 8],
    pub rx_sf: u8,
    pub rx_bw: u8,
    pub tx_power_dbm: i8,
    /// 0x34 public LoRaWAN, 0x12 private.
    pub sync_word: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    pub enabled: bool,
    pub max_retry: u8,
}

impl Drop for WifiConfig {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EthernetConfig {
    pub enabled: bool,
    pub dhcp: bool,
    pub ip: u32,
    pub netmask: u32,
    pub gateway: u32,
    pub dns: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub keepalive_interval_ms: u32,
    pub stat_interval_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1700,
            keepalive_interval_ms: 10_000,
            stat_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    pub gateway_eui: [u8; 8],
    pub lora: LoraConfig,
    pub wifi: WifiConfig,
    pub ethernet: EthernetConfig,
    pub server: ServerConfig,
    /// `0` is the sentinel for "invalid / not yet saved" (spec.md §6).
    pub config_version: u32,
}

impl GatewayConfig {
    /// A single AU915 sub-band with all 8 channels enabled and SF7-SF12
    /// on 125 kHz, matching the defaults a first boot would use.
    pub fn default_au915(mac: [u8; 6], subband: u8) -> Self {
        let mut channels = [ChannelConfig {
            frequency_hz: 0,
            sf_min: 7,
            sf_max: 12,
            bw_code: 0,
            enabled: true,
        }; 8];
        for (ch, slot) in channels.iter_mut().enumerate() {
            slot.frequency_hz = au915_uplink_freq_hz(subband, ch as u8);
        }

        Self {
            gateway_eui: eui64_from_mac(mac),
            lora: LoraConfig {
                subband,
                channels,
                rx_sf: 7,
                rx_bw: 0,
                tx_power_dbm: 20,
                sync_word: 0x34,
            },
            wifi: WifiConfig { ssid: String::new(), password: String::new(), enabled: false, max_retry: 5 },
            ethernet: EthernetConfig { enabled: true, dhcp: true, ip: 0, netmask: 0, gateway: 0, dns: 0 },
            server: ServerConfig::default(),
            config_version: 1,
        }
    }
}

/// Persistence collaborator (spec.md §6): "a key-value blob store providing
/// load/save of a settings record". Out of scope to implement for real; this
/// crate only needs the contract plus one reference implementation so the
/// rest of the gateway can be exercised without external infrastructure.
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` is the "not found" case; a zero `config_version` inside a
    /// loaded record is treated by callers as equivalent to not-found.
    fn load(&self) -> Result<Option<GatewayConfig>, ConfigError>;
    fn save(&self, config: &GatewayConfig) -> Result<(), ConfigError>;
}

/// JSON-file-backed `ConfigStore`. Stands in for the unspecified key-value
/// blob store named in spec.md §6; swappable since callers only see the
/// trait.
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Option<GatewayConfig>, ConfigError> {
        if !Path::new(&self.path).exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        let config: GatewayConfig = serde_json::from_slice(&bytes)?;
        if config.config_version == 0 {
            return Ok(None);
        }
        Ok(Some(config))
    }

    fn save(&self, config: &GatewayConfig) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(config)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

/// Process-wide read-mostly configuration snapshot (spec.md §9).
pub struct ConfigHandle {
    inner: RwLock<Arc<GatewayConfig>>,
}

impl ConfigHandle {
    pub fn new(initial: GatewayConfig) -> Self {
        Self { inner: RwLock::new(Arc::new(initial)) }
    }

    /// Cheap clone of the current snapshot; never a mutable reference.
    pub fn snapshot(&self) -> Arc<GatewayConfig> {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Atomically replaces the whole record.
    pub fn replace(&self, new: GatewayConfig) {
        *self.inner.write().expect("config lock poisoned") = Arc::new(new);
    }
}

/// AU915 uplink frequency for `(subband, channel)`: `915.2 MHz + (8 * subband
/// + channel) * 200 kHz` (spec.md §4.5).
pub fn au915_uplink_freq_hz(subband: u8, channel: u8) -> u32 {
    const BASE_HZ: u32 = 915_200_000;
    const STEP_HZ: u32 = 200_000;
    BASE_HZ + (8 * subband as u32 + channel as u32) * STEP_HZ
}

/// Inverse of [`au915_uplink_freq_hz`]: recovers `(subband, channel)` from an
/// uplink frequency. Used by the round-trip law in spec.md §8.
pub fn au915_uplink_channel(freq_hz: u32) -> Option<(u8, u8)> {
    const BASE_HZ: u32 = 915_200_000;
    const STEP_HZ: u32 = 200_000;
    let delta = freq_hz.checked_sub(BASE_HZ)?;
    if delta % STEP_HZ != 0 {
        return None;
    }
    let n = delta / STEP_HZ;
    if n > 63 {
        return None;
    }
    Some(((n / 8) as u8, (n % 8) as u8))
}

/// RX1 downlink frequency derived from an uplink frequency (spec.md §4.5):
/// `n = (f_up - 915.2 MHz) / 200 kHz`, `dn_index = min(n / 8, 7)`,
/// `f_dn = 923.3 MHz + dn_index * 600 kHz`.
pub fn au915_downlink_freq_hz(uplink_freq_hz: u32) -> u32 {
    const UP_BASE_HZ: u32 = 915_200_000;
    const UP_STEP_HZ: u32 = 200_000;
    const DN_BASE_HZ: u32 = 923_300_000;
    const DN_STEP_HZ: u32 = 600_000;

    let n = uplink_freq_hz.saturating_sub(UP_BASE_HZ) / UP_STEP_HZ;
    let dn_index = (n / 8).min(7);
    DN_BASE_HZ + dn_index * DN_STEP_HZ
}

/// EUI-64 from a 6-byte MAC address (EUI-48 → EUI-64): insert `FF FE` between
/// the 3rd and 4th bytes (spec.md §4.5).
pub fn eui64_from_mac(mac: [u8; 6]) -> [u8; 8] {
    [mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn eui64_inserts_ff_fe() {
        let mac = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
        assert_eq!(eui64_from_mac(mac), [0x00, 0x11, 0x22, 0xFF, 0xFE, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn au915_roundtrip_all_channels() {
        for subband in 0..8u8 {
            for ch in 0..8u8 {
                let f = au915_uplink_freq_hz(subband, ch);
                assert_eq!(au915_uplink_channel(f), Some((subband, ch)));
            }
        }
    }

    #[test]
    fn au915_subband0_channel0_matches_spec_example() {
        // Scenario 1 in spec.md §8 uses 916.8 MHz as a concrete uplink freq.
        assert_eq!(au915_uplink_freq_hz(8, 0), 916_800_000);
    }

    #[test]
    fn au915_downlink_mapping() {
        // 916.8 MHz uplink -> subband 8 channel 0 -> n=64... use an in-range value.
        let f_up = au915_uplink_freq_hz(2, 3); // n = 19, dn_index = 2
        assert_eq!(au915_downlink_freq_hz(f_up), 923_300_000 + 2 * 600_000);
    }

    #[test]
    fn config_version_zero_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::new(&path);
        let mut cfg = GatewayConfig::default_au915([0; 6], 0);
        cfg.config_version = 0;
        store.save(&cfg).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn config_store_roundtrips_valid_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::new(&path);
        let cfg = GatewayConfig::default_au915([1, 2, 3, 4, 5, 6], 2);
        store.save(&cfg).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.gateway_eui, cfg.gateway_eui);
        assert_eq!(loaded.lora.subband, 2);
    }

    #[test]
    fn config_handle_replace_is_visible_to_new_snapshots() {
        let handle = ConfigHandle::new(GatewayConfig::default_au915([0; 6], 0));
        let before = handle.snapshot();
        assert_eq!(before.lora.subband, 0);
        handle.replace(GatewayConfig::default_au915([0; 6], 5));
        let after = handle.snapshot();
        assert_eq!(after.lora.subband, 5);
    }

    proptest::proptest! {
        /// spec.md §8's AU915 round-trip law, generalized to every in-range
        /// (subband, channel) pair instead of the fixed examples above.
        #[test]
        fn au915_uplink_freq_and_channel_are_inverses(subband in 0u8..8, channel in 0u8..8) {
            let freq = au915_uplink_freq_hz(subband, channel);
            prop_assert_eq!(au915_uplink_channel(freq), Some((subband, channel)));
        }

        /// A frequency not on the 200 kHz grid, or outside the 64-channel
        /// table, must never falsely decode to a channel.
        #[test]
        fn au915_uplink_channel_rejects_off_grid_frequencies(offset in 1u32..200_000) {
            let freq = au915_uplink_freq_hz(0, 0) + offset;
            prop_assert_eq!(au915_uplink_channel(freq), None);
        }
    }
}
